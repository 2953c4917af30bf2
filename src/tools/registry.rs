//! Tool registry passed per run.

use std::collections::HashMap;
use std::sync::Arc;

use super::tool::Tool;
use super::types::ToolDefinition;

/// Name of the catch-all entry consulted when no exact name matches.
pub const WILDCARD_TOOL_NAME: &str = "*";

/// A registered tool plus its dispatch flags.
#[derive(Clone)]
pub struct ToolEntry {
    tool: Arc<dyn Tool>,
    available: bool,
    follow_up: bool,
    agent_id: Option<String>,
}

impl ToolEntry {
    /// A globally visible, available entry that requests follow-up.
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            tool,
            available: true,
            follow_up: true,
            agent_id: None,
        }
    }

    /// Mark the tool present but not dispatchable.
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Whether a written result should trigger another backend round.
    pub fn with_follow_up(mut self, follow_up: bool) -> Self {
        self.follow_up = follow_up;
        self
    }

    /// Restrict the entry to runs of one agent.
    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn follow_up(&self) -> bool {
        self.follow_up
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn is_wildcard(&self) -> bool {
        self.name() == WILDCARD_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool.name().to_string(),
            description: self.tool.description().to_string(),
            parameters: self.tool.parameters().schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name())
            .field("available", &self.available)
            .field("follow_up", &self.follow_up)
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

/// Result of resolving a tool name for one agent.
#[derive(Debug, Clone)]
pub enum ToolLookup {
    /// Exact-name entry, available.
    Exact(ToolEntry),
    /// Exact-name entry exists but is marked unavailable.
    Unavailable(ToolEntry),
    /// No exact entry; the available wildcard handles it.
    Wildcard(ToolEntry),
    /// Nothing local handles this name.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    agent_id: Option<String>,
    name: String,
}

/// Mapping of tool name to handler, optionally scoped per agent.
///
/// Cloning is cheap; mutation after a clone copies the table so runs that
/// already hold a registry keep seeing the tools they started with.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    entries: Arc<HashMap<EntryKey, ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a global, available tool that requests follow-up.
    pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
        self.register_entry(ToolEntry::new(Arc::new(tool)))
    }

    /// Register an entry, replacing one with the same name and scope.
    pub fn register_entry(&mut self, entry: ToolEntry) -> &mut Self {
        let key = EntryKey {
            agent_id: entry.agent_id.clone(),
            name: entry.name().to_string(),
        };
        Arc::make_mut(&mut self.entries).insert(key, entry);
        self
    }

    /// Chaining form of [`register_entry`](Self::register_entry).
    pub fn with_entry(mut self, entry: ToolEntry) -> Self {
        self.register_entry(entry);
        self
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Remove an entry. Returns whether it existed.
    pub fn unregister(&mut self, name: &str, agent_id: Option<&str>) -> bool {
        let key = EntryKey {
            agent_id: agent_id.map(str::to_string),
            name: name.to_string(),
        };
        if !self.entries.contains_key(&key) {
            return false;
        }
        Arc::make_mut(&mut self.entries).remove(&key).is_some()
    }

    /// Flip the availability flag of an existing entry.
    pub fn set_available(&mut self, name: &str, agent_id: Option<&str>, available: bool) -> bool {
        let key = EntryKey {
            agent_id: agent_id.map(str::to_string),
            name: name.to_string(),
        };
        if !self.entries.contains_key(&key) {
            return false;
        }
        match Arc::make_mut(&mut self.entries).get_mut(&key) {
            Some(entry) => {
                entry.available = available;
                true
            }
            None => false,
        }
    }

    /// Exact-name entry visible to `agent_id`, agent-scoped first.
    pub fn get(&self, name: &str, agent_id: Option<&str>) -> Option<&ToolEntry> {
        let scoped = agent_id.and_then(|agent| {
            self.entries.get(&EntryKey {
                agent_id: Some(agent.to_string()),
                name: name.to_string(),
            })
        });
        scoped.or_else(|| {
            self.entries.get(&EntryKey {
                agent_id: None,
                name: name.to_string(),
            })
        })
    }

    /// Resolve the handler for a call named `name`.
    ///
    /// An exact entry always beats the wildcard, even when it is
    /// unavailable.
    pub fn resolve(&self, name: &str, agent_id: Option<&str>) -> ToolLookup {
        if name != WILDCARD_TOOL_NAME {
            if let Some(entry) = self.get(name, agent_id) {
                return if entry.available {
                    ToolLookup::Exact(entry.clone())
                } else {
                    ToolLookup::Unavailable(entry.clone())
                };
            }
        }
        match self.get(WILDCARD_TOOL_NAME, agent_id) {
            Some(entry) if entry.available => ToolLookup::Wildcard(entry.clone()),
            _ => ToolLookup::NotFound,
        }
    }

    /// Definitions advertised to the backend for `agent_id`.
    ///
    /// Unavailable entries and the wildcard are not advertised. Sorted by
    /// name so backends see a stable list.
    pub fn definitions(&self, agent_id: Option<&str>) -> Vec<ToolDefinition> {
        let mut names: Vec<&str> = self
            .entries
            .keys()
            .filter(|key| key.agent_id.is_none() || key.agent_id.as_deref() == agent_id)
            .map(|key| key.name.as_str())
            .filter(|name| *name != WILDCARD_TOOL_NAME)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .filter_map(|name| self.get(name, agent_id))
            .filter(|entry| entry.available)
            .map(ToolEntry::definition)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AgentTool, AgentToolParameters};
    use pretty_assertions::assert_eq;

    fn named(name: &str) -> AgentTool {
        let label = name.to_string();
        AgentTool::new(name, "test tool", AgentToolParameters::empty(), move |_, _| {
            let label = label.clone();
            async move { Ok(serde_json::json!(label)) }
        })
    }

    #[test]
    fn exact_name_beats_wildcard_even_when_unavailable() {
        let registry = ToolRegistry::new()
            .with_tool(named("*"))
            .with_entry(ToolEntry::new(Arc::new(named("search"))).with_available(false));

        assert!(matches!(
            registry.resolve("search", None),
            ToolLookup::Unavailable(entry) if entry.name() == "search"
        ));
        assert!(matches!(
            registry.resolve("other", None),
            ToolLookup::Wildcard(_)
        ));
    }

    #[test]
    fn unavailable_wildcard_forwards() {
        let registry = ToolRegistry::new()
            .with_entry(ToolEntry::new(Arc::new(named("*"))).with_available(false));
        assert!(matches!(
            registry.resolve("anything", None),
            ToolLookup::NotFound
        ));
    }

    #[test]
    fn agent_scoped_entries_win_and_are_invisible_to_other_agents() {
        let registry = ToolRegistry::new()
            .with_tool(named("lookup"))
            .with_entry(
                ToolEntry::new(Arc::new(named("lookup")))
                    .with_follow_up(false)
                    .for_agent("planner"),
            )
            .with_entry(ToolEntry::new(Arc::new(named("private"))).for_agent("planner"));

        let planner = registry.get("lookup", Some("planner")).unwrap();
        assert_eq!(planner.agent_id(), Some("planner"));
        assert!(!planner.follow_up());

        let other = registry.get("lookup", Some("writer")).unwrap();
        assert_eq!(other.agent_id(), None);
        assert!(registry.get("private", Some("writer")).is_none());
        assert!(matches!(
            registry.resolve("private", Some("writer")),
            ToolLookup::NotFound
        ));
    }

    #[test]
    fn definitions_skip_wildcard_and_unavailable() {
        let registry = ToolRegistry::new()
            .with_tool(named("*"))
            .with_tool(named("b"))
            .with_tool(named("a"))
            .with_entry(ToolEntry::new(Arc::new(named("hidden"))).with_available(false));
        let names: Vec<String> = registry
            .definitions(None)
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn clones_are_isolated_from_later_registration() {
        let mut registry = ToolRegistry::new().with_tool(named("a"));
        let snapshot = registry.clone();
        registry.register(named("b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.set_available("a", None, false));
        assert!(snapshot.get("a", None).unwrap().is_available());
    }
}
