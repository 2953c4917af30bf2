//! Tool dispatch: decide, execute and commit local tool calls.
//!
//! [`ToolDispatcher::on_tool_call_sealed`] runs once per sealed tool call
//! and decides whether a local handler runs. [`PreparedCall::execute`]
//! awaits the handler and coerces its result into protocol content.
//! [`ToolDispatcher::commit_completion`] writes the result into the thread,
//! re-checking the thread token first and refusing to resolve any tool
//! call twice.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use uuid::Uuid;

use crate::agent_loop::types::RunContext;
use crate::error::RunwireError;
use crate::tools::{ToolArguments, ToolEntry, ToolExecutionContext, ToolLookup, ToolRegistry};
use crate::types::{Event, Message, ToolCall, ToolCallStatus};

/// Why a sealed tool call was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SuppressReason {
    /// An exact-name tool exists but is marked unavailable.
    Unavailable,
    /// The owning thread was replaced before the call sealed.
    StaleThread,
    /// The backend already delivered a result for this call.
    AlreadyResolved,
}

/// Decision for one sealed tool call.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Run the local handler.
    Execute(PreparedCall),
    /// No local handler; the call is left for a remote consumer.
    Forward,
    Suppressed(SuppressReason),
}

/// A tool call ready to run against its handler.
#[derive(Debug)]
pub struct PreparedCall {
    entry: ToolEntry,
    arguments: Result<serde_json::Value, String>,
    context: ToolExecutionContext,
}

impl PreparedCall {
    pub fn tool_call_id(&self) -> &str {
        &self.context.tool_call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.context.tool_name
    }

    /// Whether the call resolved to the `*` entry.
    pub fn is_wildcard(&self) -> bool {
        self.entry.is_wildcard()
    }

    /// Run the handler and turn its result into protocol content.
    ///
    /// Argument parse failures short-circuit without invoking the handler.
    pub async fn execute(self) -> ToolCompletion {
        let outcome = match &self.arguments {
            Err(message) => {
                tracing::warn!(
                    tool_call_id = %self.context.tool_call_id,
                    tool = %self.context.tool_name,
                    error = %message,
                    "tool arguments failed to parse"
                );
                ToolOutcome::Failure {
                    content: format!("Error: {message}"),
                    kind: FailureKind::ArgumentParse,
                }
            }
            Ok(arguments) => {
                let args = ToolArguments::new(arguments.clone());
                match self.entry.tool().execute(&args, &self.context).await {
                    Ok(value) => ToolOutcome::Success {
                        content: result_content(value),
                    },
                    Err(err) if err.is_cancellation() => ToolOutcome::Canceled,
                    Err(err) => {
                        tracing::warn!(
                            tool_call_id = %self.context.tool_call_id,
                            tool = %self.context.tool_name,
                            error = %err,
                            "tool handler failed"
                        );
                        ToolOutcome::Failure {
                            content: format!("Error: {}", handler_error_text(&err)),
                            kind: FailureKind::Handler,
                        }
                    }
                }
            }
        };
        ToolCompletion {
            tool_call_id: self.context.tool_call_id,
            tool_name: self.context.tool_name,
            follow_up: self.entry.follow_up(),
            outcome,
        }
    }
}

/// Which stage of a local call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ArgumentParse,
    Handler,
}

/// What a local handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success { content: String },
    /// Content carries the `"Error: ..."` text written as the result.
    Failure { content: String, kind: FailureKind },
    /// The handler observed the run's cancellation.
    Canceled,
}

/// A finished local handler, not yet written.
#[derive(Debug, Clone)]
pub struct ToolCompletion {
    pub tool_call_id: String,
    pub tool_name: String,
    pub follow_up: bool,
    pub outcome: ToolOutcome,
}

impl ToolCompletion {
    /// Result content to write, or `None` when the handler was canceled.
    pub fn content(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Success { content } | ToolOutcome::Failure { content, .. } => {
                Some(content)
            }
            ToolOutcome::Canceled => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }
}

/// What happened when a completion was offered to the thread.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Written {
        event: Event,
        message: Message,
        follow_up: bool,
    },
    /// The thread was replaced; the result was discarded.
    StaleDropped,
    /// Something else already resolved this call.
    AlreadyResolved,
    /// The handler was canceled; nothing to write.
    Canceled,
}

/// Per-run dispatcher over a registry snapshot.
#[derive(Debug)]
pub struct ToolDispatcher {
    registry: ToolRegistry,
    resolved: HashSet<String>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            resolved: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Decide what to do with a tool call whose arguments just sealed.
    pub fn on_tool_call_sealed(&self, call: &ToolCall, ctx: &RunContext) -> DispatchOutcome {
        if !ctx.is_thread_valid() {
            tracing::debug!(run_id = %ctx.run_id, tool_call_id = %call.id, "thread replaced before dispatch");
            return DispatchOutcome::Suppressed(SuppressReason::StaleThread);
        }
        if call.status() == ToolCallStatus::ResultProduced || self.is_resolved(&call.id) {
            return DispatchOutcome::Suppressed(SuppressReason::AlreadyResolved);
        }

        let (entry, wildcard) = match self.registry.resolve(&call.name, Some(ctx.agent_id.as_str())) {
            ToolLookup::Exact(entry) => (entry, false),
            ToolLookup::Wildcard(entry) => (entry, true),
            ToolLookup::Unavailable(_) => {
                tracing::debug!(run_id = %ctx.run_id, tool_call_id = %call.id, tool = %call.name, "tool unavailable");
                return DispatchOutcome::Suppressed(SuppressReason::Unavailable);
            }
            ToolLookup::NotFound => {
                tracing::debug!(run_id = %ctx.run_id, tool_call_id = %call.id, tool = %call.name, "forwarding tool call");
                return DispatchOutcome::Forward;
            }
        };

        let arguments = match call.arguments() {
            Ok(parsed) if wildcard => Ok(serde_json::json!({
                "toolName": call.name,
                "args": parsed,
            })),
            Ok(parsed) => Ok(parsed.clone()),
            Err(RunwireError::ToolArgumentParse { message, .. }) => Err(message),
            Err(err) => Err(err.to_string()),
        };

        tracing::debug!(
            run_id = %ctx.run_id,
            tool_call_id = %call.id,
            tool = %call.name,
            wildcard,
            "dispatching tool call"
        );
        DispatchOutcome::Execute(PreparedCall {
            entry,
            arguments,
            context: ToolExecutionContext {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                agent_id: Some(ctx.agent_id.clone()),
                cancel: ctx.cancel.child_token(),
            },
        })
    }

    /// Record that a result for `tool_call_id` arrived from elsewhere.
    ///
    /// Returns `false` when the call was already resolved.
    pub fn mark_resolved(&mut self, tool_call_id: &str) -> bool {
        self.resolved.insert(tool_call_id.to_string())
    }

    pub fn is_resolved(&self, tool_call_id: &str) -> bool {
        self.resolved.contains(tool_call_id)
    }

    /// Write a finished handler's result into the thread.
    pub fn commit_completion(
        &mut self,
        completion: ToolCompletion,
        ctx: &RunContext,
    ) -> CommitOutcome {
        let Some(content) = completion.content() else {
            return CommitOutcome::Canceled;
        };
        if self.is_resolved(&completion.tool_call_id) {
            tracing::debug!(
                run_id = %ctx.run_id,
                tool_call_id = %completion.tool_call_id,
                "dropping duplicate tool result"
            );
            return CommitOutcome::AlreadyResolved;
        }

        let message_id = Uuid::new_v4().to_string();
        let message = Message::tool_result(&message_id, &completion.tool_call_id, content);
        if let Err(err) = ctx.thread.append(&ctx.token, message.clone()) {
            tracing::warn!(
                run_id = %ctx.run_id,
                tool_call_id = %completion.tool_call_id,
                error = %err,
                "discarding tool result for replaced thread"
            );
            return CommitOutcome::StaleDropped;
        }

        self.resolved.insert(completion.tool_call_id.clone());
        CommitOutcome::Written {
            event: Event::tool_call_result(message_id, &completion.tool_call_id, content),
            message,
            follow_up: completion.follow_up && !completion.is_error(),
        }
    }
}

/// Coerce a handler's return value into result content.
///
/// `null` becomes the empty string, strings pass through unchanged and
/// anything else is serialized as JSON.
pub fn result_content(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

fn handler_error_text(err: &RunwireError) -> String {
    match err {
        RunwireError::ToolHandler { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ConversationThread;
    use crate::tools::{AgentTool, AgentToolParameters};
    use pretty_assertions::assert_eq;

    fn sealed(id: &str, name: &str, args: &str) -> ToolCall {
        let mut call = ToolCall::new(id, name, None);
        call.push_delta(args);
        call.seal();
        call
    }

    fn context() -> RunContext {
        let thread = ConversationThread::new("thread-1");
        let token = thread.snapshot();
        RunContext::new("agent", thread, token, Vec::new())
    }

    fn echo(name: &str) -> AgentTool {
        AgentTool::new(name, "echo", AgentToolParameters::empty(), |args, _| async move {
            Ok(args.raw().clone())
        })
    }

    #[test]
    fn result_content_coercion() {
        assert_eq!(result_content(serde_json::Value::Null), "");
        assert_eq!(result_content(serde_json::json!("plain")), "plain");
        assert_eq!(result_content(serde_json::json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(result_content(serde_json::json!(42)), "42");
    }

    #[tokio::test]
    async fn wildcard_receives_tool_name_and_args() {
        let dispatcher = ToolDispatcher::new(ToolRegistry::new().with_tool(echo("*")));
        let ctx = context();
        let call = sealed("t1", "weather", r#"{"city":"Oslo"}"#);
        let DispatchOutcome::Execute(prepared) = dispatcher.on_tool_call_sealed(&call, &ctx) else {
            panic!("expected execute");
        };
        assert!(prepared.is_wildcard());
        let completion = prepared.execute().await;
        let content: serde_json::Value =
            serde_json::from_str(completion.content().unwrap()).unwrap();
        assert_eq!(
            content,
            serde_json::json!({"toolName": "weather", "args": {"city": "Oslo"}})
        );
    }

    #[tokio::test]
    async fn parse_failure_becomes_error_content_without_running_handler() {
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let tool = AgentTool::new("search", "s", AgentToolParameters::empty(), move |_, _| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            async { Ok(serde_json::Value::Null) }
        });
        let dispatcher = ToolDispatcher::new(ToolRegistry::new().with_tool(tool));
        let ctx = context();
        let call = sealed("t1", "search", "{\"q\":");
        let DispatchOutcome::Execute(prepared) = dispatcher.on_tool_call_sealed(&call, &ctx) else {
            panic!("expected execute");
        };
        let completion = prepared.execute().await;
        assert!(completion.is_error());
        assert!(completion.content().unwrap().starts_with("Error: "));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_error_is_written_as_error_text() {
        let tool = AgentTool::new("fail", "f", AgentToolParameters::empty(), |_, _| async {
            Err(RunwireError::tool("fail", "disk full"))
        });
        let mut dispatcher = ToolDispatcher::new(ToolRegistry::new().with_tool(tool));
        let ctx = context();
        let DispatchOutcome::Execute(prepared) =
            dispatcher.on_tool_call_sealed(&sealed("t1", "fail", "{}"), &ctx)
        else {
            panic!("expected execute");
        };
        let completion = prepared.execute().await;
        match dispatcher.commit_completion(completion, &ctx) {
            CommitOutcome::Written {
                event:
                    Event::ToolCallResult {
                        tool_call_id,
                        content,
                        ..
                    },
                message,
                follow_up,
            } => {
                assert_eq!(tool_call_id, "t1");
                assert_eq!(content, "Error: disk full");
                assert_eq!(message.tool_call_id.as_deref(), Some("t1"));
                assert!(!follow_up);
            }
            other => panic!("expected written result, got {other:?}"),
        }
        assert_eq!(ctx.thread.len(), 1);
    }

    #[test]
    fn unknown_tool_is_forwarded_and_unavailable_is_suppressed() {
        let registry = ToolRegistry::new().with_entry(
            ToolEntry::new(std::sync::Arc::new(echo("off"))).with_available(false),
        );
        let dispatcher = ToolDispatcher::new(registry);
        let ctx = context();
        assert!(matches!(
            dispatcher.on_tool_call_sealed(&sealed("t1", "remote", "{}"), &ctx),
            DispatchOutcome::Forward
        ));
        assert!(matches!(
            dispatcher.on_tool_call_sealed(&sealed("t2", "off", "{}"), &ctx),
            DispatchOutcome::Suppressed(SuppressReason::Unavailable)
        ));
    }

    #[tokio::test]
    async fn stale_token_drops_result() {
        let mut dispatcher = ToolDispatcher::new(ToolRegistry::new().with_tool(echo("echo")));
        let ctx = context();
        let DispatchOutcome::Execute(prepared) =
            dispatcher.on_tool_call_sealed(&sealed("t1", "echo", "{}"), &ctx)
        else {
            panic!("expected execute");
        };
        ctx.thread.clear();
        let completion = prepared.execute().await;
        assert!(matches!(
            dispatcher.commit_completion(completion, &ctx),
            CommitOutcome::StaleDropped
        ));
        assert!(ctx.thread.is_empty());
        assert!(matches!(
            dispatcher.on_tool_call_sealed(&sealed("t2", "echo", "{}"), &ctx),
            DispatchOutcome::Suppressed(SuppressReason::StaleThread)
        ));
    }

    #[tokio::test]
    async fn backend_resolution_wins_over_local_result() {
        let mut dispatcher = ToolDispatcher::new(ToolRegistry::new().with_tool(echo("echo")));
        let ctx = context();
        let DispatchOutcome::Execute(prepared) =
            dispatcher.on_tool_call_sealed(&sealed("t1", "echo", "{}"), &ctx)
        else {
            panic!("expected execute");
        };
        assert!(dispatcher.mark_resolved("t1"));
        let completion = prepared.execute().await;
        assert!(matches!(
            dispatcher.commit_completion(completion, &ctx),
            CommitOutcome::AlreadyResolved
        ));
        assert!(ctx.thread.is_empty());
    }
}
