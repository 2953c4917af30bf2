//! Shared test helpers: scripted backend turns, sample tools and log checks.

#![allow(dead_code)]

use std::collections::HashSet;

use runwire::tools::{AgentTool, AgentToolParameters};
use runwire::types::{Event, Role};

/// An assistant text reply split into two deltas, closed by `RunFinished`.
pub fn text_turn(message_id: &str, text: &str) -> Vec<Event> {
    let split = text.len() / 2;
    vec![
        Event::run_started("backend-thread", "backend-run"),
        Event::text_message_start(message_id, Role::Assistant),
        Event::text_message_content(message_id, &text[..split]),
        Event::text_message_content(message_id, &text[split..]),
        Event::text_message_end(message_id),
        Event::run_finished("backend-thread", "backend-run"),
    ]
}

/// A complete tool call without a parent message.
pub fn tool_call(id: &str, name: &str, args: &str) -> Vec<Event> {
    vec![
        Event::tool_call_start(id, name, None),
        Event::tool_call_args(id, args),
        Event::tool_call_end(id),
    ]
}

/// One assistant message carrying a single tool call, closed by `RunFinished`.
pub fn tool_turn(id: &str, name: &str, args: &str) -> Vec<Event> {
    let parent = format!("msg-{id}");
    vec![
        Event::run_started("backend-thread", "backend-run"),
        Event::text_message_start(&parent, Role::Assistant),
        Event::text_message_end(&parent),
        Event::tool_call_start(id, name, Some(parent)),
        Event::tool_call_args(id, args),
        Event::tool_call_end(id),
        Event::run_finished("backend-thread", "backend-run"),
    ]
}

/// `greet({"name"})` returns `"Hello, <name>!"`.
pub fn greet_tool() -> AgentTool {
    AgentTool::new(
        "greet",
        "Greet someone",
        AgentToolParameters::object()
            .string("name", "Who to greet", true)
            .build(),
        |args, _| async move {
            let name = args.get_str("name")?;
            Ok(serde_json::json!(format!("Hello, {name}!")))
        },
    )
}

pub fn event_names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::name).collect()
}

pub fn results_for<'a>(events: &'a [Event], tool_call_id: &str) -> Vec<&'a str> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ToolCallResult {
                tool_call_id: id,
                content,
                ..
            } if id == tool_call_id => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

/// Check one finalized sub-run: every start has an end and the log ends in
/// exactly one terminal event.
pub fn assert_well_formed(events: &[Event]) {
    let mut open_messages = HashSet::new();
    let mut open_tool_calls = HashSet::new();
    for event in events {
        match event {
            Event::TextMessageStart { message_id, .. } => {
                open_messages.insert(message_id.clone());
            }
            Event::TextMessageEnd { message_id } => {
                open_messages.remove(message_id);
            }
            Event::ToolCallStart { tool_call_id, .. } => {
                open_tool_calls.insert(tool_call_id.clone());
            }
            Event::ToolCallEnd { tool_call_id } => {
                open_tool_calls.remove(tool_call_id);
            }
            _ => {}
        }
    }
    assert!(open_messages.is_empty(), "unclosed messages: {open_messages:?}");
    assert!(open_tool_calls.is_empty(), "unclosed tool calls: {open_tool_calls:?}");
    assert_eq!(
        events.iter().filter(|event| event.is_terminal()).count(),
        1,
        "expected exactly one terminal event in {:?}",
        event_names(events)
    );
    assert!(events.last().is_some_and(Event::is_terminal));
}
