//! Post-hoc repair of a run's event log.
//!
//! Whatever way a run ended, the finalized log has an end event for every
//! started message and tool call and exactly one terminal event, the last
//! one. When the original log had no terminal event, every tool call left
//! without a result also gets a synthetic, structured one.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::error::RunErrorCode;
use crate::types::Event;

pub const DEFAULT_STOPPED_MESSAGE: &str = "Run stopped by user";
pub const DEFAULT_INCOMPLETE_MESSAGE: &str = "Run ended without emitting a terminal event";

/// How the run ended, as far as the caller knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeOptions {
    /// The run was cancelled on purpose.
    pub stop_requested: bool,
    /// Replaces the default text of synthetic results and the terminal error.
    pub interruption_message: Option<String>,
}

impl FinalizeOptions {
    pub fn stopped() -> Self {
        Self {
            stop_requested: true,
            interruption_message: None,
        }
    }

    pub fn with_interruption_message(mut self, message: impl Into<String>) -> Self {
        self.interruption_message = Some(message.into());
        self
    }

    fn message(&self) -> &str {
        match (&self.interruption_message, self.stop_requested) {
            (Some(message), _) => message,
            (None, true) => DEFAULT_STOPPED_MESSAGE,
            (None, false) => DEFAULT_INCOMPLETE_MESSAGE,
        }
    }
}

#[derive(Serialize)]
struct SyntheticResult<'a> {
    status: &'static str,
    reason: &'static str,
    message: &'a str,
}

#[derive(Default)]
struct LogScan<'a> {
    open_messages: Vec<&'a str>,
    tool_calls: Vec<&'a str>,
    ended_tool_calls: HashSet<&'a str>,
    resolved_tool_calls: HashSet<&'a str>,
    run_ids: Option<(&'a str, &'a str)>,
    terminal_at: Option<usize>,
}

impl<'a> LogScan<'a> {
    fn new(events: &'a [Event]) -> Self {
        let mut scan = Self::default();
        for (position, event) in events.iter().enumerate() {
            match event {
                Event::RunStarted { thread_id, run_id } => {
                    scan.run_ids.get_or_insert((thread_id.as_str(), run_id.as_str()));
                }
                Event::RunFinished { .. } | Event::RunError { .. } => {
                    // Anything after the first terminal event is not part of the run.
                    scan.terminal_at = Some(position);
                    break;
                }
                Event::TextMessageStart { message_id, .. } => {
                    if !scan.open_messages.contains(&message_id.as_str()) {
                        scan.open_messages.push(message_id);
                    }
                }
                Event::TextMessageEnd { message_id } => {
                    scan.open_messages.retain(|open| *open != message_id.as_str());
                }
                Event::ToolCallStart { tool_call_id, .. } => {
                    if !scan.tool_calls.contains(&tool_call_id.as_str()) {
                        scan.tool_calls.push(tool_call_id);
                    }
                }
                Event::ToolCallEnd { tool_call_id } => {
                    scan.ended_tool_calls.insert(tool_call_id);
                }
                Event::ToolCallResult { tool_call_id, .. } => {
                    scan.resolved_tool_calls.insert(tool_call_id);
                }
                Event::TextMessageContent { .. }
                | Event::ToolCallArgs { .. }
                | Event::MessagesSnapshot { .. } => {}
            }
        }
        scan
    }
}

/// Events that must be added to close out `events`, in emission order.
///
/// When the log already holds a terminal event the returned events belong
/// just before it; otherwise they are appended and end with a synthetic
/// terminal event.
pub fn closing_events(events: &[Event], options: &FinalizeOptions) -> Vec<Event> {
    let scan = LogScan::new(events);
    let mut closing: Vec<Event> = scan
        .open_messages
        .iter()
        .map(|id| Event::text_message_end(*id))
        .collect();
    closing.extend(
        scan.tool_calls
            .iter()
            .filter(|id| !scan.ended_tool_calls.contains(*id))
            .map(|id| Event::tool_call_end(*id)),
    );
    if scan.terminal_at.is_some() {
        return closing;
    }

    let message = options.message();
    let payload = if options.stop_requested {
        SyntheticResult {
            status: "stopped",
            reason: "stop_requested",
            message,
        }
    } else {
        SyntheticResult {
            status: "error",
            reason: "missing_terminal_event",
            message,
        }
    };
    let content = serde_json::to_string(&payload).unwrap_or_default();
    closing.extend(
        scan.tool_calls
            .iter()
            .filter(|id| !scan.resolved_tool_calls.contains(*id))
            .map(|id| Event::tool_call_result(Uuid::new_v4().to_string(), *id, content.clone())),
    );

    closing.push(if options.stop_requested {
        let (thread_id, run_id) = scan.run_ids.unwrap_or_default();
        Event::run_finished(thread_id, run_id)
    } else {
        Event::run_error(message, Some(RunErrorCode::IncompleteStream))
    });
    closing
}

/// Repair a run's event log so every structural invariant holds.
///
/// Events after the first terminal event are discarded.
pub fn finalize_run_events(events: &[Event], options: &FinalizeOptions) -> Vec<Event> {
    let closing = closing_events(events, options);
    let terminal_at = events.iter().position(Event::is_terminal);
    let mut finalized = Vec::with_capacity(events.len() + closing.len());
    match terminal_at {
        Some(position) => {
            finalized.extend_from_slice(&events[..position]);
            finalized.extend(closing);
            finalized.push(events[position].clone());
        }
        None => {
            finalized.extend_from_slice(events);
            finalized.extend(closing);
        }
    }
    finalized
}
