//! Normalized agent-run protocol events.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use super::message::{Message, Role};
use crate::error::RunErrorCode;

/// One unit of the agent-run protocol stream.
///
/// Serialized with a `type` tag (`"TEXT_MESSAGE_CONTENT"`, ...) and camelCase
/// field names so logs round-trip with AG-UI style consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, IntoStaticStr)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    // -- Run lifecycle --
    RunStarted {
        thread_id: String,
        run_id: String,
    },
    RunFinished {
        thread_id: String,
        run_id: String,
    },
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    // -- Text messages --
    TextMessageStart {
        message_id: String,
        role: Role,
    },
    TextMessageContent {
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        message_id: String,
    },

    // -- Tool calls --
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        tool_call_id: String,
    },
    ToolCallResult {
        message_id: String,
        tool_call_id: String,
        content: String,
    },

    // -- State --
    MessagesSnapshot {
        messages: Vec<Message>,
    },
}

impl Event {
    pub fn run_started(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunStarted {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_finished(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunFinished {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_error(message: impl Into<String>, code: Option<RunErrorCode>) -> Self {
        Self::RunError {
            message: message.into(),
            code: code.map(|code| code.as_str().to_string()),
        }
    }

    pub fn text_message_start(message_id: impl Into<String>, role: Role) -> Self {
        Self::TextMessageStart {
            message_id: message_id.into(),
            role,
        }
    }

    pub fn text_message_content(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    pub fn text_message_end(message_id: impl Into<String>) -> Self {
        Self::TextMessageEnd {
            message_id: message_id.into(),
        }
    }

    pub fn tool_call_start(
        tool_call_id: impl Into<String>,
        tool_call_name: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_call_name: tool_call_name.into(),
            parent_message_id,
        }
    }

    pub fn tool_call_args(tool_call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ToolCallArgs {
            tool_call_id: tool_call_id.into(),
            delta: delta.into(),
        }
    }

    pub fn tool_call_end(tool_call_id: impl Into<String>) -> Self {
        Self::ToolCallEnd {
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn tool_call_result(
        message_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::ToolCallResult {
            message_id: message_id.into(),
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// Wire name of the event type, e.g. `"TOOL_CALL_END"`.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Whether this event ends a run (`RunFinished` or `RunError`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    /// Message id referenced by a text-message event.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::TextMessageStart { message_id, .. }
            | Self::TextMessageContent { message_id, .. }
            | Self::TextMessageEnd { message_id } => Some(message_id),
            _ => None,
        }
    }

    /// Tool call id referenced by a tool-call event.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallStart { tool_call_id, .. }
            | Self::ToolCallArgs { tool_call_id, .. }
            | Self::ToolCallEnd { tool_call_id }
            | Self::ToolCallResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_protocol_tag_and_camel_case_fields() {
        let event = Event::tool_call_start("t1", "search", Some("m1".to_string()));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "TOOL_CALL_START");
        assert_eq!(value["toolCallId"], "t1");
        assert_eq!(value["toolCallName"], "search");
        assert_eq!(value["parentMessageId"], "m1");
    }

    #[test]
    fn parses_run_error_without_code() {
        let event: Event =
            serde_json::from_str(r#"{"type":"RUN_ERROR","message":"boom"}"#).unwrap();
        assert_eq!(
            event,
            Event::RunError {
                message: "boom".to_string(),
                code: None
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn name_matches_wire_tag() {
        assert_eq!(Event::text_message_end("m1").name(), "TEXT_MESSAGE_END");
        assert_eq!(
            Event::run_error("x", Some(RunErrorCode::IncompleteStream)),
            Event::RunError {
                message: "x".to_string(),
                code: Some("INCOMPLETE_STREAM".to_string())
            }
        );
    }
}
