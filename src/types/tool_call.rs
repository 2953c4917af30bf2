//! Tool calls under reconstruction from the event stream.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::message::ToolCallRef;
use crate::error::RunwireError;

/// Lifecycle of a tool call within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Starting,
    Streaming,
    Ended,
    ResultProduced,
}

/// A tool call whose arguments arrive as string deltas.
///
/// The argument buffer is only parsed once the call has ended, and the
/// parse outcome is cached so repeated access is free.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parent_message_id: Option<String>,
    arguments_buffer: String,
    status: ToolCallStatus,
    parsed: OnceLock<Result<serde_json::Value, String>>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_message_id,
            arguments_buffer: String::new(),
            status: ToolCallStatus::Starting,
            parsed: OnceLock::new(),
        }
    }

    pub fn status(&self) -> ToolCallStatus {
        self.status
    }

    pub fn arguments_buffer(&self) -> &str {
        &self.arguments_buffer
    }

    pub fn is_sealed(&self) -> bool {
        matches!(
            self.status,
            ToolCallStatus::Ended | ToolCallStatus::ResultProduced
        )
    }

    pub(crate) fn push_delta(&mut self, delta: &str) {
        self.arguments_buffer.push_str(delta);
        if self.status == ToolCallStatus::Starting {
            self.status = ToolCallStatus::Streaming;
        }
    }

    pub(crate) fn seal(&mut self) {
        if !self.is_sealed() {
            self.status = ToolCallStatus::Ended;
        }
    }

    pub(crate) fn mark_result_produced(&mut self) {
        self.status = ToolCallStatus::ResultProduced;
    }

    /// Parsed arguments. Empty buffers parse as `{}`.
    pub fn arguments(&self) -> Result<&serde_json::Value, RunwireError> {
        if !self.is_sealed() {
            return Err(RunwireError::InvalidState(format!(
                "tool call '{}' arguments are still streaming",
                self.id
            )));
        }
        let parsed = self.parsed.get_or_init(|| {
            let trimmed = self.arguments_buffer.trim();
            if trimmed.is_empty() {
                return Ok(serde_json::json!({}));
            }
            serde_json::from_str(trimmed).map_err(|e| e.to_string())
        });
        parsed
            .as_ref()
            .map_err(|message| RunwireError::ToolArgumentParse {
                tool_call_id: self.id.clone(),
                message: message.clone(),
            })
    }

    /// Reference form attached to the parent assistant message.
    pub fn to_ref(&self) -> ToolCallRef {
        ToolCallRef {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments_buffer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_buffers_are_not_parsed_before_end() {
        let mut call = ToolCall::new("t1", "search", None);
        call.push_delta("{\"q\":");
        assert_eq!(call.status(), ToolCallStatus::Streaming);
        assert!(matches!(
            call.arguments(),
            Err(RunwireError::InvalidState(_))
        ));

        call.push_delta("\"x\"}");
        call.seal();
        assert_eq!(call.arguments().unwrap()["q"], "x");
    }

    #[test]
    fn empty_buffer_parses_as_empty_object() {
        let mut call = ToolCall::new("t1", "noop", None);
        call.seal();
        assert_eq!(call.arguments().unwrap(), &serde_json::json!({}));
    }

    #[test]
    fn malformed_buffer_reports_parse_error_every_time() {
        let mut call = ToolCall::new("t1", "search", None);
        call.push_delta("{\"q\":");
        call.seal();
        for _ in 0..2 {
            match call.arguments() {
                Err(RunwireError::ToolArgumentParse { tool_call_id, .. }) => {
                    assert_eq!(tool_call_id, "t1")
                }
                other => panic!("expected parse error, got {other:?}"),
            }
        }
    }
}
