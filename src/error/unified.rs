//! Unified error classification and run error codes.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Machine-readable code carried by a `RunError` event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorCode {
    /// The transport ended without a terminal event and without a stop request.
    IncompleteStream,
    /// The transport failed before any event was received.
    TransportError,
    /// A backend stream went quiet for longer than the configured idle window.
    StreamIdleTimeout,
}

impl RunErrorCode {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Broad error category, one per failure class of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Duplicate or unknown ids in the event stream.
    ProtocolViolation,
    /// Malformed JSON in a sealed tool call's argument buffer.
    ToolArgumentParse,
    /// A local handler failed.
    ToolHandler,
    /// The thread guard rejected a write.
    StaleWrite,
    /// The stream ended without a terminal event.
    IncompleteStream,
    /// The caller stopped the run.
    UserStopped,
    Transport,
    Timeout,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    IncreaseTimeout,
    CheckConfiguration,
    CheckToolImplementation,
    CheckBackendProtocol,
    /// Nothing to do: the condition is expected and already contained.
    Ignore,
}
