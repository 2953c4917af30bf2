//! Error types for Runwire.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion, RunErrorCode};

use thiserror::Error;

/// Primary error type for all Runwire operations.
#[derive(Error, Debug)]
pub enum RunwireError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid tool arguments for '{tool_call_id}': {message}")]
    ToolArgumentParse {
        tool_call_id: String,
        message: String,
    },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolHandler { tool_name: String, message: String },

    #[error("Stale write dropped for thread '{thread_id}'")]
    StaleWrite { thread_id: String },

    #[error("Stream ended without a terminal event")]
    IncompleteStream,

    #[error("Canceled")]
    Canceled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Thread already running: {0}")]
    ThreadBusy(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunwireError {
    /// Create a handler error for the named tool.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolHandler {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProtocolViolation(_) => ErrorCategory::ProtocolViolation,
            Self::ToolArgumentParse { .. } | Self::InvalidArgument(_) => {
                ErrorCategory::ToolArgumentParse
            }
            Self::ToolHandler { .. } => ErrorCategory::ToolHandler,
            Self::StaleWrite { .. } => ErrorCategory::StaleWrite,
            Self::IncompleteStream => ErrorCategory::IncompleteStream,
            Self::Canceled => ErrorCategory::UserStopped,
            Self::Transport(_) | Self::Io(_) => ErrorCategory::Transport,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ThreadBusy(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the handler or transport failure is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Timeout
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Transport => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolHandler | ErrorCategory::ToolArgumentParse => {
                RecoverySuggestion::CheckToolImplementation
            }
            ErrorCategory::ProtocolViolation | ErrorCategory::IncompleteStream => {
                RecoverySuggestion::CheckBackendProtocol
            }
            _ => RecoverySuggestion::Ignore,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RunwireError>;
