//! Convenience re-exports for common use.

pub use crate::agent_loop::{AgentBackend, RunLoop, RunRequest, RunResult, RunStatus};
pub use crate::config::{DispatchMode, RunConfig};
pub use crate::error::{Result, RunwireError};
pub use crate::guard::{ConversationThread, ThreadToken};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments, ToolRegistry};
pub use crate::types::{Event, Message, Role};
