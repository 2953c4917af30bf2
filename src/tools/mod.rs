//! Locally executed tools and their registry.

pub mod arguments;
pub mod pending;
pub mod registry;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use pending::{InteractiveTool, PendingResponses};
pub use registry::{ToolEntry, ToolLookup, ToolRegistry, WILDCARD_TOOL_NAME};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{AgentToolParameters, ParameterBuilder, ToolDefinition};
