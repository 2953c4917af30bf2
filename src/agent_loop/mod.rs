//! Run loop primitives (backends, runs, diagnostics).

pub mod backend;
pub mod diagnostics;
pub mod runner;
pub mod types;

pub use backend::{AgentBackend, EventStream, ReplayBackend, ReplayTurn, RunInput};
pub use diagnostics::{Diagnostic, DiagnosticSink};
pub use runner::{EventSink, RunLoop, RunRequest};
pub use types::*;
