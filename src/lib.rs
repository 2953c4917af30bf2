//! Runwire: agent run event-stream orchestrator.
//!
//! Consumes the normalized event stream an agent backend produces,
//! rebuilds messages and tool calls from their deltas, runs locally
//! registered tools, and hands back a terminated, structurally valid
//! event log however the run ended.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use runwire::prelude::*;
//! use runwire::agent_loop::ReplayBackend;
//!
//! # async fn example() -> runwire::error::Result<()> {
//! let backend = Arc::new(ReplayBackend::from_events([vec![
//!     Event::text_message_start("m1", Role::Assistant),
//!     Event::text_message_content("m1", "hello"),
//!     Event::text_message_end("m1"),
//!     Event::run_finished("thread-1", "run-1"),
//! ]]));
//! let run_loop = RunLoop::new(backend, RunConfig::default());
//! let thread = ConversationThread::new("thread-1");
//! let token = thread.snapshot();
//! let result = run_loop
//!     .run_agent("assistant", &thread, token, thread.messages(), &ToolRegistry::new())
//!     .await;
//! assert!(result.final_events.last().is_some_and(Event::is_terminal));
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod finalizer;
pub mod guard;
pub mod prelude;
pub mod stream_transform;
pub mod tools;
pub mod types;

#[cfg(feature = "runner")]
pub mod runner;

#[cfg(feature = "cli")]
pub mod cli;
