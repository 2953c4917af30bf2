//! Core run types for the run loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregator::ProtocolViolation;
use crate::guard::{ConversationThread, ThreadToken};
use crate::types::{Event, Message};

/// Allocate a fresh run id.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

/// Per-run state shared with the dispatcher.
///
/// The token is taken once at run start and is the only authority for
/// whether writes into `thread` are still allowed.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub agent_id: String,
    pub thread: ConversationThread,
    pub token: ThreadToken,
    pub input_messages: Vec<Message>,
    /// Cancelled when the run is stopped.
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        agent_id: impl Into<String>,
        thread: ConversationThread,
        token: ThreadToken,
        input_messages: Vec<Message>,
    ) -> Self {
        Self {
            run_id: new_run_id(),
            agent_id: agent_id.into(),
            thread,
            token,
            input_messages,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether the owning thread is still the one this run started on.
    pub fn is_thread_valid(&self) -> bool {
        self.thread.is_valid(&self.token)
    }
}

/// Result of a run, including every follow-up sub-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Run ids of each sub-run, in order.
    pub run_ids: Vec<String>,
    /// Messages committed to the thread by this run.
    pub new_messages: Vec<Message>,
    /// Finalized sub-run logs, concatenated in order. Each sub-run ends in
    /// its own terminal event, so a run with follow-ups holds more than one;
    /// use [`RunResult::sub_run_events`] to read them one at a time.
    pub final_events: Vec<Event>,
    pub sub_runs: usize,
    /// Writes rejected because the thread was replaced mid-run.
    pub stale_writes_dropped: usize,
    pub violations: Vec<ProtocolViolation>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Events of one sub-run, from its `RunStarted` through its terminal event.
    pub fn sub_run_events(&self, index: usize) -> Option<&[Event]> {
        let starts: Vec<usize> = self
            .final_events
            .iter()
            .enumerate()
            .filter(|(_, event)| matches!(event, Event::RunStarted { .. }))
            .map(|(position, _)| position)
            .collect();
        let start = *starts.get(index)?;
        let end = starts
            .get(index + 1)
            .copied()
            .unwrap_or(self.final_events.len());
        Some(&self.final_events[start..end])
    }
}
