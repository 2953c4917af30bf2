//! Human-in-the-loop tool responses.
//!
//! An [`InteractiveTool`] parks its call until someone outside the run
//! answers it through [`PendingResponses::respond`], or until the run is
//! stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::AgentToolParameters;
use crate::error::RunwireError;

/// Outstanding tool calls waiting for an external answer.
#[derive(Debug, Clone, Default)]
pub struct PendingResponses {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>,
    registered: Arc<Notify>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `tool_call_id` and return the receiving half.
    ///
    /// Registering the same id again replaces the earlier waiter, which then
    /// observes a closed channel.
    pub fn register(&self, tool_call_id: impl Into<String>) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        let tool_call_id = tool_call_id.into();
        tracing::debug!(tool_call_id = %tool_call_id, "awaiting external tool response");
        self.lock().insert(tool_call_id, tx);
        self.registered.notify_waiters();
        rx
    }

    /// Resolve a parked call with `value`.
    pub fn respond(
        &self,
        tool_call_id: &str,
        value: serde_json::Value,
    ) -> Result<(), RunwireError> {
        let sender = self.lock().remove(tool_call_id).ok_or_else(|| {
            RunwireError::InvalidState(format!("no pending response for tool call '{tool_call_id}'"))
        })?;
        sender.send(value).map_err(|_| {
            RunwireError::InvalidState(format!("tool call '{tool_call_id}' is no longer waiting"))
        })
    }

    /// Drop a parked call without answering it.
    pub fn cancel(&self, tool_call_id: &str) -> bool {
        self.lock().remove(tool_call_id).is_some()
    }

    pub fn is_pending(&self, tool_call_id: &str) -> bool {
        self.lock().contains_key(tool_call_id)
    }

    /// Ids currently waiting, sorted.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until `tool_call_id` is parked.
    pub async fn wait_for(&self, tool_call_id: &str) {
        loop {
            let notified = self.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_pending(tool_call_id) {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<serde_json::Value>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A tool whose result is supplied from outside the run.
pub struct InteractiveTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    pending: PendingResponses,
}

impl InteractiveTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        pending: PendingResponses,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            pending,
        }
    }

    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }
}

#[async_trait]
impl Tool for InteractiveTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        _args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, RunwireError> {
        let receiver = self.pending.register(ctx.tool_call_id.clone());
        tokio::select! {
            answer = receiver => answer.map_err(|_| RunwireError::Canceled),
            _ = ctx.cancel.cancelled() => {
                self.pending.cancel(&ctx.tool_call_id);
                Err(RunwireError::Canceled)
            }
        }
    }
}

impl std::fmt::Debug for InteractiveTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveTool")
            .field("name", &self.name)
            .finish()
    }
}
