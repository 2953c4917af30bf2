//! Backend transport abstraction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::error::RunwireError;
use crate::tools::ToolDefinition;
use crate::types::{Event, Message};

/// Normalized event stream produced by a backend.
///
/// `None` means the transport closed cleanly, which is distinct from a
/// `RunFinished` event and from an `Err` (disconnect).
pub type EventStream = BoxStream<'static, Result<Event, RunwireError>>;

/// What a backend is asked to run.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub thread_id: String,
    pub run_id: String,
    pub agent_id: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Source of agent-run events.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start a run and return its event stream.
    async fn run(&self, input: RunInput) -> Result<EventStream, RunwireError>;
}

#[async_trait]
impl<B: AgentBackend + ?Sized> AgentBackend for Arc<B> {
    async fn run(&self, input: RunInput) -> Result<EventStream, RunwireError> {
        (**self).run(input).await
    }
}

/// One scripted backend turn.
#[derive(Debug, Clone)]
pub enum ReplayTurn {
    /// Yield these items, then close the stream.
    Events(Vec<Result<Event, String>>),
    /// Fail before producing a stream.
    Refuse(String),
}

impl ReplayTurn {
    pub fn events(events: Vec<Event>) -> Self {
        Self::Events(events.into_iter().map(Ok).collect())
    }

    /// Yield `events`, then fail the transport with `error`.
    pub fn disconnect_after(events: Vec<Event>, error: impl Into<String>) -> Self {
        let mut items: Vec<Result<Event, String>> = events.into_iter().map(Ok).collect();
        items.push(Err(error.into()));
        Self::Events(items)
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    turns: VecDeque<ReplayTurn>,
    inputs: Vec<RunInput>,
}

/// Backend that replays scripted turns in order and records every input.
///
/// Once the script is exhausted every further run yields an empty stream.
#[derive(Debug, Clone, Default)]
pub struct ReplayBackend {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayBackend {
    pub fn new(turns: impl IntoIterator<Item = ReplayTurn>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                turns: turns.into_iter().collect(),
                inputs: Vec::new(),
            })),
        }
    }

    /// Convenience for a script of plain event turns.
    pub fn from_events(turns: impl IntoIterator<Item = Vec<Event>>) -> Self {
        Self::new(turns.into_iter().map(ReplayTurn::events))
    }

    pub fn push_turn(&self, turn: ReplayTurn) {
        self.lock().turns.push_back(turn);
    }

    /// Inputs received so far, in call order.
    pub fn inputs(&self) -> Vec<RunInput> {
        self.lock().inputs.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().inputs.len()
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AgentBackend for ReplayBackend {
    async fn run(&self, input: RunInput) -> Result<EventStream, RunwireError> {
        let turn = {
            let mut state = self.lock();
            state.inputs.push(input);
            state.turns.pop_front()
        };
        match turn {
            Some(ReplayTurn::Refuse(error)) => Err(RunwireError::Transport(error)),
            Some(ReplayTurn::Events(items)) => Ok(stream::iter(
                items
                    .into_iter()
                    .map(|item| item.map_err(RunwireError::Transport)),
            )
            .boxed()),
            None => Ok(stream::empty().boxed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RunInput {
        RunInput {
            thread_id: "th".to_string(),
            run_id: "r".to_string(),
            agent_id: "a".to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replays_turns_in_order_then_empty() {
        let backend = ReplayBackend::new([
            ReplayTurn::events(vec![Event::run_started("th", "r")]),
            ReplayTurn::Refuse("down".to_string()),
        ]);
        let first: Vec<_> = backend.run(input()).await.unwrap().collect().await;
        assert_eq!(first.len(), 1);
        assert!(matches!(
            backend.run(input()).await,
            Err(RunwireError::Transport(message)) if message == "down"
        ));
        let rest: Vec<_> = backend.run(input()).await.unwrap().collect().await;
        assert!(rest.is_empty());
        assert_eq!(backend.call_count(), 3);
    }
}
