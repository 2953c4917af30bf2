//! In-memory thread runner.
//!
//! Owns one [`ConversationThread`] per thread id, allows a single active run
//! per thread, keeps a compacted history of finished runs and lets late
//! subscribers [`connect`](InMemoryRunner::connect) to replay history plus the
//! live tail of the active run.

pub mod compaction;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;

use crate::agent_loop::{AgentBackend, DiagnosticSink, RunLoop, RunRequest, RunResult};
use crate::error::RunwireError;
use crate::guard::ConversationThread;
use crate::tools::ToolRegistry;
use crate::types::{Event, Message};

pub use compaction::compact_events;

const LIVE_CHANNEL_CAPACITY: usize = 1024;

/// A finished run as stored for replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricRun {
    pub thread_id: String,
    /// First sub-run id of the run.
    pub run_id: String,
    /// Run id of the previous run on the same thread.
    pub parent_run_id: Option<String>,
    /// Finalized, compacted events.
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`InMemoryRunner::run`].
#[derive(Clone)]
pub struct ThreadRunRequest {
    pub thread_id: String,
    pub agent_id: String,
    /// Appended to the thread before the run starts.
    pub messages: Vec<Message>,
    pub registry: ToolRegistry,
    pub diagnostics: Option<DiagnosticSink>,
}

impl ThreadRunRequest {
    pub fn new(
        thread_id: impl Into<String>,
        agent_id: impl Into<String>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            agent_id: agent_id.into(),
            messages: Vec::new(),
            registry,
            diagnostics: None,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }
}

/// Handle to a spawned run.
pub struct RunHandle {
    thread_id: String,
    cancel: CancellationToken,
    events: Option<UnboundedReceiverStream<Event>>,
    result_rx: oneshot::Receiver<RunResult>,
}

impl RunHandle {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Events of this run as they are logged. Can be taken once.
    pub fn take_events(&mut self) -> Option<UnboundedReceiverStream<Event>> {
        self.events.take()
    }

    /// Request a stop. Returns `false` if already requested.
    pub fn abort(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub async fn wait(self) -> Result<RunResult, RunwireError> {
        self.result_rx
            .await
            .map_err(|_| RunwireError::InvalidState("run task ended without a result".into()))
    }
}

/// Events logged so far by the active run, plus the live fan-out.
///
/// Both sit behind one lock so a subscriber sees every event exactly once.
struct LiveRun {
    events: Vec<Event>,
    live: broadcast::Sender<Event>,
}

struct ActiveRun {
    cancel: CancellationToken,
    stop_requested: bool,
    live: Arc<Mutex<LiveRun>>,
}

struct ThreadStore {
    thread: ConversationThread,
    historic_runs: Vec<HistoricRun>,
    active: Option<ActiveRun>,
}

impl ThreadStore {
    fn new(thread_id: &str) -> Self {
        Self {
            thread: ConversationThread::new(thread_id),
            historic_runs: Vec::new(),
            active: None,
        }
    }
}

/// Runs agents against per-thread in-memory state.
pub struct InMemoryRunner<B> {
    run_loop: Arc<RunLoop<B>>,
    stores: Arc<Mutex<HashMap<String, ThreadStore>>>,
}

impl<B> Clone for InMemoryRunner<B> {
    fn clone(&self) -> Self {
        Self {
            run_loop: self.run_loop.clone(),
            stores: self.stores.clone(),
        }
    }
}

impl<B: AgentBackend + 'static> InMemoryRunner<B> {
    pub fn new(run_loop: RunLoop<B>) -> Self {
        Self {
            run_loop: Arc::new(run_loop),
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run on `request.thread_id`.
    ///
    /// Fails with [`RunwireError::ThreadBusy`] while another run on the same
    /// thread is active.
    pub fn run(&self, request: ThreadRunRequest) -> Result<RunHandle, RunwireError> {
        let ThreadRunRequest {
            thread_id,
            agent_id,
            messages,
            registry,
            diagnostics,
        } = request;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (live_tx, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        let live = Arc::new(Mutex::new(LiveRun {
            events: Vec::new(),
            live: live_tx,
        }));
        let cancel = CancellationToken::new();

        let thread = {
            let mut stores = self.lock();
            let store = stores
                .entry(thread_id.clone())
                .or_insert_with(|| ThreadStore::new(&thread_id));
            if store.active.is_some() {
                return Err(RunwireError::ThreadBusy(thread_id));
            }
            let token = store.thread.snapshot();
            for message in messages {
                store.thread.append(&token, message)?;
            }
            store.active = Some(ActiveRun {
                cancel: cancel.clone(),
                stop_requested: false,
                live: live.clone(),
            });
            store.thread.clone()
        };

        let sink_live = live;
        let mut run_request = RunRequest::new(agent_id, thread, registry)
            .with_cancellation(cancel.clone())
            .with_event_sink(Arc::new(move |event: Event| {
                let _ = events_tx.send(event.clone());
                let mut live = lock(&sink_live);
                // No subscribers is fine.
                let _ = live.live.send(event.clone());
                live.events.push(event);
            }));
        if let Some(sink) = diagnostics {
            run_request = run_request.with_diagnostics(sink);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let run_loop = self.run_loop.clone();
        let stores = self.stores.clone();
        let task_thread_id = thread_id.clone();
        tokio::spawn(async move {
            tracing::debug!(thread_id = %task_thread_id, "runner: run start");
            let result = run_loop.run(run_request).await;
            {
                let mut stores = stores.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(store) = stores.get_mut(&task_thread_id) {
                    store.active = None;
                    if !result.final_events.is_empty() {
                        let parent_run_id = store.historic_runs.last().map(|run| run.run_id.clone());
                        store.historic_runs.push(HistoricRun {
                            thread_id: task_thread_id.clone(),
                            run_id: result.run_ids.first().cloned().unwrap_or_default(),
                            parent_run_id,
                            events: compact_events(&result.final_events),
                            created_at: Utc::now(),
                        });
                    }
                }
            }
            tracing::debug!(thread_id = %task_thread_id, status = ?result.status, "runner: run end");
            let _ = result_tx.send(result);
        });

        Ok(RunHandle {
            thread_id,
            cancel,
            events: Some(UnboundedReceiverStream::new(events_rx)),
            result_rx,
        })
    }

    /// Replay the thread's history, then follow the active run if any.
    ///
    /// Events of the active run whose message id was already replayed are
    /// skipped. The stream ends when the active run ends, or right after the
    /// history when nothing is running.
    pub fn connect(&self, thread_id: &str) -> BoxStream<'static, Event> {
        let stores = self.lock();
        let Some(store) = stores.get(thread_id) else {
            return stream::empty().boxed();
        };

        let all: Vec<Event> = store
            .historic_runs
            .iter()
            .flat_map(|run| run.events.iter().cloned())
            .collect();
        let history = compact_events(&all);
        let seen: HashSet<String> = history
            .iter()
            .filter_map(replayed_message_id)
            .map(str::to_string)
            .collect();
        let history = stream::iter(history);

        let Some(active) = &store.active else {
            return history.boxed();
        };
        let (current, receiver) = {
            let live = lock(&active.live);
            (live.events.clone(), live.live.subscribe())
        };
        let unseen = move |event: &Event| {
            replayed_message_id(event).map_or(true, |id| !seen.contains(id))
        };
        let current: Vec<Event> = current.into_iter().filter(|event| unseen(event)).collect();
        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            let event = match item {
                Ok(event) if unseen(&event) => Some(event),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(error = %err, "connect: subscriber lagged");
                    None
                }
            };
            futures::future::ready(event)
        });
        history.chain(stream::iter(current)).chain(live).boxed()
    }

    /// Whether a run is active and not stopping.
    pub fn is_running(&self, thread_id: &str) -> bool {
        self.lock()
            .get(thread_id)
            .and_then(|store| store.active.as_ref())
            .is_some_and(|active| !active.stop_requested)
    }

    /// Request a stop of the active run.
    ///
    /// Returns `false` when nothing runs or a stop was already requested.
    pub fn stop(&self, thread_id: &str) -> bool {
        let mut stores = self.lock();
        let Some(active) = stores.get_mut(thread_id).and_then(|store| store.active.as_mut()) else {
            return false;
        };
        if active.stop_requested {
            return false;
        }
        active.stop_requested = true;
        active.cancel.cancel();
        tracing::debug!(thread_id, "runner: stop requested");
        true
    }

    /// Clear the thread's messages and history.
    ///
    /// An active run keeps streaming, but its writes are rejected from here on.
    pub fn reset_thread(&self, thread_id: &str) -> bool {
        let mut stores = self.lock();
        let Some(store) = stores.get_mut(thread_id) else {
            return false;
        };
        store.thread.clear();
        store.historic_runs.clear();
        true
    }

    pub fn thread(&self, thread_id: &str) -> Option<ConversationThread> {
        self.lock().get(thread_id).map(|store| store.thread.clone())
    }

    pub fn historic_runs(&self, thread_id: &str) -> Vec<HistoricRun> {
        self.lock()
            .get(thread_id)
            .map(|store| store.historic_runs.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ThreadStore>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(live: &Mutex<LiveRun>) -> MutexGuard<'_, LiveRun> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

fn replayed_message_id(event: &Event) -> Option<&str> {
    match event {
        Event::ToolCallResult { message_id, .. } => Some(message_id),
        other => other.message_id(),
    }
}
