//! The run loop: drive a backend stream, dispatch local tools, follow up,
//! finalize.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregator::{AggregatorEffect, ChunkAggregator, ProtocolViolation};
use crate::config::{DispatchMode, RunConfig};
use crate::dispatch::{CommitOutcome, DispatchOutcome, PreparedCall, ToolCompletion, ToolDispatcher};
use crate::error::{RunErrorCode, RunwireError};
use crate::finalizer::{finalize_run_events, FinalizeOptions};
use crate::guard::{ConversationThread, ThreadToken};
use crate::stream_transform::{EventStreamTransform, IdleTimeoutTransform};
use crate::tools::ToolRegistry;
use crate::types::{Event, Message, Role, ToolCall, ToolCallRef};

use super::backend::{AgentBackend, RunInput};
use super::diagnostics::{Diagnostic, DiagnosticEmitter, DiagnosticSink};
use super::types::{new_run_id, RunContext, RunResult, RunStatus};

/// Callback receiving every event as it is logged.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Request payload to start a run.
#[derive(Clone)]
pub struct RunRequest {
    pub agent_id: String,
    pub thread: ConversationThread,
    pub token: ThreadToken,
    pub input_messages: Vec<Message>,
    pub registry: ToolRegistry,
    pub cancel: CancellationToken,
    pub event_sink: Option<EventSink>,
    pub diagnostics: Option<DiagnosticSink>,
}

impl RunRequest {
    /// Run against the thread's current state and messages.
    pub fn new(
        agent_id: impl Into<String>,
        thread: ConversationThread,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            token: thread.snapshot(),
            input_messages: thread.messages(),
            thread,
            registry,
            cancel: CancellationToken::new(),
            event_sink: None,
            diagnostics: None,
        }
    }

    pub fn with_token(mut self, token: ThreadToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_input_messages(mut self, messages: Vec<Message>) -> Self {
        self.input_messages = messages;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }
}

/// Drives agent runs against one backend.
pub struct RunLoop<B> {
    backend: B,
    config: RunConfig,
}

impl<B: AgentBackend> RunLoop<B> {
    pub fn new(backend: B, config: RunConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one user turn. Safe to call again with a fresh token after the
    /// previous token was invalidated.
    pub async fn run_agent(
        &self,
        agent_id: &str,
        thread: &ConversationThread,
        token: ThreadToken,
        input_messages: Vec<Message>,
        registry: &ToolRegistry,
    ) -> RunResult {
        let request = RunRequest::new(agent_id, thread.clone(), registry.clone())
            .with_token(token)
            .with_input_messages(input_messages);
        self.run(request).await
    }

    /// Run until the backend stops and no follow-up is due.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let RunRequest {
            agent_id,
            thread,
            token,
            mut input_messages,
            registry,
            cancel,
            event_sink,
            diagnostics,
        } = request;
        let cancel = cancel.child_token();
        let mut state = RunState {
            dispatcher: ToolDispatcher::new(registry),
            diagnostics: DiagnosticEmitter::new(diagnostics),
            event_sink,
            log: Vec::new(),
            run_ids: Vec::new(),
            new_messages: Vec::new(),
            stale_writes_dropped: 0,
            violations: Vec::new(),
        };

        let mut follow_ups = 0usize;
        loop {
            let ctx = RunContext {
                run_id: new_run_id(),
                agent_id: agent_id.clone(),
                thread: thread.clone(),
                token: token.clone(),
                input_messages: input_messages.clone(),
                cancel: cancel.clone(),
            };
            let outcome = self.run_segment(&mut state, &ctx).await;

            if !outcome.follow_up_requested {
                break;
            }
            let blocked_by = if outcome.ended_in_error {
                Some("sub-run ended in error")
            } else if cancel.is_cancelled() {
                Some("run stopped")
            } else if !ctx.is_thread_valid() {
                Some("thread replaced")
            } else if follow_ups >= self.config.max_follow_ups {
                Some("follow-up limit reached")
            } else {
                None
            };
            if let Some(reason) = blocked_by {
                tracing::debug!(run_id = %ctx.run_id, reason, "skipping follow-up");
                break;
            }
            follow_ups += 1;
            input_messages.extend(outcome.committed);
            tracing::debug!(run_id = %ctx.run_id, follow_ups, "starting follow-up sub-run");
        }

        state.into_result(cancel.is_cancelled())
    }

    async fn run_segment(&self, state: &mut RunState, ctx: &RunContext) -> SegmentOutcome {
        let thread_id = ctx.thread.id();
        tracing::debug!(run_id = %ctx.run_id, thread_id = %thread_id, agent_id = %ctx.agent_id, "sub-run start");

        let mut segment = Segment::new(thread_id.clone());
        segment.record(state, Event::run_started(&thread_id, &ctx.run_id));

        let input = RunInput {
            thread_id,
            run_id: ctx.run_id.clone(),
            agent_id: ctx.agent_id.clone(),
            messages: ctx.input_messages.clone(),
            tools: state.dispatcher.registry().definitions(Some(ctx.agent_id.as_str())),
        };
        let started = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = self.backend.run(input) => Some(result),
        };

        match started {
            None => {}
            Some(Err(err)) => segment.fail_early(state, ctx, &err),
            Some(Ok(stream)) => {
                let mut stream = match self.config.stream_idle_timeout_ms {
                    Some(ms) => IdleTimeoutTransform::new(Duration::from_millis(ms)).transform(stream),
                    None => stream,
                };
                let mut scheduler = Scheduler::new(self.config.dispatch_mode);
                let mut stream_open = true;
                let mut stopped = false;
                let mut received_any = false;

                loop {
                    if !stream_open && scheduler.is_idle() {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled(), if !stopped => {
                            stopped = true;
                            stream_open = false;
                            let abandoned = scheduler.abandon_queued();
                            tracing::debug!(run_id = %ctx.run_id, abandoned, "run stopped");
                        }
                        Some(completion) = scheduler.in_flight.next(), if !scheduler.in_flight.is_empty() => {
                            segment.on_completion(state, ctx, completion);
                            // A handler may have cancelled the run just now.
                            if !ctx.cancel.is_cancelled() {
                                scheduler.start_next();
                            }
                        }
                        item = stream.next(), if stream_open => match item {
                            None => stream_open = false,
                            Some(Err(err)) => {
                                stream_open = false;
                                if received_any {
                                    tracing::warn!(run_id = %ctx.run_id, error = %err, "backend stream interrupted");
                                    segment.interruption = Some(err.to_string());
                                } else {
                                    segment.fail_early(state, ctx, &err);
                                }
                            }
                            Some(Ok(event)) => {
                                received_any = true;
                                if event.is_terminal() {
                                    stream_open = false;
                                }
                                segment.on_event(state, ctx, &mut scheduler, event);
                            }
                        },
                    }
                }
            }
        }

        self.finish_segment(state, ctx, segment)
    }

    fn finish_segment(
        &self,
        state: &mut RunState,
        ctx: &RunContext,
        segment: Segment,
    ) -> SegmentOutcome {
        let stop_requested = ctx.cancel.is_cancelled();
        let emitted = segment.events.len();
        let mut raw = segment.events;
        // A stopped run ends the way the finalizer says, not the backend.
        if !stop_requested {
            raw.extend(segment.held_terminal);
        }
        let options = FinalizeOptions {
            stop_requested,
            interruption_message: segment
                .interruption
                .or_else(|| self.config.interruption_message.clone()),
        };
        let finalized = finalize_run_events(&raw, &options);

        let synthesized = finalized.len() - raw.len();
        if synthesized > 0 {
            state.diagnostics.emit(Diagnostic::EventsSynthesized {
                run_id: ctx.run_id.clone(),
                event_types: finalized[emitted..emitted + synthesized]
                    .iter()
                    .map(|event| event.name().to_string())
                    .collect(),
            });
        }
        if let Some(sink) = &state.event_sink {
            for event in &finalized[emitted..] {
                sink(event.clone());
            }
        }

        let ended_in_error = matches!(finalized.last(), Some(Event::RunError { .. }));
        tracing::debug!(
            run_id = %ctx.run_id,
            stop_requested,
            synthesized,
            ended_in_error,
            "sub-run end"
        );
        state.log.extend(finalized);
        state.run_ids.push(ctx.run_id.clone());
        state.violations.extend(segment.aggregator.violations().iter().cloned());

        SegmentOutcome {
            committed: segment.committed,
            follow_up_requested: segment.follow_up_requested,
            ended_in_error,
        }
    }
}

/// State that spans every sub-run of one run.
struct RunState {
    dispatcher: ToolDispatcher,
    diagnostics: DiagnosticEmitter,
    event_sink: Option<EventSink>,
    log: Vec<Event>,
    run_ids: Vec<String>,
    new_messages: Vec<Message>,
    stale_writes_dropped: usize,
    violations: Vec<ProtocolViolation>,
}

impl RunState {
    fn stale_write(&mut self, ctx: &RunContext, tool_call_id: Option<&str>) {
        self.stale_writes_dropped += 1;
        tracing::warn!(
            run_id = %ctx.run_id,
            tool_call_id = tool_call_id.unwrap_or_default(),
            "write rejected: thread was replaced"
        );
        self.diagnostics.emit(Diagnostic::StaleWriteDropped {
            run_id: ctx.run_id.clone(),
            tool_call_id: tool_call_id.map(str::to_string),
        });
    }

    fn into_result(self, stop_requested: bool) -> RunResult {
        let (status, error) = match self.log.last() {
            Some(Event::RunFinished { .. }) if stop_requested => (RunStatus::Canceled, None),
            Some(Event::RunFinished { .. }) => (RunStatus::Completed, None),
            Some(Event::RunError { message, .. }) => (RunStatus::Failed, Some(message.clone())),
            _ => (RunStatus::Failed, Some(RunwireError::IncompleteStream.to_string())),
        };
        RunResult {
            status,
            error,
            sub_runs: self.run_ids.len(),
            run_ids: self.run_ids,
            new_messages: self.new_messages,
            final_events: self.log,
            stale_writes_dropped: self.stale_writes_dropped,
            violations: self.violations,
            finished_at: Utc::now(),
        }
    }
}

struct SegmentOutcome {
    committed: Vec<Message>,
    follow_up_requested: bool,
    ended_in_error: bool,
}

/// One sub-run: `RunStarted` through its terminal event.
struct Segment {
    thread_id: String,
    events: Vec<Event>,
    aggregator: ChunkAggregator,
    /// Messages this sub-run wrote into the thread.
    committed: Vec<Message>,
    follow_up_requested: bool,
    /// Backend terminal event, released once local handlers drain.
    held_terminal: Option<Event>,
    interruption: Option<String>,
    /// Tool-call refs whose parent message is still streaming.
    pending_refs: HashMap<String, Vec<ToolCallRef>>,
    /// Synthetic parent for tool calls that name none.
    orphan_parent: Option<String>,
}

impl Segment {
    fn new(thread_id: String) -> Self {
        Self {
            thread_id,
            events: Vec::new(),
            aggregator: ChunkAggregator::new(),
            committed: Vec::new(),
            follow_up_requested: false,
            held_terminal: None,
            interruption: None,
            pending_refs: HashMap::new(),
            orphan_parent: None,
        }
    }

    fn record(&mut self, state: &RunState, event: Event) {
        if let Some(sink) = &state.event_sink {
            sink(event.clone());
        }
        self.events.push(event);
    }

    fn fail_early(&mut self, state: &mut RunState, ctx: &RunContext, err: &RunwireError) {
        let code = match err {
            RunwireError::Timeout(_) => RunErrorCode::StreamIdleTimeout,
            _ => RunErrorCode::TransportError,
        };
        tracing::warn!(run_id = %ctx.run_id, error = %err, "backend failed before any event");
        self.record(state, Event::run_error(err.to_string(), Some(code)));
    }

    fn on_event(
        &mut self,
        state: &mut RunState,
        ctx: &RunContext,
        scheduler: &mut Scheduler,
        event: Event,
    ) {
        if let Event::RunStarted { run_id, .. } = &event {
            tracing::debug!(run_id = %ctx.run_id, backend_run_id = %run_id, "absorbing backend RunStarted");
            return;
        }
        if event.is_terminal() {
            if self.held_terminal.is_none() {
                // Terminal events carry this sub-run's ids, not the backend's.
                self.held_terminal = Some(match event {
                    Event::RunFinished { .. } => Event::run_finished(&self.thread_id, &ctx.run_id),
                    other => other,
                });
            }
            return;
        }

        let effect = self.aggregator.apply(&event);
        self.record(state, event);
        match effect {
            AggregatorEffect::Violation(violation) => {
                state.diagnostics.emit(Diagnostic::ProtocolViolation {
                    run_id: ctx.run_id.clone(),
                    violation,
                });
            }
            AggregatorEffect::MessageSealed(mut message) => {
                if let Some(refs) = self.pending_refs.remove(&message.id) {
                    for reference in refs {
                        if message.tool_call(&reference.id).is_none() {
                            message.tool_calls.push(reference);
                        }
                    }
                }
                self.orphan_parent = None;
                self.commit_message(state, ctx, message, None);
            }
            AggregatorEffect::ToolCallSealed(call) => {
                self.attach_tool_call(state, ctx, &call);
                match state.dispatcher.on_tool_call_sealed(&call, ctx) {
                    DispatchOutcome::Execute(prepared) => scheduler.submit(prepared),
                    DispatchOutcome::Forward => {
                        state.diagnostics.emit(Diagnostic::ToolCallForwarded {
                            run_id: ctx.run_id.clone(),
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                        });
                    }
                    DispatchOutcome::Suppressed(reason) => {
                        state.diagnostics.emit(Diagnostic::ToolCallSuppressed {
                            run_id: ctx.run_id.clone(),
                            tool_call_id: call.id.clone(),
                            reason,
                        });
                    }
                }
            }
            AggregatorEffect::ToolResultObserved(message) => {
                let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
                if !state.dispatcher.mark_resolved(&tool_call_id) {
                    tracing::debug!(run_id = %ctx.run_id, tool_call_id = %tool_call_id, "ignoring duplicate tool result");
                    return;
                }
                if scheduler.discard(&tool_call_id) {
                    tracing::debug!(run_id = %ctx.run_id, tool_call_id = %tool_call_id, "backend resolved queued tool call");
                }
                self.commit_message(state, ctx, message, Some(tool_call_id.as_str()));
            }
            AggregatorEffect::Snapshot(_)
            | AggregatorEffect::Applied
            | AggregatorEffect::Lifecycle => {}
        }
    }

    fn on_completion(&mut self, state: &mut RunState, ctx: &RunContext, completion: ToolCompletion) {
        if let (true, Some(content)) = (completion.is_error(), completion.content()) {
            state.diagnostics.emit(Diagnostic::ToolCallFailed {
                run_id: ctx.run_id.clone(),
                tool_call_id: completion.tool_call_id.clone(),
                content: content.to_string(),
            });
        }
        let tool_call_id = completion.tool_call_id.clone();
        match state.dispatcher.commit_completion(completion, ctx) {
            CommitOutcome::Written {
                event,
                message,
                follow_up,
            } => {
                self.record(state, event);
                state.new_messages.push(message.clone());
                self.committed.push(message);
                self.follow_up_requested |= follow_up;
            }
            CommitOutcome::StaleDropped => state.stale_write(ctx, Some(tool_call_id.as_str())),
            CommitOutcome::AlreadyResolved => {}
            CommitOutcome::Canceled => {
                tracing::debug!(run_id = %ctx.run_id, tool_call_id = %tool_call_id, "tool handler canceled; stopping run");
                ctx.cancel.cancel();
            }
        }
    }

    fn commit_message(
        &mut self,
        state: &mut RunState,
        ctx: &RunContext,
        message: Message,
        tool_call_id: Option<&str>,
    ) {
        match ctx.thread.append(&ctx.token, message.clone()) {
            Ok(()) => {
                state.new_messages.push(message.clone());
                self.committed.push(message);
            }
            Err(_) => state.stale_write(ctx, tool_call_id),
        }
    }

    /// Record the call on its parent assistant message.
    fn attach_tool_call(&mut self, state: &mut RunState, ctx: &RunContext, call: &ToolCall) {
        let reference = call.to_ref();
        let parent_id = match call.parent_message_id.clone().or_else(|| self.orphan_parent.clone()) {
            Some(parent_id) => parent_id,
            None => {
                let parent_id = Uuid::new_v4().to_string();
                self.orphan_parent = Some(parent_id.clone());
                parent_id
            }
        };

        if self.aggregator.open_message_ids().any(|id| id == parent_id) {
            self.pending_refs.entry(parent_id).or_default().push(reference);
            return;
        }

        match ctx.thread.attach_tool_call(&ctx.token, &parent_id, reference.clone()) {
            Ok(true) => {
                attach_local(&mut state.new_messages, &parent_id, &reference);
                attach_local(&mut self.committed, &parent_id, &reference);
            }
            Ok(false) => {
                let mut parent = Message::new(parent_id, Role::Assistant, "");
                parent.tool_calls.push(reference);
                self.commit_message(state, ctx, parent, Some(call.id.as_str()));
            }
            Err(_) => state.stale_write(ctx, Some(call.id.as_str())),
        }
    }
}

fn attach_local(messages: &mut [Message], parent_id: &str, reference: &ToolCallRef) {
    if let Some(parent) = messages.iter_mut().rev().find(|message| message.id == parent_id) {
        if parent.tool_call(&reference.id).is_none() {
            parent.tool_calls.push(reference.clone());
        }
    }
}

/// Local handlers in flight, plus calls waiting their turn.
struct Scheduler {
    mode: DispatchMode,
    in_flight: FuturesUnordered<BoxFuture<'static, ToolCompletion>>,
    queued: VecDeque<PreparedCall>,
}

impl Scheduler {
    fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            in_flight: FuturesUnordered::new(),
            queued: VecDeque::new(),
        }
    }

    fn submit(&mut self, call: PreparedCall) {
        match self.mode {
            DispatchMode::Sequential if !self.in_flight.is_empty() => self.queued.push_back(call),
            _ => self.in_flight.push(call.execute().boxed()),
        }
    }

    fn start_next(&mut self) {
        if self.in_flight.is_empty() {
            if let Some(call) = self.queued.pop_front() {
                self.in_flight.push(call.execute().boxed());
            }
        }
    }

    /// Drop a queued call that no longer needs to run.
    fn discard(&mut self, tool_call_id: &str) -> bool {
        let before = self.queued.len();
        self.queued.retain(|call| call.tool_call_id() != tool_call_id);
        before != self.queued.len()
    }

    fn abandon_queued(&mut self) -> usize {
        let abandoned = self.queued.len();
        self.queued.clear();
        abandoned
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.queued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::backend::{ReplayBackend, ReplayTurn};
    use crate::tools::{AgentTool, AgentToolParameters};
    use pretty_assertions::assert_eq;

    fn greet() -> AgentTool {
        AgentTool::new("greet", "say hi", AgentToolParameters::empty(), |args, _| async move {
            Ok(serde_json::json!(format!("hi {}", args.get_str_opt("name").unwrap_or("you"))))
        })
    }

    fn tool_turn(id: &str, name: &str, args: &str) -> Vec<Event> {
        vec![
            Event::run_started("backend-thread", "backend-run"),
            Event::text_message_start("m-".to_string() + id, Role::Assistant),
            Event::text_message_end("m-".to_string() + id),
            Event::tool_call_start(id, name, Some("m-".to_string() + id)),
            Event::tool_call_args(id, args),
            Event::tool_call_end(id),
            Event::run_finished("backend-thread", "backend-run"),
        ]
    }

    #[tokio::test]
    async fn local_result_precedes_held_terminal() {
        let backend = ReplayBackend::from_events([tool_turn("t1", "greet", r#"{"name":"Ada"}"#)]);
        let run_loop = RunLoop::new(
            backend,
            RunConfig::builder().max_follow_ups(0).build(),
        );
        let thread = ConversationThread::new("th");
        let registry = ToolRegistry::new().with_tool(greet());
        let result = run_loop
            .run_agent("agent", &thread, thread.snapshot(), Vec::new(), &registry)
            .await;

        assert_eq!(result.status, RunStatus::Completed);
        let names: Vec<&str> = result.final_events.iter().map(Event::name).collect();
        assert_eq!(
            names,
            vec![
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_END",
                "TOOL_CALL_START",
                "TOOL_CALL_ARGS",
                "TOOL_CALL_END",
                "TOOL_CALL_RESULT",
                "RUN_FINISHED",
            ]
        );
        let messages = thread.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_calls.len(), 1);
        assert_eq!(messages[1].content, "hi Ada");
        assert_eq!(result.new_messages, messages);
    }

    #[tokio::test]
    async fn loop_run_id_replaces_backend_run_id() {
        let backend = ReplayBackend::from_events([vec![
            Event::run_started("other", "backend-run"),
            Event::run_finished("other", "backend-run"),
        ]]);
        let run_loop = RunLoop::new(backend, RunConfig::default());
        let thread = ConversationThread::new("th");
        let result = run_loop
            .run(RunRequest::new("agent", thread, ToolRegistry::new()))
            .await;
        assert_eq!(result.final_events.len(), 2);
        assert_eq!(
            result.final_events[0],
            Event::run_started("th", result.run_ids[0].clone())
        );
    }

    #[tokio::test]
    async fn refused_stream_is_a_transport_error() {
        let backend = ReplayBackend::new([ReplayTurn::Refuse("connection refused".to_string())]);
        let run_loop = RunLoop::new(backend, RunConfig::default());
        let thread = ConversationThread::new("th");
        let result = run_loop
            .run(RunRequest::new("agent", thread, ToolRegistry::new()))
            .await;
        assert_eq!(result.status, RunStatus::Failed);
        match result.final_events.last() {
            Some(Event::RunError { code, .. }) => {
                assert_eq!(code.as_deref(), Some("TRANSPORT_ERROR"))
            }
            other => panic!("expected run error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequential_mode_queues_second_call() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = order.clone();
        let tool = AgentTool::new("log", "log", AgentToolParameters::empty(), move |args, _| {
            let seen = seen.clone();
            async move {
                let n = args.get_i64("n")?;
                seen.lock().unwrap().push(n);
                Ok(serde_json::Value::Null)
            }
        });
        let backend = ReplayBackend::from_events([vec![
            Event::tool_call_start("a", "log", None),
            Event::tool_call_args("a", r#"{"n":1}"#),
            Event::tool_call_end("a"),
            Event::tool_call_start("b", "log", None),
            Event::tool_call_args("b", r#"{"n":2}"#),
            Event::tool_call_end("b"),
            Event::run_finished("x", "y"),
        ]]);
        let run_loop = RunLoop::new(backend, RunConfig::builder().max_follow_ups(0).build());
        let thread = ConversationThread::new("th");
        let result = run_loop
            .run(RunRequest::new(
                "agent",
                thread.clone(),
                ToolRegistry::new().with_tool(tool),
            ))
            .await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        let results = result
            .final_events
            .iter()
            .filter(|event| matches!(event, Event::ToolCallResult { content, .. } if content.is_empty()))
            .count();
        assert_eq!(results, 2);
        // Both parentless calls hang off one synthetic assistant message.
        assert_eq!(thread.messages()[0].tool_calls.len(), 2);
    }
}
