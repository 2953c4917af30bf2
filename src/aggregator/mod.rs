//! Incremental reconstruction of messages and tool calls from event deltas.
//!
//! [`ChunkAggregator::apply`] is called once per event in arrival order.
//! It keeps partial entities keyed by id and hands back each one as soon as
//! its `*End` event seals it, without buffering the rest of the stream.
//! Malformed input is recorded as a [`ProtocolViolation`] and skipped; the
//! aggregator never halts on a single bad event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Event, Message, Role, ToolCall, ToolCallStatus};

/// Entity kind a violation refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Message,
    ToolCall,
}

/// A malformed event observed in the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolViolation {
    /// `*Start` reused an id that is still open.
    DuplicateStart { entity: EntityKind, id: String },
    /// A delta or end referenced an id that is not open.
    UnknownId {
        entity: EntityKind,
        id: String,
        event: String,
    },
    /// A second entity of the same kind started while another was open.
    InterleavedStart {
        entity: EntityKind,
        id: String,
        open_id: String,
    },
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateStart { entity, id } => {
                write!(f, "duplicate start for open {entity:?} '{id}'")
            }
            Self::UnknownId { entity, id, event } => {
                write!(f, "{event} references unknown {entity:?} '{id}'")
            }
            Self::InterleavedStart {
                entity,
                id,
                open_id,
            } => write!(f, "{entity:?} '{id}' started while '{open_id}' is still open"),
        }
    }
}

impl From<ProtocolViolation> for crate::error::RunwireError {
    fn from(violation: ProtocolViolation) -> Self {
        Self::ProtocolViolation(violation.to_string())
    }
}

/// What applying one event produced.
#[derive(Debug, Clone)]
pub enum AggregatorEffect {
    /// State updated (or nothing to do); no entity completed.
    Applied,
    /// Run lifecycle event passed through.
    Lifecycle,
    MessageSealed(Message),
    ToolCallSealed(ToolCall),
    /// The backend delivered a result for a tool call.
    ToolResultObserved(Message),
    Snapshot(Vec<Message>),
    /// The event was dropped.
    Violation(ProtocolViolation),
}

#[derive(Debug)]
struct PartialMessage {
    role: Role,
    content: String,
}

/// Stateful reducer over one run's event stream.
#[derive(Debug, Default)]
pub struct ChunkAggregator {
    open_messages: HashMap<String, PartialMessage>,
    open_tool_calls: HashMap<String, ToolCall>,
    /// Tool calls sealed in this run, by id, for result bookkeeping.
    sealed_tool_calls: HashMap<String, ToolCall>,
    violations: Vec<ProtocolViolation>,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &Event) -> AggregatorEffect {
        match event {
            Event::RunStarted { .. } | Event::RunFinished { .. } | Event::RunError { .. } => {
                AggregatorEffect::Lifecycle
            }
            Event::TextMessageStart { message_id, role } => {
                if self.open_messages.contains_key(message_id) {
                    return self.violation(ProtocolViolation::DuplicateStart {
                        entity: EntityKind::Message,
                        id: message_id.clone(),
                    });
                }
                let interleaved = self.open_messages.keys().next().cloned();
                self.open_messages.insert(
                    message_id.clone(),
                    PartialMessage {
                        role: *role,
                        content: String::new(),
                    },
                );
                match interleaved {
                    Some(open_id) => self.violation(ProtocolViolation::InterleavedStart {
                        entity: EntityKind::Message,
                        id: message_id.clone(),
                        open_id,
                    }),
                    None => AggregatorEffect::Applied,
                }
            }
            Event::TextMessageContent { message_id, delta } => {
                match self.open_messages.get_mut(message_id) {
                    Some(partial) => {
                        partial.content.push_str(delta);
                        AggregatorEffect::Applied
                    }
                    None => self.unknown(EntityKind::Message, message_id, event),
                }
            }
            Event::TextMessageEnd { message_id } => match self.open_messages.remove(message_id) {
                Some(partial) => AggregatorEffect::MessageSealed(Message::new(
                    message_id.clone(),
                    partial.role,
                    partial.content,
                )),
                None => self.unknown(EntityKind::Message, message_id, event),
            },
            Event::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => {
                if self.open_tool_calls.contains_key(tool_call_id) {
                    return self.violation(ProtocolViolation::DuplicateStart {
                        entity: EntityKind::ToolCall,
                        id: tool_call_id.clone(),
                    });
                }
                let interleaved = self.open_tool_calls.keys().next().cloned();
                self.open_tool_calls.insert(
                    tool_call_id.clone(),
                    ToolCall::new(
                        tool_call_id.clone(),
                        tool_call_name.clone(),
                        parent_message_id.clone(),
                    ),
                );
                match interleaved {
                    Some(open_id) => self.violation(ProtocolViolation::InterleavedStart {
                        entity: EntityKind::ToolCall,
                        id: tool_call_id.clone(),
                        open_id,
                    }),
                    None => AggregatorEffect::Applied,
                }
            }
            Event::ToolCallArgs {
                tool_call_id,
                delta,
            } => match self.open_tool_calls.get_mut(tool_call_id) {
                Some(call) => {
                    call.push_delta(delta);
                    AggregatorEffect::Applied
                }
                None => self.unknown(EntityKind::ToolCall, tool_call_id, event),
            },
            Event::ToolCallEnd { tool_call_id } => {
                match self.open_tool_calls.remove(tool_call_id) {
                    Some(mut call) => {
                        call.seal();
                        self.sealed_tool_calls
                            .insert(tool_call_id.clone(), call.clone());
                        AggregatorEffect::ToolCallSealed(call)
                    }
                    None => self.unknown(EntityKind::ToolCall, tool_call_id, event),
                }
            }
            Event::ToolCallResult {
                message_id,
                tool_call_id,
                content,
            } => {
                if let Some(call) = self.sealed_tool_calls.get_mut(tool_call_id) {
                    call.mark_result_produced();
                } else if let Some(call) = self.open_tool_calls.get_mut(tool_call_id) {
                    call.mark_result_produced();
                }
                AggregatorEffect::ToolResultObserved(Message::tool_result(
                    message_id.clone(),
                    tool_call_id.clone(),
                    content.clone(),
                ))
            }
            Event::MessagesSnapshot { messages } => AggregatorEffect::Snapshot(messages.clone()),
        }
    }

    /// Status of a tool call seen in this run, open or sealed.
    pub fn tool_call_status(&self, tool_call_id: &str) -> Option<ToolCallStatus> {
        self.open_tool_calls
            .get(tool_call_id)
            .or_else(|| self.sealed_tool_calls.get(tool_call_id))
            .map(ToolCall::status)
    }

    pub fn open_message_ids(&self) -> impl Iterator<Item = &str> {
        self.open_messages.keys().map(String::as_str)
    }

    pub fn open_tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.open_tool_calls.keys().map(String::as_str)
    }

    /// Violations recorded so far, in arrival order.
    pub fn violations(&self) -> &[ProtocolViolation] {
        &self.violations
    }

    fn unknown(&mut self, entity: EntityKind, id: &str, event: &Event) -> AggregatorEffect {
        self.violation(ProtocolViolation::UnknownId {
            entity,
            id: id.to_string(),
            event: event.name().to_string(),
        })
    }

    fn violation(&mut self, violation: ProtocolViolation) -> AggregatorEffect {
        tracing::warn!(%violation, "protocol violation in event stream");
        self.violations.push(violation.clone());
        AggregatorEffect::Violation(violation)
    }
}
