//! Thread identity guard.
//!
//! A [`ConversationThread`] is the slot a caller (e.g. a UI) keeps its
//! active message list in. Every replace, clear or switch allocates a fresh
//! generation, so a [`ThreadToken`] taken before that point stops validating
//! immediately. Runs snapshot a token at start and present it on every
//! write; writes carrying a stale token are rejected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::RunwireError;
use crate::types::{Message, ToolCallRef};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn fresh_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Opaque identity of a thread's state at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadToken {
    generation: u64,
}

impl ThreadToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct ThreadState {
    id: String,
    messages: Vec<Message>,
}

/// Shared, cheaply clonable handle to a conversation slot.
#[derive(Debug, Clone)]
pub struct ConversationThread {
    generation: Arc<AtomicU64>,
    state: Arc<Mutex<ThreadState>>,
}

impl ConversationThread {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_messages(id, Vec::new())
    }

    pub fn with_messages(id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(fresh_generation())),
            state: Arc::new(Mutex::new(ThreadState {
                id: id.into(),
                messages,
            })),
        }
    }

    /// Identity token for the thread's current state.
    pub fn snapshot(&self) -> ThreadToken {
        ThreadToken {
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// O(1) check that nothing replaced the thread since `token` was taken.
    pub fn is_valid(&self, token: &ThreadToken) -> bool {
        self.generation.load(Ordering::Acquire) == token.generation
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the message list. Invalidates every outstanding token.
    pub fn replace_messages(&self, messages: Vec<Message>) -> ThreadToken {
        let mut state = self.lock();
        state.messages = messages;
        self.bump()
    }

    /// Clear the message list. Invalidates every outstanding token.
    pub fn clear(&self) -> ThreadToken {
        self.replace_messages(Vec::new())
    }

    /// Point the slot at a different thread. Invalidates every outstanding token.
    pub fn switch_to(&self, id: impl Into<String>, messages: Vec<Message>) -> ThreadToken {
        let mut state = self.lock();
        state.id = id.into();
        state.messages = messages;
        self.bump()
    }

    /// Append a message if `token` is still valid.
    pub fn append(&self, token: &ThreadToken, message: Message) -> Result<(), RunwireError> {
        let mut state = self.lock();
        self.check(token, &state)?;
        state.messages.push(message);
        Ok(())
    }

    /// Attach a tool call to its parent assistant message.
    ///
    /// Returns `false` when no message with `parent_id` exists.
    pub fn attach_tool_call(
        &self,
        token: &ThreadToken,
        parent_id: &str,
        call: ToolCallRef,
    ) -> Result<bool, RunwireError> {
        let mut state = self.lock();
        self.check(token, &state)?;
        let Some(parent) = state
            .messages
            .iter_mut()
            .rev()
            .find(|message| message.id == parent_id)
        else {
            return Ok(false);
        };
        if parent.tool_call(&call.id).is_none() {
            parent.tool_calls.push(call);
        }
        Ok(true)
    }

    fn check(&self, token: &ThreadToken, state: &ThreadState) -> Result<(), RunwireError> {
        if self.is_valid(token) {
            Ok(())
        } else {
            Err(RunwireError::StaleWrite {
                thread_id: state.id.clone(),
            })
        }
    }

    // Callers hold the state lock so a concurrent append cannot observe the
    // new messages under the old generation.
    fn bump(&self) -> ThreadToken {
        let generation = fresh_generation();
        self.generation.store(generation, Ordering::Release);
        ThreadToken { generation }
    }

    fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn token_is_valid_until_replace() {
        let thread = ConversationThread::new("t");
        let token = thread.snapshot();
        assert!(thread.is_valid(&token));
        thread
            .append(&token, Message::user("hi"))
            .expect("append with fresh token");

        let fresh = thread.clear();
        assert!(!thread.is_valid(&token));
        assert!(thread.is_valid(&fresh));
        assert!(thread.append(&token, Message::user("late")).is_err());
        assert!(thread.is_empty());
    }

    #[test]
    fn equal_content_does_not_revalidate_token() {
        let messages = vec![Message::new("m1", Role::User, "same")];
        let thread = ConversationThread::with_messages("t", messages.clone());
        let token = thread.snapshot();
        thread.replace_messages(messages.clone());
        assert_eq!(thread.messages(), messages);
        assert!(!thread.is_valid(&token));
    }

    #[test]
    fn tokens_from_different_threads_never_collide() {
        let a = ConversationThread::new("a");
        let b = ConversationThread::new("b");
        assert!(!b.is_valid(&a.snapshot()));
    }

    #[test]
    fn switch_changes_id_and_invalidates() {
        let thread = ConversationThread::new("a");
        let token = thread.snapshot();
        thread.switch_to("b", Vec::new());
        assert_eq!(thread.id(), "b");
        assert!(matches!(
            thread.append(&token, Message::user("x")),
            Err(RunwireError::StaleWrite { thread_id }) if thread_id == "b"
        ));
    }

    #[test]
    fn attach_tool_call_is_idempotent_per_call_id() {
        let thread = ConversationThread::new("t");
        let token = thread.snapshot();
        thread
            .append(&token, Message::new("m1", Role::Assistant, ""))
            .unwrap();
        let call = ToolCallRef {
            id: "c1".to_string(),
            name: "search".to_string(),
            arguments: "{}".to_string(),
        };
        assert!(thread.attach_tool_call(&token, "m1", call.clone()).unwrap());
        assert!(thread.attach_tool_call(&token, "m1", call).unwrap());
        assert_eq!(thread.messages()[0].tool_calls.len(), 1);
        assert!(!thread
            .attach_tool_call(
                &token,
                "missing",
                ToolCallRef {
                    id: "c2".to_string(),
                    name: "x".to_string(),
                    arguments: String::new(),
                }
            )
            .unwrap());
    }
}
