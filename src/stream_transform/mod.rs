//! Transformations layered over backend event streams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::agent_loop::backend::{AgentBackend, EventStream, RunInput};
use crate::error::RunwireError;
use crate::types::Event;

/// Trait for transforming a backend event stream.
pub trait EventStreamTransform: Send + Sync {
    /// Transform the stream.
    fn transform(&self, stream: EventStream) -> EventStream;
}

/// Filter events based on a predicate. Errors always pass through.
pub struct FilterTransform {
    predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
}

impl FilterTransform {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl EventStreamTransform for FilterTransform {
    fn transform(&self, stream: EventStream) -> EventStream {
        let predicate = self.predicate.clone();
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(item) = inner.next().await {
                match item {
                    Ok(event) => {
                        if (predicate)(&event) {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Fail the stream with [`RunwireError::Timeout`] when no event arrives
/// within `idle`.
pub struct IdleTimeoutTransform {
    idle: Duration,
}

impl IdleTimeoutTransform {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }
}

impl EventStreamTransform for IdleTimeoutTransform {
    fn transform(&self, stream: EventStream) -> EventStream {
        let idle = self.idle;
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            loop {
                match tokio::time::timeout(idle, inner.next()).await {
                    Ok(Some(item)) => {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(RunwireError::Timeout(idle.as_millis() as u64));
                        break;
                    }
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Backend decorator applying transforms to every stream it returns.
pub struct TransformedBackend<B> {
    inner: B,
    transforms: Vec<Arc<dyn EventStreamTransform>>,
}

impl<B: AgentBackend> TransformedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            transforms: Vec::new(),
        }
    }

    /// Add a transform. Transforms apply in the order they were added.
    pub fn with_transform(mut self, transform: impl EventStreamTransform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: AgentBackend> AgentBackend for TransformedBackend<B> {
    async fn run(&self, input: RunInput) -> Result<EventStream, RunwireError> {
        let stream = self.inner.run(input).await?;
        Ok(self
            .transforms
            .iter()
            .fold(stream, |stream, transform| transform.transform(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::backend::ReplayBackend;
    use crate::types::Role;
    use futures::stream;

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
    async fn filter_drops_matching_events() {
        let backend = TransformedBackend::new(ReplayBackend::from_events([vec![
            Event::text_message_start("m1", Role::Assistant),
            Event::text_message_content("m1", "a"),
            Event::text_message_end("m1"),
        ]]))
        .with_transform(FilterTransform::new(|event| {
            !matches!(event, Event::TextMessageContent { .. })
        }));
        let events: Vec<_> = backend.run(input()).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_silent_stream() {
        let silent: EventStream = stream::pending().boxed();
        let mut stream = IdleTimeoutTransform::new(Duration::from_millis(50)).transform(silent);
        match stream.next().await {
            Some(Err(RunwireError::Timeout(ms))) => assert_eq!(ms, 50),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_passes_through_active_stream() {
        let events: EventStream =
            stream::iter(vec![Ok(Event::run_started("th", "r"))]).boxed();
        let out: Vec<_> = IdleTimeoutTransform::new(Duration::from_secs(5))
            .transform(events)
            .collect()
            .await;
        assert_eq!(out.len(), 1);
    }
}
