//! Best-effort run telemetry.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregator::ProtocolViolation;
use crate::dispatch::SuppressReason;

/// Notable things that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    ProtocolViolation {
        run_id: String,
        violation: ProtocolViolation,
    },
    ToolCallForwarded {
        run_id: String,
        tool_call_id: String,
        tool_name: String,
    },
    ToolCallSuppressed {
        run_id: String,
        tool_call_id: String,
        reason: SuppressReason,
    },
    ToolCallFailed {
        run_id: String,
        tool_call_id: String,
        content: String,
    },
    StaleWriteDropped {
        run_id: String,
        tool_call_id: Option<String>,
    },
    /// The finalizer had to add events to close the log.
    EventsSynthesized {
        run_id: String,
        event_types: Vec<String>,
    },
}

/// Callback receiving diagnostics.
pub type DiagnosticSink = Arc<dyn Fn(Diagnostic) + Send + Sync>;

/// Delivers diagnostics to an optional sink, swallowing sink panics.
#[derive(Clone, Default)]
pub(crate) struct DiagnosticEmitter {
    sink: Option<DiagnosticSink>,
}

impl DiagnosticEmitter {
    pub(crate) fn new(sink: Option<DiagnosticSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, diagnostic: Diagnostic) {
        let Some(sink) = &self.sink else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| sink(diagnostic))).is_err() {
            tracing::warn!("diagnostic sink panicked; continuing run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn panicking_sink_is_contained() {
        let emitter = DiagnosticEmitter::new(Some(Arc::new(|_| panic!("sink down"))));
        emitter.emit(Diagnostic::StaleWriteDropped {
            run_id: "r".to_string(),
            tool_call_id: None,
        });
    }

    #[test]
    fn delivers_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let emitter = DiagnosticEmitter::new(Some(Arc::new(move |diagnostic| {
            captured.lock().unwrap().push(diagnostic);
        })));
        emitter.emit(Diagnostic::ToolCallForwarded {
            run_id: "r".to_string(),
            tool_call_id: "t1".to_string(),
            tool_name: "remote".to_string(),
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
