//! Recording seam and in-flight spans

use crate::entry::{EntryKind, EntryStatus, TraceDraft};
use crate::ids::RequestId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Sink for trace drafts
///
/// Implementations must append in call order and must never fail or panic:
/// tracing is never allowed to be the cause of a pipeline failure.
pub trait TraceRecorder: Send + Sync {
    /// Mark the start of a new request within the session
    fn begin_request(&self, request_id: RequestId);

    /// Append one invocation record
    fn append(&self, draft: TraceDraft);
}

/// Convenience methods over any recorder
pub trait TraceRecorderExt: TraceRecorder {
    /// Record a completed invocation
    fn record<I, O>(&self, kind: EntryKind, name: &str, input: &I, output: &O)
    where
        I: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        self.append(TraceDraft::new(
            kind,
            name,
            to_trace_value(input),
            to_trace_value(output),
        ));
    }
}

impl<T: TraceRecorder + ?Sized> TraceRecorderExt for T {}

/// Serialize a value for the trace, substituting a placeholder on failure
#[must_use]
pub fn to_trace_value<T: Serialize + ?Sized>(value: &T) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("trace value not serializable: {}", e);
            serde_json::Value::String(format!("<unserializable: {e}>"))
        }
    }
}

/// Guard for one in-flight invocation
///
/// Finish it with [`complete`](Self::complete), [`fail`](Self::fail) or
/// [`fault`](Self::fault). A span dropped unfinished records itself as
/// `cancelled` (the future owning it was abandoned) or, when dropped during a
/// panic unwind, as `faulted`.
pub struct TraceSpan<'a> {
    recorder: &'a dyn TraceRecorder,
    request_id: Option<RequestId>,
    kind: EntryKind,
    name: String,
    input: serde_json::Value,
    started_at: DateTime<Utc>,
    started: Instant,
    finished: bool,
}

impl<'a> TraceSpan<'a> {
    /// Start a span
    pub fn start<I: Serialize + ?Sized>(
        recorder: &'a dyn TraceRecorder,
        request_id: Option<RequestId>,
        kind: EntryKind,
        name: impl Into<String>,
        input: &I,
    ) -> Self {
        let name = name.into();
        tracing::debug!(kind = kind.as_str(), name = %name, "trace span started");
        Self {
            recorder,
            request_id,
            kind,
            name,
            input: to_trace_value(input),
            started_at: Utc::now(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Start a tool span
    #[inline]
    pub fn tool<I: Serialize + ?Sized>(
        recorder: &'a dyn TraceRecorder,
        request_id: Option<RequestId>,
        name: impl Into<String>,
        input: &I,
    ) -> Self {
        Self::start(recorder, request_id, EntryKind::Tool, name, input)
    }

    /// Start a node span
    #[inline]
    pub fn node<I: Serialize + ?Sized>(
        recorder: &'a dyn TraceRecorder,
        request_id: Option<RequestId>,
        name: impl Into<String>,
        input: &I,
    ) -> Self {
        Self::start(recorder, request_id, EntryKind::Node, name, input)
    }

    /// Invocation name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finish with a result
    pub fn complete<O: Serialize + ?Sized>(self, output: &O) {
        self.finish(EntryStatus::Completed, to_trace_value(output));
    }

    /// Finish with an expected failure
    pub fn fail<O: Serialize + ?Sized>(self, output: &O) {
        self.finish(EntryStatus::Failed, to_trace_value(output));
    }

    /// Finish with an unexpected fault
    pub fn fault(self, message: &str) {
        self.finish(
            EntryStatus::Faulted,
            serde_json::json!({ "fault": message }),
        );
    }

    fn finish(mut self, status: EntryStatus, output: serde_json::Value) {
        self.emit(status, output);
    }

    fn emit(&mut self, status: EntryStatus, output: serde_json::Value) {
        if self.finished {
            return;
        }
        self.finished = true;
        let draft = TraceDraft {
            request_id: self.request_id,
            kind: self.kind,
            name: std::mem::take(&mut self.name),
            input: std::mem::take(&mut self.input),
            output,
            status,
            started_at: self.started_at,
            duration: self.started.elapsed(),
        };
        self.recorder.append(draft);
    }
}

impl Drop for TraceSpan<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            tracing::debug!(name = %self.name, "trace span unwound by panic");
            self.emit(
                EntryStatus::Faulted,
                serde_json::json!({ "fault": "panicked" }),
            );
        } else {
            tracing::debug!(name = %self.name, "trace span dropped unfinished");
            self.emit(
                EntryStatus::Cancelled,
                serde_json::Value::String("cancelled".to_string()),
            );
        }
    }
}

impl std::fmt::Debug for TraceSpan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSpan")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish()
    }
}
