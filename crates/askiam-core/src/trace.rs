//! Request-scoped handle onto the session trace

use askiam_trace::{EntryKind, EntryStatus, RequestId, TraceDraft, TraceRecorder, TraceSpan};
use serde::Serialize;

/// The session recorder plus the ID of the request being validated
///
/// Cheap to copy; every component that calls out to a tool takes one.
#[derive(Clone, Copy)]
pub struct RequestTrace<'a> {
    recorder: &'a dyn TraceRecorder,
    request_id: RequestId,
}

impl<'a> RequestTrace<'a> {
    /// Handle for `request_id`
    pub fn new(recorder: &'a dyn TraceRecorder, request_id: RequestId) -> Self {
        Self {
            recorder,
            request_id,
        }
    }

    /// Request ID
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Start a tool span
    pub fn tool<I: Serialize + ?Sized>(&self, name: &str, input: &I) -> TraceSpan<'a> {
        TraceSpan::tool(self.recorder, Some(self.request_id), name, input)
    }

    /// Start a node span
    pub fn node<I: Serialize + ?Sized>(&self, name: &str, input: &I) -> TraceSpan<'a> {
        TraceSpan::node(self.recorder, Some(self.request_id), name, input)
    }

    /// Record a finished node invocation with an explicit status
    pub fn record_node<I, O>(&self, name: &str, input: &I, output: &O, status: EntryStatus)
    where
        I: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        self.recorder.append(
            TraceDraft::new(
                EntryKind::Node,
                name,
                askiam_trace::to_trace_value(input),
                askiam_trace::to_trace_value(output),
            )
            .with_request(Some(self.request_id))
            .with_status(status),
        );
    }
}

impl std::fmt::Debug for RequestTrace<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTrace")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
