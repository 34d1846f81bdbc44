//! Per-user-session trace log

use crate::entry::{TraceDraft, TraceEntry, GENESIS_HASH};
use crate::error::TraceError;
use crate::export::TraceExport;
use crate::ids::{RequestId, SessionId};
use crate::recorder::TraceRecorder;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Append-only trace for one user session
///
/// Created by the session host, passed by reference into every validation
/// run, and closed exactly once when the session ends. Appends after close
/// are dropped with a warning; the log is never mutated after close.
#[derive(Debug)]
pub struct TraceSession {
    session_id: SessionId,
    opened_at: DateTime<Utc>,
    inner: Mutex<SessionLog>,
}

#[derive(Debug, Default)]
struct SessionLog {
    entries: Vec<TraceEntry>,
    request_ids: Vec<RequestId>,
    closed_at: Option<DateTime<Utc>>,
}

impl TraceSession {
    /// Open a new session with a fresh ID
    #[must_use]
    pub fn open() -> Self {
        Self::open_with_id(SessionId::new())
    }

    /// Open a session with a caller-supplied ID
    #[must_use]
    pub fn open_with_id(session_id: SessionId) -> Self {
        tracing::debug!(session_id = %session_id, "trace session opened");
        Self {
            session_id,
            opened_at: Utc::now(),
            inner: Mutex::new(SessionLog::default()),
        }
    }

    /// Session ID
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// When the session was opened
    #[inline]
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Whether the session has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed_at.is_some()
    }

    /// Number of entries recorded so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries in step order
    #[must_use]
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.inner.lock().entries.clone()
    }

    /// Snapshot of the entries belonging to one request
    #[must_use]
    pub fn entries_for(&self, request_id: RequestId) -> Vec<TraceEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.request_id == Some(request_id))
            .cloned()
            .collect()
    }

    /// Number of requests begun in this session
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.inner.lock().request_ids.len() as u64
    }

    /// Close the session and export its log
    ///
    /// # Errors
    /// - `TraceError::AlreadyClosed` on a second close
    pub fn close(&self) -> Result<TraceExport, TraceError> {
        let mut guard = self.inner.lock();
        if guard.closed_at.is_some() {
            return Err(TraceError::AlreadyClosed(self.session_id));
        }
        let closed_at = Utc::now();
        guard.closed_at = Some(closed_at);

        let export = TraceExport {
            session_id: self.session_id,
            opened_at: self.opened_at,
            closed_at,
            total_steps: guard.entries.len() as u64,
            total_requests: guard.request_ids.len() as u64,
            entries: guard.entries.clone(),
        };
        tracing::info!(
            session_id = %self.session_id,
            total_steps = export.total_steps,
            total_requests = export.total_requests,
            "trace session closed"
        );
        Ok(export)
    }
}

impl TraceRecorder for TraceSession {
    fn begin_request(&self, request_id: RequestId) {
        let mut guard = self.inner.lock();
        if guard.closed_at.is_some() {
            tracing::warn!(
                session_id = %self.session_id,
                "request begun after trace session close"
            );
            return;
        }
        guard.request_ids.push(request_id);
    }

    fn append(&self, draft: TraceDraft) {
        let mut guard = self.inner.lock();
        if guard.closed_at.is_some() {
            tracing::warn!(
                session_id = %self.session_id,
                name = %draft.name,
                "trace append after close dropped"
            );
            return;
        }
        let step_index = guard.entries.len() as u64 + 1;
        let prev_hash = guard
            .entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.hash.clone());
        guard
            .entries
            .push(TraceEntry::seal(draft, step_index, &prev_hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::recorder::TraceRecorderExt;
    use std::sync::Arc;

    #[test]
    fn steps_are_strictly_increasing() {
        let session = TraceSession::open();
        for i in 0..5 {
            session.record(EntryKind::Tool, "t", &i, &i);
        }
        let steps: Vec<u64> = session.entries().iter().map(|e| e.step_index).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn close_twice_fails() {
        let session = TraceSession::open();
        assert!(session.close().is_ok());
        assert!(matches!(session.close(), Err(TraceError::AlreadyClosed(_))));
    }

    #[test]
    fn append_after_close_is_dropped() {
        let session = TraceSession::open();
        session.record(EntryKind::Node, "a", &(), &());
        let export = session.close().unwrap();
        session.record(EntryKind::Node, "b", &(), &());

        assert_eq!(export.total_steps, 1);
        assert_eq!(session.len(), 1);
        assert!(session.is_closed());
    }

    #[test]
    fn requests_are_counted() {
        let session = TraceSession::open();
        let first = RequestId::new();
        session.begin_request(first);
        session.begin_request(RequestId::new());
        session.append(
            TraceDraft::new(EntryKind::Tool, "t", serde_json::Value::Null, serde_json::Value::Null)
                .with_request(Some(first)),
        );

        assert_eq!(session.total_requests(), 2);
        assert_eq!(session.entries_for(first).len(), 1);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let session = Arc::new(TraceSession::open());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        session.record(EntryKind::Tool, "worker", &t, &i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let export = session.close().unwrap();
        assert_eq!(export.total_steps, 400);
        assert!(export.verify_integrity().is_ok());
    }
}
