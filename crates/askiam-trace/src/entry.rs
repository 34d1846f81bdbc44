//! Trace entries
//!
//! A [`TraceDraft`] is what a caller hands to a recorder; the session turns
//! it into a sealed [`TraceEntry`] by assigning the step index and chaining
//! its hash to the previous entry.

use crate::ids::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Hash of the (non-existent) entry before step 1
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A pipeline stage (extraction, semantic path, deterministic path, finalize)
    Node,
    /// An external or sub-tool call (model, vector store, SQL generation/validation/execution)
    Tool,
}

impl EntryKind {
    /// Stable lowercase label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Node => "node",
            EntryKind::Tool => "tool",
        }
    }
}

/// How the invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Returned a result
    Completed,
    /// Returned an expected failure (provider error, timeout, rejection)
    Failed,
    /// Abandoned before completion
    Cancelled,
    /// An unexpected fault escaped the component
    Faulted,
}

impl EntryStatus {
    /// Stable lowercase label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
            EntryStatus::Faulted => "faulted",
        }
    }
}

/// An invocation ready to be appended
#[derive(Debug, Clone)]
pub struct TraceDraft {
    /// Owning request, if any
    pub request_id: Option<RequestId>,
    /// Node or tool
    pub kind: EntryKind,
    /// Invocation name
    pub name: String,
    /// Serialized input
    pub input: serde_json::Value,
    /// Serialized output
    pub output: serde_json::Value,
    /// Outcome
    pub status: EntryStatus,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Elapsed time
    pub duration: Duration,
}

impl TraceDraft {
    /// Create a completed draft that started now and took no time
    #[must_use]
    pub fn new(
        kind: EntryKind,
        name: impl Into<String>,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> Self {
        Self {
            request_id: None,
            kind,
            name: name.into(),
            input,
            output,
            status: EntryStatus::Completed,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Attach the owning request
    #[inline]
    #[must_use]
    pub fn with_request(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Set the outcome
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }
}

/// One sealed, immutable trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 1-based position in the session, strictly increasing in append order
    ///
    /// Indices are assigned when an invocation finishes, not when it starts,
    /// so a node's entry follows the entries of the tools it wrapped.
    /// `started_at` keeps the start order.
    pub step_index: u64,
    /// Owning request, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Node or tool
    pub kind: EntryKind,
    /// Invocation name
    pub name: String,
    /// Serialized input
    pub input: serde_json::Value,
    /// Serialized output
    pub output: serde_json::Value,
    /// Outcome
    pub status: EntryStatus,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Elapsed time in microseconds
    pub duration_us: u64,
    /// Hash of the previous entry (hex)
    pub prev_hash: String,
    /// Hash of this entry (hex)
    pub hash: String,
}

impl TraceEntry {
    /// Seal a draft at `step_index`, chaining it to `prev_hash`
    #[must_use]
    pub fn seal(draft: TraceDraft, step_index: u64, prev_hash: &str) -> Self {
        let duration_us = u64::try_from(draft.duration.as_micros()).unwrap_or(u64::MAX);
        let mut entry = Self {
            step_index,
            request_id: draft.request_id,
            kind: draft.kind,
            name: draft.name,
            input: draft.input,
            output: draft.output,
            status: draft.status,
            started_at: draft.started_at,
            duration_us,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Recompute this entry's hash from its content
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.step_index.to_le_bytes());
        if let Some(request_id) = &self.request_id {
            hasher.update(request_id.0.to_bytes());
        }
        hasher.update([0]);
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.input.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.output.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.status.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.started_at.to_rfc3339().as_bytes());
        hasher.update(self.duration_us.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seal_chains_hash() {
        let draft = TraceDraft::new(EntryKind::Tool, "generate_sql", json!({"a": 1}), json!("ok"));
        let entry = TraceEntry::seal(draft, 1, GENESIS_HASH);

        assert_eq!(entry.step_index, 1);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash, entry.compute_hash());
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn hash_changes_with_content() {
        let a = TraceEntry::seal(
            TraceDraft::new(EntryKind::Tool, "x", json!(1), json!(2)),
            1,
            GENESIS_HASH,
        );
        let mut b = a.clone();
        b.output = json!(3);
        assert_ne!(a.hash, b.compute_hash());
    }

    #[test]
    fn status_labels() {
        assert_eq!(EntryStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(EntryKind::Node.as_str(), "node");
    }
}
