//! Session-end export
//!
//! The export is the only form in which a trace leaves the process. It
//! serializes to plain JSON and renders to a human-readable text report.

use crate::entry::{EntryKind, TraceEntry, GENESIS_HASH};
use crate::error::TraceError;
use crate::ids::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write;

const RULE: &str = "======================================================================";
const THIN_RULE: &str = "----------------------------------------------------------------------";

/// Ordered trace records plus session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceExport {
    /// Session ID
    pub session_id: SessionId,
    /// When the session opened
    pub opened_at: DateTime<Utc>,
    /// When the session closed
    pub closed_at: DateTime<Utc>,
    /// Number of entries
    pub total_steps: u64,
    /// Number of requests validated in the session
    pub total_requests: u64,
    /// Entries in step order
    pub entries: Vec<TraceEntry>,
}

impl TraceExport {
    /// Number of tool entries
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kind == EntryKind::Tool).count()
    }

    /// Number of node entries
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kind == EntryKind::Node).count()
    }

    /// Check step ordering and the hash chain
    ///
    /// # Errors
    /// - `TraceError::OrderingViolation` if step indices are not 1, 2, 3, ...
    /// - `TraceError::IntegrityViolation` if any entry hash does not verify
    pub fn verify_integrity(&self) -> Result<(), TraceError> {
        let mut prev = GENESIS_HASH.to_string();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.step_index != i as u64 + 1 {
                return Err(TraceError::OrderingViolation {
                    step_index: entry.step_index,
                });
            }
            if entry.prev_hash != prev || entry.hash != entry.compute_hash() {
                return Err(TraceError::IntegrityViolation {
                    step_index: entry.step_index,
                });
            }
            prev.clone_from(&entry.hash);
        }
        Ok(())
    }

    /// Pretty-printed JSON
    ///
    /// # Errors
    /// - `TraceError::Serialization` if serialization fails
    pub fn to_json_pretty(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse an export back from JSON
    ///
    /// # Errors
    /// - `TraceError::Serialization` on malformed input
    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write pretty JSON to a writer and flush it
    ///
    /// # Errors
    /// - `TraceError::Serialization` or `TraceError::Io`, including a failed
    ///   final flush
    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<(), TraceError> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Human-readable execution trace report
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "IAM ACCESS VALIDATION - EXECUTION TRACE");
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Session: {}", self.session_id);
        let _ = writeln!(out, "Opened:  {}", self.opened_at.to_rfc3339());
        let _ = writeln!(out, "Closed:  {}", self.closed_at.to_rfc3339());
        let _ = writeln!(out, "{RULE}\n");

        for entry in &self.entries {
            let _ = writeln!(
                out,
                "Step {} - {}: {} [{}]",
                entry.step_index,
                entry.kind.as_str().to_uppercase(),
                entry.name,
                entry.status.as_str()
            );
            if let Some(request_id) = entry.request_id {
                let _ = writeln!(out, "Request: {request_id}");
            }
            let _ = writeln!(
                out,
                "Started: {} ({} us)",
                entry.started_at.to_rfc3339(),
                entry.duration_us
            );
            let _ = writeln!(out, "Input:\n{}", pretty(&entry.input));
            let _ = writeln!(out, "Output:\n{}", pretty(&entry.output));
            let _ = writeln!(out, "{THIN_RULE}");
        }

        let _ = writeln!(out, "\n{RULE}");
        let _ = writeln!(out, "EXECUTION SUMMARY");
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Total Requests: {}", self.total_requests);
        let _ = writeln!(out, "Total Steps: {}", self.total_steps);
        let _ = writeln!(out, "  - Nodes: {}", self.node_count());
        let _ = writeln!(out, "  - Tools: {}", self.tool_count());
        let _ = writeln!(out, "{RULE}");
        out
    }
}

fn pretty(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::recorder::TraceRecorderExt;
    use crate::session::TraceSession;
    use pretty_assertions::assert_eq;

    fn sample_export() -> TraceExport {
        let session = TraceSession::open();
        session.record(EntryKind::Node, "extract_entities", &"I need HR Analyst", &"ok");
        session.record(EntryKind::Tool, "vector_search", &"hr analyst workday", &["doc-1"]);
        session.close().unwrap()
    }

    #[test]
    fn json_round_trip_preserves_chain() {
        let export = sample_export();
        let json = export.to_json_pretty().unwrap();
        let back = TraceExport::from_json(&json).unwrap();
        assert_eq!(back, export);
        assert!(back.verify_integrity().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let mut export = sample_export();
        export.entries[0].output = serde_json::json!("forged");
        assert!(matches!(
            export.verify_integrity(),
            Err(TraceError::IntegrityViolation { step_index: 1 })
        ));
    }

    #[test]
    fn reordering_is_detected() {
        let mut export = sample_export();
        export.entries.swap(0, 1);
        assert!(matches!(
            export.verify_integrity(),
            Err(TraceError::OrderingViolation { .. })
        ));
    }

    #[test]
    fn text_report_has_summary() {
        let text = sample_export().render_text();
        assert!(text.contains("Step 1 - NODE: extract_entities [completed]"));
        assert!(text.contains("Total Steps: 2"));
        assert!(text.contains("  - Tools: 1"));
    }

    /// Accepts writes, fails on flush (a full disk behind a buffer)
    struct FlushFails(Vec<u8>);

    impl Write for FlushFails {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("no space left on device"))
        }
    }

    #[test]
    fn failed_flush_is_reported() {
        let export = sample_export();
        assert!(matches!(
            export.write_json(FlushFails(Vec::new())),
            Err(TraceError::Io(_))
        ));
        // Buffered writers surface the error too instead of losing it on drop
        let buffered = std::io::BufWriter::new(FlushFails(Vec::new()));
        assert!(matches!(export.write_json(buffered), Err(TraceError::Io(_))));
    }

    #[test]
    fn write_json_to_buffer() {
        let mut buf = Vec::new();
        sample_export().write_json(&mut buf).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("\"total_steps\": 2"));
    }
}
