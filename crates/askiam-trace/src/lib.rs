//! AskIAM Trace Recorder
//!
//! Append-only, session-scoped audit log of every node and tool invocation
//! made while validating access requests.
//!
//! # Overview
//!
//! - **TraceSession**: the per-user-session log, opened by the session host
//!   and closed exactly once into a [`TraceExport`]
//! - **TraceRecorder**: the seam the pipeline records through, so tests can
//!   inject their own recorder
//! - **TraceSpan**: a guard for one in-flight invocation; dropping it without
//!   completing records the invocation as cancelled
//!
//! # Example
//!
//! ```rust
//! use askiam_trace::{EntryKind, TraceRecorderExt, TraceSession};
//!
//! let session = TraceSession::open();
//! session.record(EntryKind::Tool, "vector_search", &"hr analyst", &["doc-1"]);
//!
//! let export = session.close().unwrap();
//! assert_eq!(export.total_steps, 1);
//! assert!(export.verify_integrity().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod entry;
pub mod error;
pub mod export;
pub mod ids;
pub mod recorder;
pub mod session;

// Re-exports
pub use entry::{EntryKind, EntryStatus, TraceDraft, TraceEntry};
pub use error::TraceError;
pub use export::TraceExport;
pub use ids::{RequestId, SessionId};
pub use recorder::{to_trace_value, TraceRecorder, TraceRecorderExt, TraceSpan};
pub use session::TraceSession;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for recording traces
    pub use crate::{
        EntryKind, EntryStatus, RequestId, SessionId, TraceExport, TraceRecorder,
        TraceRecorderExt, TraceSession, TraceSpan,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
