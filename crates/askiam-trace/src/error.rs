//! Error types for the trace recorder

use crate::ids::SessionId;

/// Trace recorder errors
///
/// Recording itself never fails; these surface only from session close and
/// export handling.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Session was already closed
    #[error("trace session {0} already closed")]
    AlreadyClosed(SessionId),

    /// Hash chain broken at the given step
    #[error("trace integrity violation at step {step_index}")]
    IntegrityViolation {
        /// First step whose hash does not verify
        step_index: u64,
    },

    /// Step indices are not strictly increasing
    #[error("trace ordering violation at step {step_index}")]
    OrderingViolation {
        /// First out-of-order step
        step_index: u64,
    },

    /// Export serialization failed
    #[error("trace serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Export write failed
    #[error("trace export io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TraceError::IntegrityViolation { step_index: 4 };
        assert_eq!(err.to_string(), "trace integrity violation at step 4");
    }
}
