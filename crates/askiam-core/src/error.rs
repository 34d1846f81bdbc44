//! Error types for the validation pipeline
//!
//! Soft errors (provider failures, unresolved fields) are recovered locally
//! and turned into verdict data. Only a [`PipelineFault`] surfaces to the
//! caller, and then as `FinalDecision { status: Error }`, never as a raw error.

use askiam_sql::{GenerationError, UnsafeQueryError};
use askiam_trace::TraceError;
use std::path::PathBuf;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum AskIamError {
    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Empty request text
    #[error(transparent)]
    EmptyRequest(#[from] EmptyRequestError),

    /// External provider failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Generated SQL failed safety validation
    #[error("unsafe query: {0}")]
    UnsafeQuery(#[from] UnsafeQueryError),

    /// SQL generation failed
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Trace session error
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    /// Unexpected fault inside a validation run
    #[error(transparent)]
    Fault(#[from] PipelineFault),
}

impl AskIamError {
    /// Whether the error is recovered locally as verdict data
    #[inline]
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Generation(_))
    }
}

/// Empty or whitespace-only request
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("empty request")]
pub struct EmptyRequestError;

/// Language model, vector store or relational store failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Call exceeded the per-call timeout
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Operation name
        operation: String,
        /// Configured limit
        seconds: f64,
    },

    /// Provider not reachable or returned an error
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Provider answered with something unusable
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// Store rejected or could not run the statement
    #[error("query failed: {0}")]
    Query(String),
}

impl ProviderError {
    /// Whether the call timed out
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config text is not valid TOML for this schema
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent
    #[error("invalid {key}: {message}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// What is wrong
        message: String,
    },

    /// A required provider was not supplied
    #[error("missing provider: {0}")]
    MissingProvider(&'static str),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`]
    #[inline]
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Unexpected fault inside a validation run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineFault {
    /// A component panicked
    #[error("component panicked: {0}")]
    Panicked(String),

    /// The pipeline attempted an illegal state transition
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// The overall request deadline expired
    #[error("request timed out after {0}s")]
    RequestTimeout(f64),
}

impl PipelineFault {
    /// Fault from a caught panic payload
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_display() {
        assert_eq!(EmptyRequestError.to_string(), "empty request");
    }

    #[test]
    fn provider_error_is_timeout() {
        let err = ProviderError::Timeout {
            operation: "vector_search".to_string(),
            seconds: 10.0,
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "vector_search timed out after 10s");
        assert!(!ProviderError::Unavailable("down".to_string()).is_timeout());
    }

    #[test]
    fn soft_errors() {
        assert!(AskIamError::from(ProviderError::Malformed("x".into())).is_soft());
        assert!(!AskIamError::from(EmptyRequestError).is_soft());
        assert!(!AskIamError::from(PipelineFault::Panicked("x".into())).is_soft());
    }

    #[test]
    fn panic_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(
            PipelineFault::from_panic(boxed.as_ref()),
            PipelineFault::Panicked("static message".to_string())
        );
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(
            PipelineFault::from_panic(owned.as_ref()),
            PipelineFault::Panicked("owned".to_string())
        );
    }
}
