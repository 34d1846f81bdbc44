//! External collaborator contracts
//!
//! The pipeline consumes three providers: a language model, a vector store
//! and a read-only relational store. Every call into one of them is a
//! suspension point and goes through [`with_timeout`].

pub mod memory;
#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::ProviderError;
use crate::types::ScoredDocument;
use askiam_sql::SafeQuery;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// One result row, columns in select order
pub type Row = IndexMap<String, serde_json::Value>;

/// Equality filter over document metadata (all entries must match)
pub type MetadataFilter = BTreeMap<String, String>;

/// Text completion provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name for logs and traces
    fn name(&self) -> &str;

    /// Complete a prompt
    ///
    /// # Errors
    /// - `ProviderError` if the model is unreachable or fails
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Similarity search provider
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `k` documents nearest to `query`, best first
    ///
    /// # Errors
    /// - `ProviderError` if the store is unreachable or fails
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, ProviderError>;
}

/// Read-only relational store
///
/// Accepts only a [`SafeQuery`], which exists only for statements that
/// passed safety validation.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Run a validated statement with its bound parameters
    ///
    /// # Errors
    /// - `ProviderError` if the store is unreachable or rejects the statement
    async fn fetch(&self, query: &SafeQuery) -> Result<Vec<Row>, ProviderError>;
}

/// Await `future`, converting expiry of `limit` into `ProviderError::Timeout`
///
/// # Errors
/// - `ProviderError::Timeout` on expiry, otherwise whatever `future` returns
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    if let Ok(result) = tokio::time::timeout(limit, future).await {
        result
    } else {
        tracing::warn!(operation, seconds = limit.as_secs_f64(), "provider call timed out");
        Err(ProviderError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs_f64(),
        })
    }
}

/// Strip a surrounding markdown code fence (```` ```json ... ``` ````)
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        // Language tag on the opening line
        Some(newline) => &rest[newline + 1..],
        None => rest.strip_prefix("json").unwrap_or(rest),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model response as a JSON object, tolerating a code fence
///
/// # Errors
/// - `ProviderError::Malformed` if no JSON object can be parsed
pub fn parse_json_object(
    text: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, ProviderError> {
    let body = strip_code_fence(text);
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProviderError::Malformed(format!(
            "expected JSON object, got {other}"
        ))),
        Err(e) => Err(ProviderError::Malformed(e.to_string())),
    }
}
