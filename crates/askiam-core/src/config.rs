//! Pipeline configuration

use crate::error::ConfigError;
use askiam_sql::{EntitySchema, TableAllowlist};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// When the deterministic path runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterministicMode {
    /// Only when the semantic path is not accepted
    #[default]
    Fallback,
    /// Always, concurrently with the semantic path; deterministic is authoritative
    Always,
    /// Both start concurrently; the first committable result wins
    Speculative,
}

impl DeterministicMode {
    /// Config name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fallback => "fallback",
            Self::Always => "always",
            Self::Speculative => "speculative",
        }
    }
}

/// How entities are extracted from free text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Language model per field, regex patterns back-fill
    #[default]
    ModelWithPatterns,
    /// Regex patterns only; no model calls
    PatternsOnly,
}

/// Validation pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Minimum semantic confidence accepted without deterministic confirmation
    pub rag_confidence_threshold: f64,
    /// Documents fetched by the semantic path
    pub retrieval_k: usize,
    /// Per external-call timeout
    pub tool_timeout_seconds: f64,
    /// Overall per-request deadline
    pub request_timeout_seconds: f64,
    /// Tables generated SQL may read
    pub sql_table_allowlist: TableAllowlist,
    /// When the deterministic path runs
    pub deterministic_mode: DeterministicMode,
    /// Weight of retrieval similarity vs. model judgment
    pub retrieval_weight: f64,
    /// Retrieved documents scoring below this are ignored
    pub min_similarity: f64,
    /// Extraction strategy
    pub extraction_mode: ExtractionMode,
    /// Entity store layout
    pub schema: EntitySchema,
}

/// Largest accepted `retrieval_k`
pub const MAX_RETRIEVAL_K: usize = 50;

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed TOML or unknown keys
    /// - `ConfigError::Invalid` if validation fails
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - otherwise as [`from_toml_str`](Self::from_toml_str)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Check ranges and cross-field consistency
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_interval("rag_confidence_threshold", self.rag_confidence_threshold)?;
        unit_interval("retrieval_weight", self.retrieval_weight)?;
        unit_interval("min_similarity", self.min_similarity)?;

        if !(1..=MAX_RETRIEVAL_K).contains(&self.retrieval_k) {
            return Err(ConfigError::invalid(
                "retrieval_k",
                format!("must be between 1 and {MAX_RETRIEVAL_K}, got {}", self.retrieval_k),
            ));
        }
        positive_seconds("tool_timeout_seconds", self.tool_timeout_seconds)?;
        positive_seconds("request_timeout_seconds", self.request_timeout_seconds)?;

        if self.sql_table_allowlist.is_empty() {
            return Err(ConfigError::invalid(
                "sql_table_allowlist",
                "must name at least one table",
            ));
        }
        self.schema
            .validate(&self.sql_table_allowlist)
            .map_err(|message| ConfigError::invalid("schema", message))
    }

    /// Per-call timeout
    #[inline]
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tool_timeout_seconds)
    }

    /// Per-request deadline
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds)
    }

    /// With confidence threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.rag_confidence_threshold = threshold;
        self
    }

    /// With retrieval k
    #[inline]
    #[must_use]
    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_tool_timeout(mut self, seconds: f64) -> Self {
        self.tool_timeout_seconds = seconds;
        self
    }

    /// With per-request deadline
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    /// With deterministic mode
    #[inline]
    #[must_use]
    pub fn with_deterministic_mode(mut self, mode: DeterministicMode) -> Self {
        self.deterministic_mode = mode;
        self
    }

    /// With extraction mode
    #[inline]
    #[must_use]
    pub fn with_extraction_mode(mut self, mode: ExtractionMode) -> Self {
        self.extraction_mode = mode;
        self
    }

    /// With table allow-list
    #[inline]
    #[must_use]
    pub fn with_allowlist(mut self, allowlist: TableAllowlist) -> Self {
        self.sql_table_allowlist = allowlist;
        self
    }

    /// With entity schema
    #[inline]
    #[must_use]
    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        self.schema = schema;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rag_confidence_threshold: 0.95,
            retrieval_k: 3,
            tool_timeout_seconds: 10.0,
            request_timeout_seconds: 60.0,
            sql_table_allowlist: TableAllowlist::default(),
            deterministic_mode: DeterministicMode::Fallback,
            retrieval_weight: 0.5,
            min_similarity: 0.0,
            extraction_mode: ExtractionMode::ModelWithPatterns,
            schema: EntitySchema::default(),
        }
    }
}

fn unit_interval(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, format!("must be within [0, 1], got {value}")))
    }
}

fn positive_seconds(key: &'static str, value: f64) -> Result<(), ConfigError> {
    // Duration::from_secs_f64 panics on non-finite input
    if value.is_finite() && value > 0.0 && value < 86_400.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            key,
            format!("must be a positive number of seconds below one day, got {value}"),
        ))
    }
}
