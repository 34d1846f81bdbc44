//! Request-scoped data model

use askiam_trace::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One inbound access request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// User text as received
    pub raw_text: String,
    /// Request ID
    pub request_id: RequestId,
    /// When the request was received
    pub received_at: DateTime<Utc>,
    /// Authenticated chat user, if the session host knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl AccessRequest {
    /// New request with a fresh ID
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            request_id: RequestId::new(),
            received_at: Utc::now(),
            requester: None,
        }
    }

    /// With requester identity
    #[inline]
    #[must_use]
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    /// Whether the text is empty or whitespace-only
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}

/// Entity kinds of the fixed schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Users table
    User,
    /// Applications table
    Application,
    /// Roles table
    Role,
}

impl EntityKind {
    /// All kinds, in check order
    pub const ALL: [Self; 3] = [Self::User, Self::Application, Self::Role];

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Application => "application",
            Self::Role => "role",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resolved field came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Language model
    Model,
    /// Regex pattern
    Pattern,
    /// Authenticated requester identity
    Requester,
}

impl ExtractionSource {
    /// Contribution to extraction confidence
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::Model | Self::Requester => 1.0,
            Self::Pattern => 0.8,
        }
    }
}

/// One extracted field
///
/// A resolved value is always non-empty, trimmed, with inner whitespace
/// collapsed. There is no third "empty" state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Extraction {
    /// Field resolved
    Resolved {
        /// Normalized value
        value: String,
        /// Source
        source: ExtractionSource,
    },
    /// Field could not be resolved
    Unresolved,
}

impl Extraction {
    /// Resolve from raw text; blank text yields `Unresolved`
    pub fn resolved(value: impl AsRef<str>, source: ExtractionSource) -> Self {
        let value = normalize_name(value.as_ref());
        if value.is_empty() {
            Self::Unresolved
        } else {
            Self::Resolved { value, source }
        }
    }

    /// Resolved value
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Resolved { value, .. } => Some(value),
            Self::Unresolved => None,
        }
    }

    /// Resolved source
    #[inline]
    #[must_use]
    pub fn source(&self) -> Option<ExtractionSource> {
        match self {
            Self::Resolved { source, .. } => Some(*source),
            Self::Unresolved => None,
        }
    }

    /// Whether resolved
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// This, or `other` if this is unresolved
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Unresolved => other,
            resolved => resolved,
        }
    }
}

/// Trim and collapse inner whitespace
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Candidate {user, application, role} triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// User reference
    pub user: Extraction,
    /// Application reference
    pub application: Extraction,
    /// Role reference
    pub role: Extraction,
    /// Mean per-field confidence in [0, 1]
    pub extraction_confidence: f64,
}

impl ExtractedEntities {
    /// Build from fields, computing confidence
    #[must_use]
    pub fn new(user: Extraction, application: Extraction, role: Extraction) -> Self {
        let extraction_confidence = [&user, &application, &role]
            .iter()
            .map(|e| e.source().map_or(0.0, ExtractionSource::weight))
            .sum::<f64>()
            / 3.0;
        Self {
            user,
            application,
            role,
            extraction_confidence,
        }
    }

    /// All fields unresolved
    #[must_use]
    pub fn unresolved() -> Self {
        Self::new(Extraction::Unresolved, Extraction::Unresolved, Extraction::Unresolved)
    }

    /// Field for `kind`
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> &Extraction {
        match kind {
            EntityKind::User => &self.user,
            EntityKind::Application => &self.application,
            EntityKind::Role => &self.role,
        }
    }

    /// Resolved value for `kind`
    #[inline]
    #[must_use]
    pub fn value(&self, kind: EntityKind) -> Option<&str> {
        self.get(kind).value()
    }

    /// Whether nothing was resolved
    #[must_use]
    pub fn all_unresolved(&self) -> bool {
        EntityKind::ALL.iter().all(|k| !self.get(*k).is_resolved())
    }
}

/// Entity store lookup result; `exists = false` is a normal outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// Kind
    pub kind: EntityKind,
    /// Primary key, when found
    pub id: Option<String>,
    /// Name as stored, or as requested when not found
    pub display_name: String,
    /// Whether a row matched
    pub exists: bool,
    /// Active flag; rows without a status column count as active
    pub active: bool,
}

impl ResolvedEntity {
    /// Not-found result for `name`
    pub fn missing(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: None,
            display_name: name.into(),
            exists: false,
            active: false,
        }
    }
}

/// Document returned by a vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    /// Document ID
    pub id: String,
    /// Text
    pub content: String,
    /// Flat metadata
    pub metadata: BTreeMap<String, String>,
    /// Similarity in [0, 1]
    pub score: f64,
}

/// Which validation path produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationPath {
    /// Retrieval plus model judgment
    Semantic,
    /// Generated SQL plus business rules
    Deterministic,
    /// Merged result of both
    Both,
}

/// Supporting record attached to a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    /// Document used as retrieval context
    RetrievedDocument {
        /// Document ID
        id: String,
        /// Similarity
        score: f64,
    },
    /// Model compliance judgment
    Judgment {
        /// Model says compliant
        compliant: bool,
        /// Model's own confidence
        model_confidence: f64,
        /// Model's reason
        reason: String,
    },
    /// Statement run against the entity store
    ExecutedQuery {
        /// Statement text
        sql: String,
        /// Bound parameters
        params: Vec<String>,
        /// Rows returned
        rows: usize,
    },
    /// Entity lookup result
    Entity(ResolvedEntity),
    /// Business rule outcome
    Rule {
        /// Rule name
        rule: String,
        /// Whether it passed
        passed: bool,
    },
    /// Semantic result retained for audit when the deterministic path decided
    SemanticConfidence {
        /// Semantic confidence
        confidence: f64,
        /// Semantic validity
        is_valid: bool,
        /// Semantic reason
        reason: String,
    },
}

/// Outcome of one validation path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Producing path
    pub path: ValidationPath,
    /// Whether the request is valid according to this path
    pub is_valid: bool,
    /// Confidence in [0, 1]; meaningful for the semantic path only
    pub confidence: f64,
    /// Human-readable reason
    pub reason: String,
    /// Supporting records
    pub evidence: Vec<Evidence>,
}

impl ValidationVerdict {
    /// Semantic verdict
    pub fn semantic(is_valid: bool, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            path: ValidationPath::Semantic,
            is_valid,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            evidence: Vec::new(),
        }
    }

    /// Deterministic verdict
    pub fn deterministic(is_valid: bool, reason: impl Into<String>) -> Self {
        Self {
            path: ValidationPath::Deterministic,
            is_valid,
            confidence: if is_valid { 1.0 } else { 0.0 },
            reason: reason.into(),
            evidence: Vec::new(),
        }
    }

    /// With evidence
    #[inline]
    #[must_use]
    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Final status reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    /// Request may proceed
    Valid,
    /// Request rejected
    Invalid,
    /// Pipeline fault
    Error,
}

impl DecisionStatus {
    /// Uppercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one per `validate()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    /// Status
    pub status: DecisionStatus,
    /// Human-readable reason
    pub reason: String,
    /// Request ID
    pub request_id: RequestId,
    /// Committed verdict, when a path ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
}

impl FinalDecision {
    /// Decision without a verdict
    pub fn new(status: DecisionStatus, reason: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            status,
            reason: reason.into(),
            request_id,
            verdict: None,
        }
    }

    /// With committed verdict
    #[inline]
    #[must_use]
    pub fn with_verdict(mut self, verdict: ValidationVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    /// Whether the status is VALID
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == DecisionStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_unresolved() {
        assert_eq!(Extraction::resolved("   ", ExtractionSource::Model), Extraction::Unresolved);
        assert_eq!(
            Extraction::resolved("  HR   Analyst ", ExtractionSource::Pattern).value(),
            Some("HR Analyst")
        );
    }

    #[test]
    fn confidence_is_mean_of_fields() {
        let entities = ExtractedEntities::new(
            Extraction::resolved("John Doe", ExtractionSource::Requester),
            Extraction::resolved("Workday", ExtractionSource::Pattern),
            Extraction::Unresolved,
        );
        assert!((entities.extraction_confidence - 0.6).abs() < 1e-9);
        assert!(!entities.all_unresolved());
        assert!(ExtractedEntities::unresolved().all_unresolved());
        assert_eq!(ExtractedEntities::unresolved().extraction_confidence, 0.0);
    }

    #[test]
    fn or_prefers_resolved() {
        let model = Extraction::resolved("Workday", ExtractionSource::Model);
        let pattern = Extraction::resolved("workday", ExtractionSource::Pattern);
        assert_eq!(model.clone().or(pattern.clone()), model);
        assert_eq!(Extraction::Unresolved.or(pattern.clone()), pattern);
    }

    #[test]
    fn extraction_serializes_as_tagged_variant() {
        let json = serde_json::to_value(Extraction::Unresolved).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "unresolved" }));
        let json = serde_json::to_value(Extraction::resolved("Workday", ExtractionSource::Model)).unwrap();
        assert_eq!(json["value"], "Workday");
        assert_eq!(json["source"], "model");
    }

    #[test]
    fn verdict_confidence_is_clamped() {
        assert_eq!(ValidationVerdict::semantic(true, 1.7, "x").confidence, 1.0);
        assert_eq!(ValidationVerdict::semantic(false, -0.2, "x").confidence, 0.0);
    }

    #[test]
    fn decision_status_display() {
        assert_eq!(DecisionStatus::Invalid.to_string(), "INVALID");
        let json = serde_json::to_value(DecisionStatus::Valid).unwrap();
        assert_eq!(json, "VALID");
    }
}
