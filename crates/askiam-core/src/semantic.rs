//! Semantic Validator (RAG path)
//!
//! Retrieves access records similar to the extracted entities and asks the
//! language model whether the combination is policy-compliant given that
//! context. Confidence blends the best retrieval similarity with the
//! model's own confidence.
//!
//! Read-only. Provider failures and unparseable judgments never escape:
//! they yield `is_valid = false, confidence = 0.0` with
//! [`SEMANTIC_UNAVAILABLE`] so the decision gate can fall back.

use crate::config::PipelineConfig;
use crate::error::ProviderError;
use crate::providers::{
    parse_json_object, with_timeout, LanguageModel, MetadataFilter, VectorStore,
};
use crate::trace::RequestTrace;
use crate::types::{
    AccessRequest, EntityKind, Evidence, ExtractedEntities, ScoredDocument, ValidationVerdict,
};
use askiam_sql::EntitySchema;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Reason reported when the semantic path could not produce a judgment
pub const SEMANTIC_UNAVAILABLE: &str = "semantic path unavailable";

/// Reason reported when retrieval found nothing to judge against
pub const NO_SIMILAR_RECORDS: &str = "no similar access records found";

/// Parsed compliance judgment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Judgment {
    /// Model says the request is compliant
    pub compliant: bool,
    /// Model's own confidence in [0, 1]
    pub confidence: f64,
    /// One-sentence reason
    pub reason: String,
}

impl Judgment {
    /// Parse a model reply
    ///
    /// Accepts `{"compliant": bool, "confidence": float, "reason": string}`
    /// (code fence tolerated) or a `VALID: <reason>` / `INVALID: <reason>`
    /// line. The line format carries no confidence and counts as certain.
    #[must_use]
    pub fn parse(reply: &str) -> Option<Self> {
        if let Ok(object) = parse_json_object(reply) {
            let compliant = object.get("compliant")?.as_bool()?;
            let confidence = object
                .get("confidence")
                .and_then(serde_json::Value::as_f64)
                .filter(|c| c.is_finite())
                .map_or(1.0, |c| c.clamp(0.0, 1.0));
            let reason = object
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            return Some(Self {
                compliant,
                confidence,
                reason,
            });
        }

        let line = reply.trim();
        let (compliant, rest) = if let Some(rest) = verdict_word(line, "INVALID") {
            (false, rest)
        } else if let Some(rest) = verdict_word(line, "VALID") {
            (true, rest)
        } else {
            return None;
        };
        Some(Self {
            compliant,
            confidence: 1.0,
            reason: rest.trim_start_matches([':', ' ', '-']).trim().to_string(),
        })
    }
}

/// Text after `word` when the line opens with it as a whole word
fn verdict_word<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(word)?;
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(rest),
    }
}

/// Semantic validator
#[derive(Clone)]
pub struct SemanticValidator {
    model: Option<Arc<dyn LanguageModel>>,
    store: Option<Arc<dyn VectorStore>>,
    schema: EntitySchema,
    k: usize,
    retrieval_weight: f64,
    min_similarity: f64,
    timeout: Duration,
}

impl SemanticValidator {
    /// Validator without providers; every call reports unavailable until
    /// both a model and a vector store are attached
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            model: None,
            store: None,
            schema: config.schema.clone(),
            k: config.retrieval_k,
            retrieval_weight: config.retrieval_weight,
            min_similarity: config.min_similarity,
            timeout: config.tool_timeout(),
        }
    }

    /// With language model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// With vector store
    #[inline]
    #[must_use]
    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Whether both providers are attached
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.model.is_some() && self.store.is_some()
    }

    /// Validate the extracted triple against retrieved access records
    pub async fn validate(
        &self,
        request: &AccessRequest,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
    ) -> ValidationVerdict {
        let (Some(model), Some(store)) = (&self.model, &self.store) else {
            tracing::debug!("semantic path has no providers");
            return unavailable();
        };

        let documents = match self.retrieve(store.as_ref(), entities, trace).await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!(error = %e, "semantic retrieval failed");
                return unavailable();
            }
        };
        if documents.is_empty() {
            return ValidationVerdict::semantic(false, 0.0, NO_SIMILAR_RECORDS);
        }

        let judged = self
            .judge(model.as_ref(), request, entities, &documents, trace)
            .await;
        let judgment = match judged {
            Ok(Some(judgment)) => judgment,
            Ok(None) => return unavailable(),
            Err(e) => {
                tracing::warn!(error = %e, "compliance judgment failed");
                return unavailable();
            }
        };

        let best = documents.iter().map(|d| d.score).fold(0.0_f64, f64::max);
        let confidence =
            self.retrieval_weight * best + (1.0 - self.retrieval_weight) * judgment.confidence;
        let reason = if judgment.reason.is_empty() {
            if judgment.compliant {
                "consistent with existing access records".to_string()
            } else {
                "inconsistent with existing access records".to_string()
            }
        } else {
            judgment.reason.clone()
        };
        tracing::debug!(confidence, compliant = judgment.compliant, "semantic verdict");

        let mut evidence: Vec<Evidence> = documents
            .iter()
            .map(|d| Evidence::RetrievedDocument {
                id: d.id.clone(),
                score: d.score,
            })
            .collect();
        evidence.push(Evidence::Judgment {
            compliant: judgment.compliant,
            model_confidence: judgment.confidence,
            reason: judgment.reason,
        });
        ValidationVerdict::semantic(judgment.compliant, confidence, reason).with_evidence(evidence)
    }

    /// Query text built from resolved names, most specific first
    #[must_use]
    pub fn query_text(entities: &ExtractedEntities) -> String {
        [EntityKind::Role, EntityKind::Application, EntityKind::User]
            .into_iter()
            .filter_map(|kind| entities.value(kind))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn role_filter(&self, entities: &ExtractedEntities) -> Option<MetadataFilter> {
        let role = entities.value(EntityKind::Role);
        let application = entities.value(EntityKind::Application);
        if role.is_none() && application.is_none() {
            return None;
        }
        let mut filter = MetadataFilter::new();
        filter.insert("type".to_string(), EntityKind::Role.as_str().to_string());
        if let Some(role) = role {
            filter.insert(self.schema.roles.name_column.clone(), role.to_string());
        }
        if let Some(application) = application {
            filter.insert(self.schema.roles.app_column.clone(), application.to_string());
        }
        Some(filter)
    }

    /// Filtered search first, unfiltered when that finds nothing
    async fn retrieve(
        &self,
        store: &dyn VectorStore,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        let query = Self::query_text(entities);
        if let Some(filter) = self.role_filter(entities) {
            let documents = self
                .search(store, "vector_search", &query, Some(&filter), trace)
                .await?;
            if !documents.is_empty() {
                return Ok(documents);
            }
        }
        self.search(store, "vector_search_unfiltered", &query, None, trace)
            .await
    }

    async fn search(
        &self,
        store: &dyn VectorStore,
        tool: &str,
        query: &str,
        filter: Option<&MetadataFilter>,
        trace: RequestTrace<'_>,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        let span = trace.tool(tool, &json!({ "query": query, "k": self.k, "filter": filter }));
        let search = store.similarity_search(query, self.k, filter);
        match with_timeout(tool, self.timeout, search).await {
            Ok(mut documents) => {
                documents.retain(|d| d.score >= self.min_similarity);
                documents.truncate(self.k);
                let summary: Vec<_> = documents
                    .iter()
                    .map(|d| json!({ "id": &d.id, "score": d.score }))
                    .collect();
                span.complete(&summary);
                Ok(documents)
            }
            Err(e) => {
                span.fail(&e.to_string());
                Err(e)
            }
        }
    }

    async fn judge(
        &self,
        model: &dyn LanguageModel,
        request: &AccessRequest,
        entities: &ExtractedEntities,
        documents: &[ScoredDocument],
        trace: RequestTrace<'_>,
    ) -> Result<Option<Judgment>, ProviderError> {
        let prompt = judgment_prompt(request, entities, documents);
        let span = trace.tool(
            "compliance_judgment",
            &json!({ "model": model.name(), "prompt": &prompt }),
        );
        let completion = model.complete(&prompt);
        let reply = match with_timeout("compliance_judgment", self.timeout, completion).await {
            Ok(reply) => reply,
            Err(e) => {
                span.fail(&e.to_string());
                return Err(e);
            }
        };
        if let Some(judgment) = Judgment::parse(&reply) {
            span.complete(&json!({ "reply": &reply, "judgment": &judgment }));
            Ok(Some(judgment))
        } else {
            tracing::warn!(reply = %reply, "unparseable compliance judgment");
            span.fail(&json!({ "reply": &reply, "error": "unparseable judgment" }));
            Ok(None)
        }
    }
}

impl std::fmt::Debug for SemanticValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticValidator")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("store", &self.store.is_some())
            .field("k", &self.k)
            .field("retrieval_weight", &self.retrieval_weight)
            .finish_non_exhaustive()
    }
}

fn unavailable() -> ValidationVerdict {
    ValidationVerdict::semantic(false, 0.0, SEMANTIC_UNAVAILABLE)
}

fn judgment_prompt(
    request: &AccessRequest,
    entities: &ExtractedEntities,
    documents: &[ScoredDocument],
) -> String {
    let field = |kind| entities.value(kind).unwrap_or("unresolved");
    let context = documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an IAM access validation assistant.\n\n\
         User request:\n\"{text}\"\n\n\
         Extracted entities: user={user}, application={application}, role={role}\n\n\
         IAM metadata:\n{context}\n\n\
         Is this combination policy-compliant given the metadata above?\n\
         Rules:\n\
         - Respond ONLY with JSON {{\"compliant\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"...\"}}\n\
         - or with a single line VALID: <reason> or INVALID: <reason>\n\
         - One sentence only, no extra text",
        text = request.raw_text,
        user = field(EntityKind::User),
        application = field(EntityKind::Application),
        role = field(EntityKind::Role),
    )
}
