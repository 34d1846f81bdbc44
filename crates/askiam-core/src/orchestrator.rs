//! Decision Gate / Orchestrator
//!
//! Sequences extraction and the two validation paths for one request and
//! commits exactly one [`FinalDecision`]. Panics, illegal state transitions
//! and the overall request deadline are caught here and reported as
//! `DecisionStatus::Error`; nothing else escapes as an error.

use crate::config::{DeterministicMode, PipelineConfig};
use crate::deterministic::DeterministicValidator;
use crate::error::{AskIamError, ConfigError, PipelineFault};
use crate::extractor::EntityExtractor;
use crate::providers::{LanguageModel, RelationalStore, VectorStore};
use crate::semantic::SemanticValidator;
use crate::state::{PipelineState, StateTracker};
use crate::trace::RequestTrace;
use crate::types::{
    AccessRequest, DecisionStatus, Evidence, ExtractedEntities, FinalDecision, ValidationPath,
    ValidationVerdict,
};
use askiam_sql::SqlGenerator;
use askiam_trace::{EntryStatus, TraceRecorder};
use futures::future::Either;
use futures::FutureExt;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Reason for blank input
pub const EMPTY_REQUEST: &str = "empty request";

/// Reason when extraction resolved nothing
pub const NO_ENTITIES: &str = "no extractable entities";

/// Reason when the deterministic path passed
pub const DETERMINISTIC_PASSED: &str = "deterministic checks passed";

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: PipelineConfig,
    model: Option<Arc<dyn LanguageModel>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    relational_store: Option<Arc<dyn RelationalStore>>,
    sql_generator: Option<Arc<dyn SqlGenerator>>,
}

impl OrchestratorBuilder {
    /// Builder for `config`
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Language model for extraction and compliance judgment
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Vector store for retrieval and known-entity hints
    #[inline]
    #[must_use]
    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Entity store (required)
    #[inline]
    #[must_use]
    pub fn with_relational_store(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.relational_store = Some(store);
        self
    }

    /// SQL generator; defaults to the template generator
    #[inline]
    #[must_use]
    pub fn with_sql_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.sql_generator = Some(generator);
        self
    }

    /// Validate the configuration and assemble the pipeline
    ///
    /// # Errors
    /// - `AskIamError::Config` if the configuration is invalid or no
    ///   relational store was supplied
    pub fn build(self) -> Result<Orchestrator, AskIamError> {
        self.config.validate()?;
        let store = self
            .relational_store
            .ok_or(ConfigError::MissingProvider("relational_store"))?;

        let mut extractor = EntityExtractor::new(&self.config);
        let mut semantic = SemanticValidator::new(&self.config);
        if let Some(model) = &self.model {
            extractor = extractor.with_model(Arc::clone(model));
            semantic = semantic.with_model(Arc::clone(model));
        }
        if let Some(store) = &self.vector_store {
            extractor = extractor.with_vector_store(Arc::clone(store));
            semantic = semantic.with_vector_store(Arc::clone(store));
        }
        let mut deterministic = DeterministicValidator::new(&self.config, store);
        if let Some(generator) = self.sql_generator {
            deterministic = deterministic.with_generator(generator);
        }
        if !semantic.is_available() {
            tracing::info!("semantic path disabled: language model and vector store required");
        }

        Ok(Orchestrator {
            config: self.config,
            extractor,
            semantic,
            deterministic,
        })
    }
}

/// Validation pipeline entry point
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: PipelineConfig,
    extractor: EntityExtractor,
    semantic: SemanticValidator,
    deterministic: DeterministicValidator,
}

impl Orchestrator {
    /// Start building a pipeline for `config`
    #[must_use]
    pub fn builder(config: PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate raw request text
    pub async fn validate(&self, raw_text: &str, recorder: &dyn TraceRecorder) -> FinalDecision {
        self.validate_request(AccessRequest::new(raw_text), recorder).await
    }

    /// Validate a request, recording every step into `recorder`
    ///
    /// Always returns exactly one decision.
    pub async fn validate_request(
        &self,
        request: AccessRequest,
        recorder: &dyn TraceRecorder,
    ) -> FinalDecision {
        let id = request.request_id;
        recorder.begin_request(id);
        let trace = RequestTrace::new(recorder, id);
        tracing::info!(
            request_id = %id,
            mode = self.config.deterministic_mode.as_str(),
            "validating access request"
        );

        if request.is_blank() {
            trace.record_node(
                "reject_empty_request",
                &json!({ "raw_text": &request.raw_text }),
                EMPTY_REQUEST,
                EntryStatus::Failed,
            );
            tracing::info!(request_id = %id, "rejected empty request");
            return FinalDecision::new(DecisionStatus::Invalid, EMPTY_REQUEST, id);
        }

        let mut state = StateTracker::new();
        let run = AssertUnwindSafe(self.run(&request, trace, &mut state)).catch_unwind();
        let outcome = tokio::time::timeout(self.config.request_timeout(), run).await;
        let decision = match outcome {
            Ok(Ok(Ok(decision))) => decision,
            Ok(Ok(Err(fault))) => faulted(trace, &mut state, &fault),
            Ok(Err(payload)) => faulted(trace, &mut state, &PipelineFault::from_panic(&*payload)),
            Err(_) => faulted(
                trace,
                &mut state,
                &PipelineFault::RequestTimeout(self.config.request_timeout_seconds),
            ),
        };
        tracing::info!(
            request_id = %id,
            status = %decision.status,
            reason = %decision.reason,
            "final decision"
        );
        decision
    }

    async fn run(
        &self,
        request: &AccessRequest,
        trace: RequestTrace<'_>,
        state: &mut StateTracker,
    ) -> Result<FinalDecision, PipelineFault> {
        let id = request.request_id;

        let span = trace.node(
            "extract_entities",
            &json!({ "raw_text": &request.raw_text, "requester": &request.requester }),
        );
        let entities = match guarded(self.extractor.extract(request, trace)).await {
            Ok(Ok(entities)) => {
                span.complete(&entities);
                entities
            }
            Ok(Err(empty)) => {
                span.fail(&empty.to_string());
                state.advance(PipelineState::Finalized)?;
                return Ok(FinalDecision::new(DecisionStatus::Invalid, EMPTY_REQUEST, id));
            }
            Err(fault) => {
                span.fault(&fault.to_string());
                return Err(fault);
            }
        };
        state.advance(PipelineState::Extracted)?;

        let decision = if entities.all_unresolved() {
            tracing::debug!(request_id = %id, "no extractable entities");
            FinalDecision::new(DecisionStatus::Invalid, NO_ENTITIES, id)
        } else {
            match self.config.deterministic_mode {
                DeterministicMode::Fallback => {
                    self.fallback(request, &entities, trace, state).await?
                }
                DeterministicMode::Always => self.always(request, &entities, trace, state).await?,
                DeterministicMode::Speculative => {
                    self.speculative(request, &entities, trace, state).await?
                }
            }
        };

        let from = state.current();
        state.advance(PipelineState::Finalized)?;
        trace.record_node(
            "finalize",
            &json!({ "mode": self.config.deterministic_mode.as_str(), "from": from }),
            &decision,
            EntryStatus::Completed,
        );
        Ok(decision)
    }

    /// Deterministic only when the semantic result is not accepted
    async fn fallback(
        &self,
        request: &AccessRequest,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
        state: &mut StateTracker,
    ) -> Result<FinalDecision, PipelineFault> {
        state.advance(PipelineState::SemanticAttempted)?;
        let semantic = self.semantic_step(request, entities, trace).await?;
        if self.accepts(&semantic) {
            state.advance(PipelineState::Accepted)?;
            return Ok(semantic_decision(semantic, request));
        }
        tracing::debug!(
            confidence = semantic.confidence,
            is_valid = semantic.is_valid,
            "semantic result not accepted; running deterministic path"
        );
        state.advance(PipelineState::DeterministicAttempted)?;
        let deterministic = self.deterministic_step(entities, trace).await?;
        Ok(merge(Some(&semantic), deterministic, request))
    }

    /// Both paths to completion; deterministic is authoritative
    async fn always(
        &self,
        request: &AccessRequest,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
        state: &mut StateTracker,
    ) -> Result<FinalDecision, PipelineFault> {
        state.advance(PipelineState::SemanticAttempted)?;
        let (semantic, deterministic) = futures::join!(
            self.semantic_step(request, entities, trace),
            self.deterministic_step(entities, trace)
        );
        let (semantic, deterministic) = (semantic?, deterministic?);
        state.advance(PipelineState::DeterministicAttempted)?;
        Ok(merge(Some(&semantic), deterministic, request))
    }

    /// Both paths race; the first committable result wins and the other is
    /// dropped, which records its open trace spans as cancelled
    async fn speculative(
        &self,
        request: &AccessRequest,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
        state: &mut StateTracker,
    ) -> Result<FinalDecision, PipelineFault> {
        state.advance(PipelineState::SemanticAttempted)?;
        let semantic = Box::pin(self.semantic_step(request, entities, trace));
        let deterministic = Box::pin(self.deterministic_step(entities, trace));

        match futures::future::select(semantic, deterministic).await {
            Either::Left((semantic, pending)) => {
                let semantic = semantic?;
                if self.accepts(&semantic) {
                    drop(pending);
                    state.advance(PipelineState::Accepted)?;
                    return Ok(semantic_decision(semantic, request));
                }
                state.advance(PipelineState::DeterministicAttempted)?;
                let deterministic = pending.await?;
                Ok(merge(Some(&semantic), deterministic, request))
            }
            Either::Right((deterministic, pending)) => {
                let deterministic = deterministic?;
                drop(pending);
                tracing::debug!("deterministic path finished first; semantic path cancelled");
                state.advance(PipelineState::DeterministicAttempted)?;
                Ok(merge(None, deterministic, request))
            }
        }
    }

    fn accepts(&self, semantic: &ValidationVerdict) -> bool {
        semantic.is_valid && semantic.confidence >= self.config.rag_confidence_threshold
    }

    async fn semantic_step(
        &self,
        request: &AccessRequest,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
    ) -> Result<ValidationVerdict, PipelineFault> {
        let span = trace.node("semantic_validation", entities);
        match guarded(self.semantic.validate(request, entities, trace)).await {
            Ok(verdict) => {
                span.complete(&verdict);
                Ok(verdict)
            }
            Err(fault) => {
                span.fault(&fault.to_string());
                Err(fault)
            }
        }
    }

    async fn deterministic_step(
        &self,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
    ) -> Result<ValidationVerdict, PipelineFault> {
        let span = trace.node(
            "deterministic_validation",
            &json!({ "generator": self.deterministic.generator_name(), "entities": entities }),
        );
        match guarded(self.deterministic.validate(entities, trace)).await {
            Ok(verdict) => {
                span.complete(&verdict);
                Ok(verdict)
            }
            Err(fault) => {
                span.fault(&fault.to_string());
                Err(fault)
            }
        }
    }
}

/// Run a component future, converting a panic into a fault
async fn guarded<F: Future>(future: F) -> Result<F::Output, PipelineFault> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| PipelineFault::from_panic(&*payload))
}

fn faulted(
    trace: RequestTrace<'_>,
    state: &mut StateTracker,
    fault: &PipelineFault,
) -> FinalDecision {
    let from = state.current();
    if let Err(e) = state.advance(PipelineState::Error) {
        tracing::warn!(error = %e, "fault raised after the decision was finalized");
    }
    tracing::error!(
        request_id = %trace.request_id(),
        from = %from,
        error = %fault,
        "pipeline fault"
    );
    trace.record_node(
        "pipeline_fault",
        &json!({ "from": from }),
        &fault.to_string(),
        EntryStatus::Faulted,
    );
    FinalDecision::new(DecisionStatus::Error, fault.to_string(), trace.request_id())
}

fn semantic_decision(semantic: ValidationVerdict, request: &AccessRequest) -> FinalDecision {
    let reason = format!(
        "semantic match (confidence {:.2}): {}",
        semantic.confidence, semantic.reason
    );
    FinalDecision::new(DecisionStatus::Valid, reason, request.request_id).with_verdict(semantic)
}

/// Deterministic result is authoritative; semantic result kept for audit
fn merge(
    semantic: Option<&ValidationVerdict>,
    deterministic: ValidationVerdict,
    request: &AccessRequest,
) -> FinalDecision {
    let (status, reason) = if deterministic.is_valid {
        (DecisionStatus::Valid, DETERMINISTIC_PASSED.to_string())
    } else {
        (DecisionStatus::Invalid, deterministic.reason.clone())
    };
    let verdict = match semantic {
        Some(semantic) => {
            let mut evidence = deterministic.evidence;
            evidence.push(Evidence::SemanticConfidence {
                confidence: semantic.confidence,
                is_valid: semantic.is_valid,
                reason: semantic.reason.clone(),
            });
            ValidationVerdict {
                path: ValidationPath::Both,
                evidence,
                ..deterministic
            }
        }
        None => deterministic,
    };
    FinalDecision::new(status, reason, request.request_id).with_verdict(verdict)
}
