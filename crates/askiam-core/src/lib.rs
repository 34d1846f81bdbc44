//! AskIAM Core - access request validation pipeline
//!
//! Validates natural-language IAM access requests ("I need HR Analyst in
//! Workday") against an authoritative entity store:
//! - Extracts a candidate {user, application, role} triple
//! - Tries the semantic path (retrieval + model judgment) first
//! - Falls back to the deterministic path (generated, safety-checked SQL +
//!   business rules) unless the semantic result clears the threshold
//! - Records every node and tool invocation into the session trace
//!
//! # Example
//!
//! ```rust
//! use askiam_core::prelude::*;
//! use askiam_core::providers::memory::{EntitySeed, InMemoryEntityStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), askiam_core::AskIamError> {
//! let config = PipelineConfig::new().with_extraction_mode(ExtractionMode::PatternsOnly);
//! let store = InMemoryEntityStore::from_seed(&config.schema, &EntitySeed::default());
//! let orchestrator = Orchestrator::builder(config)
//!     .with_relational_store(Arc::new(store))
//!     .build()?;
//!
//! let session = TraceSession::open();
//! let decision = orchestrator.validate("I need HR Analyst in Workday", &session).await;
//! assert_eq!(decision.status, DecisionStatus::Invalid);
//! assert_eq!(decision.reason, "user not specified");
//!
//! let export = session.close()?;
//! assert!(export.verify_integrity().is_ok());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod config;
pub mod deterministic;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod orchestrator;
pub mod providers;
pub mod semantic;
pub mod state;
pub mod trace;
pub mod types;

// Re-exports for convenience
pub use config::{DeterministicMode, ExtractionMode, PipelineConfig, MAX_RETRIEVAL_K};
pub use deterministic::{DeterministicValidator, ModelSqlGenerator};
pub use error::{AskIamError, ConfigError, EmptyRequestError, PipelineFault, ProviderError};
pub use extractor::EntityExtractor;
pub use gateway::{EntityStore, QueryOutcome};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use providers::{LanguageModel, MetadataFilter, RelationalStore, Row, VectorStore};
pub use semantic::{Judgment, SemanticValidator};
pub use state::{allowed_transitions, validate_transition, PipelineState};
pub use trace::RequestTrace;
pub use types::{
    AccessRequest, DecisionStatus, EntityKind, Evidence, ExtractedEntities, Extraction,
    ExtractionSource, FinalDecision, ResolvedEntity, ScoredDocument, ValidationPath,
    ValidationVerdict,
};

pub use askiam_trace::{TraceExport, TraceRecorder, TraceSession};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the pipeline
    pub use crate::{
        AccessRequest, DecisionStatus, DeterministicMode, ExtractionMode, FinalDecision,
        LanguageModel, Orchestrator, PipelineConfig, RelationalStore, TraceExport, TraceRecorder,
        TraceSession, VectorStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
