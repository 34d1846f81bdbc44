//! End-to-end validation scenarios over the fixture entity store

use askiam_core::deterministic::UNSAFE_QUERY_REASON;
use askiam_core::orchestrator::{DETERMINISTIC_PASSED, EMPTY_REQUEST};
use askiam_core::prelude::*;
use askiam_core::{Evidence, ModelSqlGenerator, ValidationPath};
use askiam_test_utils::{
    fixture_pipeline, fixture_store, ScriptedModel, ScriptedVectorStore, SlowProvider,
    JUDGMENT_PROMPT, SQL_PROMPT,
};
use askiam_trace::EntryStatus;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const REQUEST: &str = "I need HR Analyst in Workday";

fn names(export: &TraceExport) -> Vec<&str> {
    export.entries.iter().map(|e| e.name.as_str()).collect()
}

#[tokio::test]
async fn confident_semantic_match_is_valid() {
    let model = ScriptedModel::new().reply(
        JUDGMENT_PROMPT,
        r#"{"compliant": true, "confidence": 0.98, "reason": "HR Analyst is a Workday role and the user holds no conflicting access"}"#,
    );
    let orchestrator = fixture_pipeline(
        PipelineConfig::default(),
        Some(Arc::new(model)),
        Some(Arc::new(ScriptedVectorStore::single(0.96))),
    );
    let session = TraceSession::open();

    let request = AccessRequest::new(REQUEST).with_requester("John Doe");
    let decision = orchestrator.validate_request(request, &session).await;

    assert_eq!(decision.status, DecisionStatus::Valid);
    assert!(decision.reason.starts_with("semantic match (confidence 0.97)"));
    let verdict = decision.verdict.unwrap();
    assert_eq!(verdict.path, ValidationPath::Semantic);

    let export = session.close().unwrap();
    let names = names(&export);
    assert!(names.contains(&"extract_user"));
    assert!(names.contains(&"compliance_judgment"));
    assert!(!names.contains(&"deterministic_validation"));
    assert_eq!(names.last(), Some(&"finalize"));
}

#[tokio::test(start_paused = true)]
async fn semantic_timeout_falls_back_to_deterministic() {
    let model = ScriptedModel::new().reply(JUDGMENT_PROMPT, "VALID: never consulted");
    let slow_store = SlowProvider::new(ScriptedVectorStore::single(0.99), Duration::from_secs(30));
    let orchestrator = fixture_pipeline(
        PipelineConfig::default().with_tool_timeout(1.0),
        Some(Arc::new(model)),
        Some(Arc::new(slow_store)),
    );
    let session = TraceSession::open();

    let request = AccessRequest::new(REQUEST).with_requester("John Doe");
    let decision = orchestrator.validate_request(request, &session).await;

    assert_eq!(decision.status, DecisionStatus::Valid);
    assert_eq!(decision.reason, DETERMINISTIC_PASSED);
    let verdict = decision.verdict.unwrap();
    assert!(verdict.evidence.iter().any(|e| matches!(
        e,
        Evidence::ExecutedQuery { sql, params, rows: 1 }
            if sql == "SELECT * FROM Roles WHERE role_name = ? AND app_name = ?"
                && params == &["HR Analyst".to_string(), "Workday".to_string()]
    )));

    let export = session.close().unwrap();
    let search = export
        .entries
        .iter()
        .find(|e| e.name == "vector_search")
        .unwrap();
    assert_eq!(search.status, EntryStatus::Failed);
    assert!(names(&export).contains(&"deterministic_validation"));
}

#[tokio::test]
async fn empty_input_is_rejected_without_tool_calls() {
    let model = Arc::new(ScriptedModel::new());
    let orchestrator = fixture_pipeline(
        PipelineConfig::default(),
        Some(model.clone()),
        Some(Arc::new(ScriptedVectorStore::single(1.0))),
    );
    let session = TraceSession::open();

    let decision = orchestrator.validate("", &session).await;

    assert_eq!(decision.status, DecisionStatus::Invalid);
    assert_eq!(decision.reason, EMPTY_REQUEST);
    assert_eq!(model.calls(), 0);
    let export = session.close().unwrap();
    assert_eq!(names(&export), ["reject_empty_request"]);
    assert_eq!(export.tool_count(), 0);
}

#[tokio::test]
async fn injected_statement_is_never_executed() {
    let config = PipelineConfig::default().with_deterministic_mode(DeterministicMode::Always);
    let model = Arc::new(
        ScriptedModel::new()
            .reply(SQL_PROMPT, "SELECT * FROM Users; DROP TABLE Users;")
            .reply(
                JUDGMENT_PROMPT,
                r#"{"compliant": true, "confidence": 1.0, "reason": "matches peers"}"#,
            ),
    );
    let generator = ModelSqlGenerator::new(model.clone(), config.schema.clone(), config.tool_timeout());
    let orchestrator = Orchestrator::builder(config.clone())
        .with_model(model.clone())
        .with_vector_store(Arc::new(ScriptedVectorStore::single(1.0)))
        .with_relational_store(fixture_store(&config.schema))
        .with_sql_generator(Arc::new(generator))
        .build()
        .unwrap();
    let session = TraceSession::open();

    let request = AccessRequest::new(REQUEST).with_requester("John Doe");
    let decision = orchestrator.validate_request(request, &session).await;

    assert_eq!(decision.status, DecisionStatus::Invalid);
    assert_eq!(decision.reason, UNSAFE_QUERY_REASON);
    let verdict = decision.verdict.unwrap();
    assert_eq!(verdict.path, ValidationPath::Both);
    assert!(verdict
        .evidence
        .iter()
        .any(|e| matches!(e, Evidence::SemanticConfidence { is_valid: true, .. })));

    let export = session.close().unwrap();
    let validate = export.entries.iter().find(|e| e.name == "sql_validate").unwrap();
    assert_eq!(validate.status, EntryStatus::Failed);
    assert!(!names(&export).contains(&"entity_store_query"));
}

#[tokio::test]
async fn unknown_role_is_invalid_on_both_paths() {
    let model = ScriptedModel::new().reply(
        JUDGMENT_PROMPT,
        "INVALID: no access record mentions a Quantum Wizard role",
    );
    let orchestrator = fixture_pipeline(
        PipelineConfig::default(),
        Some(Arc::new(model)),
        Some(Arc::new(ScriptedVectorStore::single(0.2))),
    );
    let session = TraceSession::open();

    let request = AccessRequest::new("I need Quantum Wizard in Workday").with_requester("John Doe");
    let decision = orchestrator.validate_request(request, &session).await;

    assert_eq!(decision.status, DecisionStatus::Invalid);
    assert_eq!(decision.reason, "role not found");
    let verdict = decision.verdict.unwrap();
    assert!(verdict.evidence.iter().any(|e| matches!(
        e,
        Evidence::SemanticConfidence { is_valid: false, .. }
    )));
}

#[tokio::test]
async fn role_under_other_application_names_the_mismatch() {
    let orchestrator = fixture_pipeline(
        PipelineConfig::default().with_extraction_mode(ExtractionMode::PatternsOnly),
        None,
        None,
    );
    let session = TraceSession::open();

    let request = AccessRequest::new("I need Payroll Admin in Workday").with_requester("John Doe");
    let decision = orchestrator.validate_request(request, &session).await;

    assert_eq!(decision.status, DecisionStatus::Invalid);
    assert_eq!(decision.reason, "role not found in application");
}

#[tokio::test]
async fn inactive_user_is_refused() {
    let orchestrator = fixture_pipeline(
        PipelineConfig::default().with_extraction_mode(ExtractionMode::PatternsOnly),
        None,
        None,
    );
    let session = TraceSession::open();

    let decision = orchestrator
        .validate("Grant HR Analyst in Workday for user Former Employee", &session)
        .await;

    assert_eq!(decision.status, DecisionStatus::Invalid);
    assert_eq!(decision.reason, "user is inactive");
}

#[tokio::test]
async fn user_can_be_named_by_email() {
    let orchestrator = fixture_pipeline(
        PipelineConfig::default().with_extraction_mode(ExtractionMode::PatternsOnly),
        None,
        None,
    );
    let session = TraceSession::open();

    let decision = orchestrator
        .validate("Please grant HR Analyst in Workday for john.doe@example.com", &session)
        .await;

    assert_eq!(decision.status, DecisionStatus::Valid, "{}", decision.reason);
    let verdict = decision.verdict.unwrap();
    assert!(verdict.evidence.iter().any(|e| matches!(
        e,
        Evidence::ExecutedQuery { sql, .. } if sql == "SELECT * FROM Users WHERE email = ?"
    )));
}

#[tokio::test]
async fn session_spans_multiple_requests() {
    let orchestrator = fixture_pipeline(
        PipelineConfig::default().with_extraction_mode(ExtractionMode::PatternsOnly),
        None,
        None,
    );
    let session = TraceSession::open();

    let first = orchestrator
        .validate_request(AccessRequest::new(REQUEST).with_requester("John Doe"), &session)
        .await;
    let second = orchestrator.validate("  ", &session).await;

    let export = session.close().unwrap();
    assert_eq!(export.total_requests, 2);
    assert_eq!(export.total_steps, export.entries.len() as u64);
    assert!(export.verify_integrity().is_ok());
    assert!(export
        .entries
        .iter()
        .all(|e| e.request_id == Some(first.request_id) || e.request_id == Some(second.request_id)));
}
