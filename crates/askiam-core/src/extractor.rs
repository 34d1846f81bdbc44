//! Entity Extractor
//!
//! Turns free request text into a candidate {user, application, role}
//! triple. Extraction is total: every failure below the empty-text check
//! degrades the affected field to [`Extraction::Unresolved`].
//!
//! Sources, in precedence order:
//! 1. Language model, one call per field, issued concurrently
//! 2. Regex patterns over the request text
//! 3. The authenticated requester (user field only)

use crate::config::{ExtractionMode, PipelineConfig};
use crate::error::{EmptyRequestError, ProviderError};
use crate::providers::{parse_json_object, with_timeout, LanguageModel, VectorStore};
use crate::trace::RequestTrace;
use crate::types::{AccessRequest, EntityKind, ExtractedEntities, Extraction, ExtractionSource};
use askiam_sql::EntitySchema;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Documents fetched once per request for known-entity hints
const HINT_DOCUMENTS: usize = 5;

/// Values a model or pattern may return for "the person asking"
const SELF_REFERENCES: [&str; 5] = ["me", "i", "myself", "self", "requester"];

// Pattern sources, matched case-insensitively unless noted
const VERB_ROLE_IN_APP: &str = r"(?i)\b(?:need|needs|want|wants|request|requests|requesting|require|requires|grant|assign|give)\s+(?:me\s+)?(?:access\s+to\s+)?(?:the\s+)?(?:role\s+(?:of\s+)?)?(?:an?\s+)?(?P<role>\w[\w\-]*(?:\s+\w[\w\-]*)*?)\s+(?:role\s+|access\s+)?(?:in|for|on|to)\s+(?:the\s+)?(?P<app>\w[\w\-]*(?:\s+\w[\w\-]*)*?)(?:\s+(?:app|application|system))?(?:\s+for\b|\s+please\b|\s*[.,!?;]|\s*$)";
const THE_ROLE_IN_APP: &str = r"(?i)\bthe\s+(?P<role>\w[\w\-]*(?:\s+\w[\w\-]*)*?)\s+role\s+(?:in|for|on)\s+(?:the\s+)?(?P<app>\w[\w\-]*(?:\s+\w[\w\-]*)*?)(?:\s+(?:app|application|system))?(?:\s+for\b|\s+please\b|\s*[.,!?;]|\s*$)";
const FOR_USER: &str = r"(?i:\b(?:for|to)\s+user\s+|\bon\s+behalf\s+of\s+)(?P<user>[\w.'\-]+(?:\s+[A-Z][\w.'\-]*)?)";
const EMAIL: &str = r"(?P<user>[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,})";
// Case-sensitive: a capitalised full name opening the request
const LEADING_NAME: &str = r"^\s*(?P<user>[A-Z][\w'\-]*(?:\s+[A-Z][\w'\-]*)+)\s+(?i:needs|wants|requests|requires)\b";

/// Compiled extraction patterns
#[derive(Debug, Clone)]
struct PatternSet {
    role_and_app: Vec<Regex>,
    user: Vec<Regex>,
}

impl PatternSet {
    fn compile() -> Self {
        let compile = |sources: &[&str]| -> Vec<Regex> {
            sources
                .iter()
                .filter_map(|source| match Regex::new(source) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        tracing::error!(error = %e, "extraction pattern failed to compile");
                        None
                    }
                })
                .collect()
        };
        Self {
            role_and_app: compile(&[VERB_ROLE_IN_APP, THE_ROLE_IN_APP]),
            user: compile(&[FOR_USER, EMAIL, LEADING_NAME]),
        }
    }

    /// First match for each field; earlier patterns win
    fn extract(&self, text: &str) -> PatternMatches {
        let mut matches = PatternMatches::default();
        for regex in &self.role_and_app {
            if matches.role.is_resolved() && matches.application.is_resolved() {
                break;
            }
            if let Some(caps) = regex.captures(text) {
                if let Some(role) = caps.name("role") {
                    matches.role = matches.role.or(pattern_value(role.as_str()));
                }
                if let Some(app) = caps.name("app") {
                    matches.application = matches.application.or(pattern_value(app.as_str()));
                }
            }
        }
        for regex in &self.user {
            if matches.user.is_resolved() {
                break;
            }
            if let Some(user) = regex.captures(text).and_then(|caps| caps.name("user")) {
                matches.user = pattern_value(user.as_str());
            }
        }
        matches
    }
}

#[derive(Debug, Clone, Serialize)]
struct PatternMatches {
    user: Extraction,
    application: Extraction,
    role: Extraction,
}

impl Default for PatternMatches {
    fn default() -> Self {
        Self {
            user: Extraction::Unresolved,
            application: Extraction::Unresolved,
            role: Extraction::Unresolved,
        }
    }
}

fn pattern_value(raw: &str) -> Extraction {
    if is_self_reference(raw) {
        Extraction::Unresolved
    } else {
        Extraction::resolved(raw, ExtractionSource::Pattern)
    }
}

fn is_self_reference(value: &str) -> bool {
    let value = value.trim();
    SELF_REFERENCES.iter().any(|s| value.eq_ignore_ascii_case(s))
}

/// Per-field model prompt
struct FieldPrompt {
    kind: EntityKind,
    tool: &'static str,
    key: &'static str,
    subject: &'static str,
    plural: &'static str,
    example: &'static str,
}

const USER_FIELD: FieldPrompt = FieldPrompt {
    kind: EntityKind::User,
    tool: "extract_user",
    key: "user_name",
    subject: "user name or e-mail address of the person who needs access",
    plural: "users",
    example: "Aaron Nichols",
};

const APPLICATION_FIELD: FieldPrompt = FieldPrompt {
    kind: EntityKind::Application,
    tool: "extract_application",
    key: "application_name",
    subject: "application name",
    plural: "applications",
    example: "Salesforce",
};

const ROLE_FIELD: FieldPrompt = FieldPrompt {
    kind: EntityKind::Role,
    tool: "extract_role",
    key: "role_name",
    subject: "role name or access level",
    plural: "roles",
    example: "Payroll Admin",
};

impl FieldPrompt {
    fn render(&self, hints: &str, text: &str) -> String {
        format!(
            "You are an IAM assistant. Extract the {subject} from the request.\n\n\
             Known {plural} in system: {hints}\n\n\
             Return valid JSON. If it is not mentioned in the request, return null.\n\
             Example output: {{\"{key}\": \"{example}\"}} or {{\"{key}\": null}}\n\n\
             Return ONLY JSON, no markdown, no explanation.\n\n\
             Request: {text}",
            subject = self.subject,
            plural = self.plural,
            key = self.key,
            example = self.example,
        )
    }
}

/// Read one field from a model reply
///
/// A missing key or `null` is a deliberate "not mentioned"; anything other
/// than a string is malformed.
fn parse_field(reply: &str, key: &str) -> Result<Extraction, ProviderError> {
    let object = parse_json_object(reply)?;
    match object.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Extraction::Unresolved),
        Some(serde_json::Value::String(value)) if is_self_reference(value) => {
            Ok(Extraction::Unresolved)
        }
        Some(serde_json::Value::String(value)) => {
            Ok(Extraction::resolved(value, ExtractionSource::Model))
        }
        Some(other) => Err(ProviderError::Malformed(format!(
            "{key}: expected string or null, got {other}"
        ))),
    }
}

/// Known entity names by kind, from nearby documents
type Hints = BTreeMap<EntityKind, BTreeSet<String>>;

fn hint_list(hints: &Hints, field: &FieldPrompt) -> String {
    match hints.get(&field.kind) {
        Some(names) if !names.is_empty() => names.iter().cloned().collect::<Vec<_>>().join(", "),
        _ => format!("no {} found", field.plural),
    }
}

/// Entity extractor
#[derive(Clone)]
pub struct EntityExtractor {
    model: Option<Arc<dyn LanguageModel>>,
    hints: Option<Arc<dyn VectorStore>>,
    schema: EntitySchema,
    mode: ExtractionMode,
    timeout: Duration,
    patterns: PatternSet,
}

impl EntityExtractor {
    /// Pattern-only extractor for `config`
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            model: None,
            hints: None,
            schema: config.schema.clone(),
            mode: config.extraction_mode,
            timeout: config.tool_timeout(),
            patterns: PatternSet::compile(),
        }
    }

    /// With language model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// With vector store used for known-entity hints
    #[inline]
    #[must_use]
    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.hints = Some(store);
        self
    }

    /// Extract the candidate triple from a request
    ///
    /// # Errors
    /// - `EmptyRequestError` if the text is empty or whitespace-only; no
    ///   tool call is made in that case
    pub async fn extract(
        &self,
        request: &AccessRequest,
        trace: RequestTrace<'_>,
    ) -> Result<ExtractedEntities, EmptyRequestError> {
        if request.is_blank() {
            return Err(EmptyRequestError);
        }
        let text = request.raw_text.as_str();

        let span = trace.tool("pattern_extraction", text);
        let patterns = self.patterns.extract(text);
        span.complete(&patterns);

        let (user, application, role) = match (&self.model, self.mode) {
            (Some(model), ExtractionMode::ModelWithPatterns) => {
                let hints = self.known_entities(text, trace).await;
                let model = model.as_ref();
                futures::join!(
                    self.ask_model(model, &USER_FIELD, hint_list(&hints, &USER_FIELD), text, trace),
                    self.ask_model(
                        model,
                        &APPLICATION_FIELD,
                        hint_list(&hints, &APPLICATION_FIELD),
                        text,
                        trace
                    ),
                    self.ask_model(model, &ROLE_FIELD, hint_list(&hints, &ROLE_FIELD), text, trace),
                )
            }
            _ => (Extraction::Unresolved, Extraction::Unresolved, Extraction::Unresolved),
        };

        let requester = request
            .requester
            .as_deref()
            .map_or(Extraction::Unresolved, |r| {
                Extraction::resolved(r, ExtractionSource::Requester)
            });
        let entities = ExtractedEntities::new(
            user.or(patterns.user).or(requester),
            application.or(patterns.application),
            role.or(patterns.role),
        );
        tracing::debug!(
            user = ?entities.user.value(),
            application = ?entities.application.value(),
            role = ?entities.role.value(),
            confidence = entities.extraction_confidence,
            "entities extracted"
        );
        Ok(entities)
    }

    async fn known_entities(&self, text: &str, trace: RequestTrace<'_>) -> Hints {
        let mut hints = Hints::new();
        let Some(store) = &self.hints else {
            return hints;
        };
        let span = trace.tool("known_entity_lookup", &json!({ "query": text, "k": HINT_DOCUMENTS }));
        let documents = match with_timeout(
            "known_entity_lookup",
            self.timeout,
            store.similarity_search(text, HINT_DOCUMENTS, None),
        )
        .await
        {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!(error = %e, "known-entity lookup failed; extracting without hints");
                span.fail(&e.to_string());
                return hints;
            }
        };
        for doc in &documents {
            let Some(kind) = EntityKind::ALL
                .into_iter()
                .find(|k| doc.metadata.get("type").is_some_and(|t| t.eq_ignore_ascii_case(k.as_str())))
            else {
                continue;
            };
            let column = match kind {
                EntityKind::User => &self.schema.users.name_column,
                EntityKind::Application => &self.schema.applications.name_column,
                EntityKind::Role => &self.schema.roles.name_column,
            };
            if let Some(name) = doc.metadata.get(column) {
                hints.entry(kind).or_default().insert(name.clone());
            }
        }
        span.complete(&hints);
        hints
    }

    async fn ask_model(
        &self,
        model: &dyn LanguageModel,
        field: &FieldPrompt,
        hints: String,
        text: &str,
        trace: RequestTrace<'_>,
    ) -> Extraction {
        let prompt = field.render(&hints, text);
        let span = trace.tool(field.tool, &json!({ "model": model.name(), "prompt": &prompt }));
        let reply = match with_timeout(field.tool, self.timeout, model.complete(&prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(field = field.key, error = %e, "model extraction failed");
                span.fail(&e.to_string());
                return Extraction::Unresolved;
            }
        };
        match parse_field(&reply, field.key) {
            Ok(extraction) => {
                span.complete(&json!({ "reply": &reply, "extraction": &extraction }));
                extraction
            }
            Err(e) => {
                tracing::debug!(field = field.key, error = %e, "unparseable extraction reply");
                span.fail(&json!({ "reply": &reply, "error": e.to_string() }));
                Extraction::Unresolved
            }
        }
    }
}

impl std::fmt::Debug for EntityExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityExtractor")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("hints", &self.hints.is_some())
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoredDocument;
    use askiam_trace::{EntryStatus, RequestId, TraceSession};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Answers each field prompt from a fixed table
    struct FieldModel {
        user: &'static str,
        application: &'static str,
        role: &'static str,
    }

    #[async_trait]
    impl LanguageModel for FieldModel {
        fn name(&self) -> &str {
            "field-model"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            let reply = if prompt.contains("\"user_name\"") {
                self.user
            } else if prompt.contains("\"application_name\"") {
                self.application
            } else {
                self.role
            };
            Ok(reply.to_string())
        }
    }

    struct DownModel;

    #[async_trait]
    impl LanguageModel for DownModel {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            Err(ProviderError::Unavailable("connection refused".into()))
        }
    }

    fn patterns_only() -> EntityExtractor {
        EntityExtractor::new(&PipelineConfig::default().with_extraction_mode(ExtractionMode::PatternsOnly))
    }

    async fn run(extractor: &EntityExtractor, request: &AccessRequest) -> (ExtractedEntities, TraceSession) {
        let session = TraceSession::open();
        let trace = RequestTrace::new(&session, request.request_id);
        let entities = extractor.extract(request, trace).await.unwrap();
        (entities, session)
    }

    #[tokio::test]
    async fn patterns_find_role_and_application() {
        let request = AccessRequest::new("I need HR Analyst in Workday");
        let (entities, session) = run(&patterns_only(), &request).await;
        assert_eq!(entities.value(EntityKind::Role), Some("HR Analyst"));
        assert_eq!(entities.value(EntityKind::Application), Some("Workday"));
        assert_eq!(entities.value(EntityKind::User), None);
        assert_eq!(session.len(), 1);
        assert_eq!(session.entries()[0].name, "pattern_extraction");
    }

    #[test]
    fn pattern_variants() {
        let patterns = PatternSet::compile();

        let m = patterns.extract("Please grant the Payroll Admin role in SAP for user jane.smith");
        assert_eq!(m.role.value(), Some("Payroll Admin"));
        assert_eq!(m.application.value(), Some("SAP"));
        assert_eq!(m.user.value(), Some("jane.smith"));

        let m = patterns.extract("John Doe needs the Sales Viewer role on Salesforce.");
        assert_eq!(m.user.value(), Some("John Doe"));
        assert_eq!(m.role.value(), Some("Sales Viewer"));
        assert_eq!(m.application.value(), Some("Salesforce"));

        let m = patterns.extract("request access to Admin in Okta for john.doe@example.com");
        assert_eq!(m.role.value(), Some("Admin"));
        assert_eq!(m.application.value(), Some("Okta"));
        assert_eq!(m.user.value(), Some("john.doe@example.com"));

        let m = patterns.extract("hello there");
        assert!(!m.role.is_resolved() && !m.application.is_resolved() && !m.user.is_resolved());
    }

    #[tokio::test]
    async fn requester_fills_user() {
        let request = AccessRequest::new("I need HR Analyst in Workday").with_requester("John Doe");
        let (entities, _) = run(&patterns_only(), &request).await;
        assert_eq!(entities.value(EntityKind::User), Some("John Doe"));
        assert_eq!(entities.user.source(), Some(ExtractionSource::Requester));
    }

    #[tokio::test]
    async fn blank_text_fails_fast_without_trace() {
        let session = TraceSession::open();
        let request = AccessRequest::new("  \t ");
        let trace = RequestTrace::new(&session, request.request_id);
        assert_eq!(patterns_only().extract(&request, trace).await, Err(EmptyRequestError));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn model_wins_over_patterns() {
        let extractor = EntityExtractor::new(&PipelineConfig::default()).with_model(Arc::new(FieldModel {
            user: r#"{"user_name": "Jane Smith"}"#,
            application: "```json\n{\"application_name\": \"Workday\"}\n```",
            role: r#"{"role_name": "HR Analyst"}"#,
        }));
        let request = AccessRequest::new("I need hr analyst in workday for user bob");
        let (entities, session) = run(&extractor, &request).await;
        assert_eq!(entities.value(EntityKind::User), Some("Jane Smith"));
        assert_eq!(entities.value(EntityKind::Application), Some("Workday"));
        assert_eq!(entities.value(EntityKind::Role), Some("HR Analyst"));
        assert_eq!(entities.extraction_confidence, 1.0);
        // pattern_extraction + three model calls
        assert_eq!(session.len(), 4);
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_patterns() {
        let extractor = EntityExtractor::new(&PipelineConfig::default()).with_model(Arc::new(FieldModel {
            user: r#"{"user_name": "me"}"#,
            application: "Sure! The application is Workday.",
            role: r#"{"role_name": 42}"#,
        }));
        let request = AccessRequest::new("I need HR Analyst in Workday");
        let (entities, session) = run(&extractor, &request).await;
        assert_eq!(entities.value(EntityKind::User), None);
        assert_eq!(entities.application.source(), Some(ExtractionSource::Pattern));
        assert_eq!(entities.value(EntityKind::Role), Some("HR Analyst"));

        let failed: Vec<_> = session
            .entries()
            .into_iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .map(|e| e.name)
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains(&"extract_application".to_string()));
        assert!(failed.contains(&"extract_role".to_string()));
    }

    #[tokio::test]
    async fn unavailable_model_is_not_an_error() {
        let extractor = EntityExtractor::new(&PipelineConfig::default()).with_model(Arc::new(DownModel));
        let (entities, _) = run(&extractor, &AccessRequest::new("what is the weather")).await;
        assert!(entities.all_unresolved());
    }

    struct HintStore;

    #[async_trait]
    impl VectorStore for HintStore {
        async fn similarity_search(
            &self,
            _query: &str,
            _k: usize,
            _filter: Option<&crate::providers::MetadataFilter>,
        ) -> Result<Vec<ScoredDocument>, ProviderError> {
            let doc = ScoredDocument {
                id: "role-R1".into(),
                content: "Role HR Analyst belongs to the Workday application.".into(),
                metadata: [("type", "role"), ("role_name", "HR Analyst")]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                score: 0.9,
            };
            Ok(vec![doc])
        }
    }

    /// Echoes whether the role hint reached the prompt
    struct HintEcho;

    #[async_trait]
    impl LanguageModel for HintEcho {
        fn name(&self) -> &str {
            "hint-echo"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            if prompt.contains("\"role_name\"") && prompt.contains("Known roles in system: HR Analyst") {
                Ok(r#"{"role_name": "HR Analyst"}"#.into())
            } else {
                Ok("{}".into())
            }
        }
    }

    #[tokio::test]
    async fn hints_reach_the_prompt() {
        let extractor = EntityExtractor::new(&PipelineConfig::default())
            .with_model(Arc::new(HintEcho))
            .with_vector_store(Arc::new(HintStore));
        let request = AccessRequest::new("can I get analyst access");
        let session = TraceSession::open();
        let trace = RequestTrace::new(&session, RequestId::new());
        let entities = extractor.extract(&request, trace).await.unwrap();
        assert_eq!(entities.value(EntityKind::Role), Some("HR Analyst"));
        assert_eq!(session.entries()[1].name, "known_entity_lookup");
    }
}
