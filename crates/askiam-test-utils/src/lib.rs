//! Testing utilities for the AskIAM workspace
//!
//! Scripted and misbehaving providers, fixture seed data, and a pipeline
//! builder wired to them.

#![allow(missing_docs)]

use askiam_core::providers::memory::{
    ApplicationRecord, EntitySeed, GrantRecord, InMemoryEntityStore, LexicalVectorStore,
    RoleRecord, UserRecord,
};
use askiam_core::providers::{MetadataFilter, Row};
use askiam_core::{
    LanguageModel, Orchestrator, PipelineConfig, ProviderError, RelationalStore, ScoredDocument,
    VectorStore,
};
use askiam_sql::{EntitySchema, SafeQuery};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Substring present only in the compliance judgment prompt
pub const JUDGMENT_PROMPT: &str = "access validation assistant";
/// Substring present only in the user extraction prompt
pub const USER_PROMPT: &str = "\"user_name\"";
/// Substring present only in the application extraction prompt
pub const APPLICATION_PROMPT: &str = "\"application_name\"";
/// Substring present only in the role extraction prompt
pub const ROLE_PROMPT: &str = "\"role_name\"";
/// Substring present only in the SQL generation prompt
pub const SQL_PROMPT: &str = "Write one SQL SELECT statement";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Seed rows used across tests
///
/// - John Doe: active, holds nothing
/// - Jane Smith: active, already holds Sales Viewer in Salesforce
/// - Former Employee: inactive
/// - HR Analyst exists only under Workday
pub fn fixture_seed() -> EntitySeed {
    let user = |id: &str, name: &str, email: &str, active: bool| UserRecord {
        user_id: id.to_string(),
        user_name: name.to_string(),
        email: email.to_string(),
        manager: Some("Alice Manager".to_string()),
        active,
    };
    let app = |id: &str, name: &str| ApplicationRecord {
        app_id: id.to_string(),
        app_name: name.to_string(),
        app_owner: Some("IT Operations".to_string()),
    };
    let role = |id: &str, name: &str, app: &str| RoleRecord {
        role_id: id.to_string(),
        role_name: name.to_string(),
        app_name: app.to_string(),
        owner: None,
    };
    EntitySeed {
        users: vec![
            user("U1", "John Doe", "john.doe@example.com", true),
            user("U2", "Jane Smith", "jane.smith@example.com", true),
            user("U3", "Former Employee", "former@example.com", false),
        ],
        applications: vec![app("A1", "Workday"), app("A2", "Salesforce"), app("A3", "SAP")],
        roles: vec![
            role("R1", "HR Analyst", "Workday"),
            role("R2", "Payroll Admin", "SAP"),
            role("R3", "Sales Viewer", "Salesforce"),
        ],
        grants: vec![GrantRecord {
            user_name: "Jane Smith".to_string(),
            role_name: "Sales Viewer".to_string(),
            app_name: "Salesforce".to_string(),
        }],
    }
}

/// Entity store over [`fixture_seed`]
pub fn fixture_store(schema: &EntitySchema) -> Arc<InMemoryEntityStore> {
    Arc::new(InMemoryEntityStore::from_seed(schema, &fixture_seed()))
}

/// Lexical vector store over [`fixture_seed`]
pub fn fixture_vector_store(schema: &EntitySchema) -> Arc<LexicalVectorStore> {
    Arc::new(LexicalVectorStore::from_seed(schema, &fixture_seed()))
}

/// Document with no metadata
pub fn doc(id: &str, content: &str, score: f64) -> ScoredDocument {
    ScoredDocument {
        id: id.to_string(),
        content: content.to_string(),
        metadata: BTreeMap::new(),
        score,
    }
}

/// Pipeline over the fixture entity store
pub fn fixture_pipeline(
    config: PipelineConfig,
    model: Option<Arc<dyn LanguageModel>>,
    vector_store: Option<Arc<dyn VectorStore>>,
) -> Orchestrator {
    let mut builder = Orchestrator::builder(config.clone())
        .with_relational_store(fixture_store(&config.schema));
    if let Some(model) = model {
        builder = builder.with_model(model);
    }
    if let Some(store) = vector_store {
        builder = builder.with_vector_store(store);
    }
    builder.build().unwrap()
}

// ---------------------------------------------------------------------------
// Scripted providers
// ---------------------------------------------------------------------------

/// Language model answering from a table of prompt substrings
///
/// The first rule whose needle occurs in the prompt wins; prompts matching
/// no rule get the default reply (`{}` unless changed).
pub struct ScriptedModel {
    rules: Vec<(String, Result<String, ProviderError>)>,
    default: Result<String, ProviderError>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: Ok("{}".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply `text` to prompts containing `needle`
    #[must_use]
    pub fn reply(mut self, needle: &str, text: &str) -> Self {
        self.rules.push((needle.to_string(), Ok(text.to_string())));
        self
    }

    /// Fail prompts containing `needle`
    #[must_use]
    pub fn fail(mut self, needle: &str, error: ProviderError) -> Self {
        self.rules.push((needle.to_string(), Err(error)));
        self
    }

    /// Reply for unmatched prompts
    #[must_use]
    pub fn otherwise(mut self, text: &str) -> Self {
        self.default = Ok(text.to_string());
        self
    }

    /// Extraction replies for all three fields
    #[must_use]
    pub fn extracting(self, user: Option<&str>, application: Option<&str>, role: Option<&str>) -> Self {
        let field = |key: &str, value: Option<&str>| match value {
            Some(v) => serde_json::json!({ key: v }).to_string(),
            None => serde_json::json!({ key: null }).to_string(),
        };
        self.reply(USER_PROMPT, &field("user_name", user))
            .reply(APPLICATION_PROMPT, &field("application_name", application))
            .reply(ROLE_PROMPT, &field("role_name", role))
    }

    /// Number of prompts received
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Prompts received that contain `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts.lock().iter().filter(|p| p.contains(needle)).count()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map_or_else(|| self.default.clone(), |(_, reply)| reply.clone())
    }
}

/// Vector store returning fixed documents for every query
pub struct ScriptedVectorStore {
    documents: Vec<ScoredDocument>,
    calls: AtomicUsize,
}

impl ScriptedVectorStore {
    pub fn new(documents: Vec<ScoredDocument>) -> Self {
        Self {
            documents,
            calls: AtomicUsize::new(0),
        }
    }

    /// One role document with the given similarity
    pub fn single(score: f64) -> Self {
        Self::new(vec![doc(
            "role-R1",
            "Role HR Analyst belongs to the Workday application. Role ID is R1.",
            score,
        )])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for ScriptedVectorStore {
    async fn similarity_search(
        &self,
        _query: &str,
        k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.iter().take(k).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Misbehaving providers
// ---------------------------------------------------------------------------

/// Provider that always reports itself unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingProvider;

fn down() -> ProviderError {
    ProviderError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl LanguageModel for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(down())
    }
}

#[async_trait]
impl VectorStore for FailingProvider {
    async fn similarity_search(
        &self,
        _query: &str,
        _k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        Err(down())
    }
}

#[async_trait]
impl RelationalStore for FailingProvider {
    async fn fetch(&self, _query: &SafeQuery) -> Result<Vec<Row>, ProviderError> {
        Err(down())
    }
}

/// Wraps a provider, sleeping before every call
pub struct SlowProvider<P> {
    inner: P,
    delay: Duration,
}

impl<P> SlowProvider<P> {
    pub fn new(inner: P, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<P: LanguageModel> LanguageModel for SlowProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(prompt).await
    }
}

#[async_trait]
impl<P: VectorStore> VectorStore for SlowProvider<P> {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.similarity_search(query, k, filter).await
    }
}

#[async_trait]
impl<P: RelationalStore> RelationalStore for SlowProvider<P> {
    async fn fetch(&self, query: &SafeQuery) -> Result<Vec<Row>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch(query).await
    }
}

/// Relational store that panics on every query
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingStore;

#[async_trait]
impl RelationalStore for PanickingStore {
    async fn fetch(&self, query: &SafeQuery) -> Result<Vec<Row>, ProviderError> {
        panic!("entity store driver crashed on {}", query.sql());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_matches_first_rule() {
        let model = ScriptedModel::new()
            .reply(JUDGMENT_PROMPT, "VALID: ok")
            .reply("access", "never reached for judgment prompts");
        let reply = model
            .complete("You are an IAM access validation assistant.")
            .await
            .unwrap();
        assert_eq!(reply, "VALID: ok");
        assert_eq!(model.complete("unrelated").await.unwrap(), "{}");
        assert_eq!(model.calls(), 2);
        assert_eq!(model.calls_matching(JUDGMENT_PROMPT), 1);
    }

    #[test]
    fn fixture_seed_is_consistent() {
        let seed = fixture_seed();
        for role in &seed.roles {
            assert!(seed.applications.iter().any(|a| a.app_name == role.app_name));
        }
        assert!(seed.users.iter().any(|u| !u.active));
    }
}
