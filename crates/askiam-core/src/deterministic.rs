//! Deterministic Validator (MCP path)
//!
//! Every lookup runs generator → safety validator → entity store gateway,
//! then the business rules are checked in a fixed order:
//!
//! 1. user exists and is active
//! 2. application exists
//! 3. role exists under the named application
//! 4. user does not already hold the role (when a grants table is configured)
//!
//! The verdict names the first rule that failed, or [`ALL_CHECKS_PASSED`].
//! A statement rejected by the safety validator ends the path with
//! [`UNSAFE_QUERY_REASON`]; it is never retried and never executed.

use crate::config::PipelineConfig;
use crate::error::{AskIamError, ProviderError};
use crate::gateway::{EntityStore, QueryOutcome};
use crate::providers::{strip_code_fence, with_timeout, LanguageModel, RelationalStore};
use crate::trace::RequestTrace;
use crate::types::{EntityKind, Evidence, ExtractedEntities, ResolvedEntity, ValidationVerdict};
use askiam_sql::{
    EntitySchema, GeneratedQuery, GenerationError, QueryIntent, SqlGenerator, SqlSafetyValidator,
    TemplateSqlGenerator,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Reason when a generated statement fails safety validation
pub const UNSAFE_QUERY_REASON: &str = "generated query rejected by safety policy";

/// Reason when generation or the entity store failed
pub const DETERMINISTIC_UNAVAILABLE: &str = "deterministic path unavailable";

/// Reason when every rule passed
pub const ALL_CHECKS_PASSED: &str = "all checks passed";

/// Result of the rule sequence: pass, or the first failure's reason
type RuleResult = Result<(), &'static str>;

/// Deterministic validator
#[derive(Clone)]
pub struct DeterministicValidator {
    generator: Arc<dyn SqlGenerator>,
    validator: SqlSafetyValidator,
    gateway: EntityStore,
    timeout: Duration,
}

impl DeterministicValidator {
    /// Validator over `store`, generating SQL from templates
    #[must_use]
    pub fn new(config: &PipelineConfig, store: Arc<dyn RelationalStore>) -> Self {
        Self {
            generator: Arc::new(TemplateSqlGenerator::new(config.schema.clone())),
            validator: SqlSafetyValidator::new(config.sql_table_allowlist.clone()),
            gateway: EntityStore::new(store, config.schema.clone(), config.tool_timeout()),
            timeout: config.tool_timeout(),
        }
    }

    /// With a different SQL generator
    #[inline]
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Generator name
    #[must_use]
    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Run every rule against the entity store
    pub async fn validate(
        &self,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
    ) -> ValidationVerdict {
        let mut evidence = Vec::new();
        match self.check_rules(entities, trace, &mut evidence).await {
            Ok(Ok(())) => ValidationVerdict::deterministic(true, ALL_CHECKS_PASSED),
            Ok(Err(reason)) => ValidationVerdict::deterministic(false, reason),
            Err(AskIamError::UnsafeQuery(e)) => {
                evidence.push(Evidence::Rule {
                    rule: format!("sql_safety: {e}"),
                    passed: false,
                });
                ValidationVerdict::deterministic(false, UNSAFE_QUERY_REASON)
            }
            Err(e) => {
                tracing::warn!(error = %e, soft = e.is_soft(), "deterministic path unavailable");
                ValidationVerdict::deterministic(false, DETERMINISTIC_UNAVAILABLE)
            }
        }
        .with_evidence(evidence)
    }

    async fn check_rules(
        &self,
        entities: &ExtractedEntities,
        trace: RequestTrace<'_>,
        evidence: &mut Vec<Evidence>,
    ) -> Result<RuleResult, AskIamError> {
        // 1. user
        let Some(user_ref) = entities.value(EntityKind::User) else {
            return Ok(rule(evidence, "user_specified", Err("user not specified")));
        };
        let user = self
            .resolve(
                QueryIntent::FindUser { identifier: user_ref.to_string() },
                EntityKind::User,
                user_ref,
                trace,
                evidence,
            )
            .await?;
        let user_check = if !user.exists {
            Err("user not found")
        } else if !user.active {
            Err("user is inactive")
        } else {
            Ok(())
        };
        if rule(evidence, "user_active", user_check).is_err() {
            return Ok(user_check);
        }

        // 2. application
        let Some(app_ref) = entities.value(EntityKind::Application) else {
            return Ok(rule(evidence, "application_specified", Err("application not specified")));
        };
        let application = self
            .resolve(
                QueryIntent::FindApplication { name: app_ref.to_string() },
                EntityKind::Application,
                app_ref,
                trace,
                evidence,
            )
            .await?;
        if !application.exists {
            return Ok(rule(evidence, "application_exists", Err("application not found")));
        }
        record(evidence, "application_exists", true);

        // 3. role under application
        let Some(role_ref) = entities.value(EntityKind::Role) else {
            return Ok(rule(evidence, "role_specified", Err("role not specified")));
        };
        let role = self
            .resolve(
                QueryIntent::FindRoleInApplication {
                    role: role_ref.to_string(),
                    application: application.display_name.clone(),
                },
                EntityKind::Role,
                role_ref,
                trace,
                evidence,
            )
            .await?;
        if !role.exists {
            let elsewhere = self
                .resolve(
                    QueryIntent::FindRole { role: role_ref.to_string() },
                    EntityKind::Role,
                    role_ref,
                    trace,
                    evidence,
                )
                .await?;
            let reason = if elsewhere.exists {
                "role not found in application"
            } else {
                "role not found"
            };
            return Ok(rule(evidence, "role_in_application", Err(reason)));
        }
        record(evidence, "role_in_application", true);

        // 4. duplicate grant
        if self.gateway.schema().grants.is_some() {
            let existing = self
                .run(
                    QueryIntent::FindGrant {
                        user: user.display_name.clone(),
                        role: role.display_name.clone(),
                        application: application.display_name.clone(),
                    },
                    trace,
                    evidence,
                )
                .await?;
            if !existing.rows.is_empty() {
                return Ok(rule(evidence, "not_already_granted", Err("user already holds role")));
            }
            record(evidence, "not_already_granted", true);
        }

        Ok(Ok(()))
    }

    async fn resolve(
        &self,
        intent: QueryIntent,
        kind: EntityKind,
        requested: &str,
        trace: RequestTrace<'_>,
        evidence: &mut Vec<Evidence>,
    ) -> Result<ResolvedEntity, AskIamError> {
        let outcome = self.run(intent, trace, evidence).await?;
        let entity = self.gateway.resolve(kind, requested, &outcome);
        evidence.push(Evidence::Entity(entity.clone()));
        Ok(entity)
    }

    /// Generate, validate and execute one lookup
    async fn run(
        &self,
        intent: QueryIntent,
        trace: RequestTrace<'_>,
        evidence: &mut Vec<Evidence>,
    ) -> Result<QueryOutcome, AskIamError> {
        let span = trace.tool(
            "sql_generate",
            &json!({ "generator": self.generator.name(), "intent": &intent }),
        );
        let generated = match tokio::time::timeout(self.timeout, self.generator.generate(&intent)).await {
            Ok(Ok(query)) => {
                span.complete(&query);
                query
            }
            Ok(Err(e)) => {
                span.fail(&e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                let e = GenerationError::Unavailable(format!(
                    "timed out after {:.1}s",
                    self.timeout.as_secs_f64()
                ));
                span.fail(&e.to_string());
                return Err(e.into());
            }
        };

        let span = trace.tool("sql_validate", &generated);
        let safe = match self.validator.approve(generated) {
            Ok(safe) => {
                span.complete(&json!({ "accepted": true, "tables": safe.tables() }));
                safe
            }
            Err(e) => {
                tracing::warn!(
                    intent = intent.name(),
                    error = %e,
                    injection = e.is_injection_signal(),
                    "generated query rejected by safety validator"
                );
                span.fail(&json!({ "accepted": false, "error": e.to_string() }));
                return Err(e.into());
            }
        };

        let outcome = self.gateway.execute(&safe, trace).await?;
        evidence.push(Evidence::ExecutedQuery {
            sql: outcome.sql.clone(),
            params: outcome.params.clone(),
            rows: outcome.rows.len(),
        });
        Ok(outcome)
    }
}

impl std::fmt::Debug for DeterministicValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicValidator")
            .field("generator", &self.generator.name())
            .field("validator", &self.validator)
            .field("gateway", &self.gateway)
            .finish()
    }
}

fn rule(evidence: &mut Vec<Evidence>, name: &str, result: RuleResult) -> RuleResult {
    record(evidence, name, result.is_ok());
    result
}

fn record(evidence: &mut Vec<Evidence>, name: &str, passed: bool) {
    evidence.push(Evidence::Rule {
        rule: name.to_string(),
        passed,
    });
}

/// SQL generator backed by a language model
///
/// The model is told the schema and the intent and must answer with one
/// SELECT using `?` placeholders. Bound values always come from the
/// intent, never from the model's output.
#[derive(Clone)]
pub struct ModelSqlGenerator {
    model: Arc<dyn LanguageModel>,
    schema: EntitySchema,
    timeout: Duration,
}

impl ModelSqlGenerator {
    /// Generator over `model`
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, schema: EntitySchema, timeout: Duration) -> Self {
        Self {
            model,
            schema,
            timeout,
        }
    }

    fn prompt(&self, intent: &QueryIntent) -> String {
        let s = &self.schema;
        let mut tables = vec![
            format!(
                "{}({}, {}, {})",
                s.users.table, s.users.id_column, s.users.name_column, s.users.email_column
            ),
            format!(
                "{}({}, {})",
                s.applications.table, s.applications.id_column, s.applications.name_column
            ),
            format!(
                "{}({}, {}, {})",
                s.roles.table, s.roles.id_column, s.roles.name_column, s.roles.app_column
            ),
        ];
        if let Some(g) = &s.grants {
            tables.push(format!("{}({}, {}, {})", g.table, g.user_column, g.role_column, g.app_column));
        }
        let (task, order) = match intent {
            QueryIntent::FindUser { identifier } if QueryIntent::is_email(identifier) => {
                ("find the user with the given email", "email")
            }
            QueryIntent::FindUser { .. } => ("find the user with the given name", "user name"),
            QueryIntent::FindApplication { .. } => {
                ("find the application with the given name", "application name")
            }
            QueryIntent::FindRoleInApplication { .. } => (
                "find the role with the given name in the given application",
                "role name, application name",
            ),
            QueryIntent::FindRole { .. } => ("find roles with the given name", "role name"),
            QueryIntent::FindGrant { .. } => (
                "find an existing assignment of the given role in the given application to the given user",
                "user name, role name, application name",
            ),
        };
        format!(
            "Write one SQL SELECT statement to {task}.\n\n\
             Tables:\n{tables}\n\n\
             Use a ? placeholder for each value, in this order: {order}.\n\
             Return ONLY the SQL statement, no markdown, no explanation.",
            tables = tables.join("\n"),
        )
    }
}

#[async_trait]
impl SqlGenerator for ModelSqlGenerator {
    fn name(&self) -> &str {
        "model_sql_generator"
    }

    async fn generate(&self, intent: &QueryIntent) -> Result<GeneratedQuery, GenerationError> {
        if intent.values().iter().any(|v| v.trim().is_empty()) {
            return Err(GenerationError::EmptyValue(intent.name()));
        }
        if matches!(intent, QueryIntent::FindGrant { .. }) && self.schema.grants.is_none() {
            return Err(GenerationError::Unsupported("no grants table configured".to_string()));
        }

        let prompt = self.prompt(intent);
        let reply = with_timeout("sql_generate", self.timeout, self.model.complete(&prompt))
            .await
            .map_err(|e: ProviderError| GenerationError::Unavailable(e.to_string()))?;
        let sql = strip_code_fence(&reply).trim();
        if sql.is_empty() {
            return Err(GenerationError::Unavailable("empty model output".to_string()));
        }
        let params = intent.values().into_iter().map(|v| v.trim().to_string()).collect();
        Ok(GeneratedQuery::new(sql, params))
    }
}

impl std::fmt::Debug for ModelSqlGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSqlGenerator")
            .field("model", &self.model.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::{
        ApplicationRecord, EntitySeed, GrantRecord, InMemoryEntityStore, RoleRecord, UserRecord,
    };
    use askiam_sql::{GrantTable, TableAllowlist};
    use askiam_trace::{EntryStatus, RequestId, TraceSession};
    use crate::types::{Extraction, ExtractionSource};
    use pretty_assertions::assert_eq;

    fn seed() -> EntitySeed {
        EntitySeed {
            users: vec![
                UserRecord {
                    user_id: "U1".into(),
                    user_name: "John Doe".into(),
                    email: "john.doe@example.com".into(),
                    manager: None,
                    active: true,
                },
                UserRecord {
                    user_id: "U2".into(),
                    user_name: "Former Employee".into(),
                    email: "former@example.com".into(),
                    manager: None,
                    active: false,
                },
            ],
            applications: vec![
                ApplicationRecord {
                    app_id: "A1".into(),
                    app_name: "Workday".into(),
                    app_owner: None,
                },
                ApplicationRecord {
                    app_id: "A2".into(),
                    app_name: "Salesforce".into(),
                    app_owner: None,
                },
            ],
            roles: vec![RoleRecord {
                role_id: "R1".into(),
                role_name: "HR Analyst".into(),
                app_name: "Workday".into(),
                owner: None,
            }],
            grants: vec![GrantRecord {
                user_name: "John Doe".into(),
                role_name: "HR Analyst".into(),
                app_name: "Workday".into(),
            }],
        }
    }

    fn validator(config: &PipelineConfig) -> DeterministicValidator {
        let store = InMemoryEntityStore::from_seed(&config.schema, &seed());
        DeterministicValidator::new(config, Arc::new(store))
    }

    fn triple(user: Option<&str>, app: Option<&str>, role: Option<&str>) -> ExtractedEntities {
        let field = |v: Option<&str>| {
            v.map_or(Extraction::Unresolved, |v| Extraction::resolved(v, ExtractionSource::Pattern))
        };
        ExtractedEntities::new(field(user), field(app), field(role))
    }

    async fn verdict(v: &DeterministicValidator, entities: &ExtractedEntities) -> ValidationVerdict {
        let session = TraceSession::open();
        v.validate(entities, RequestTrace::new(&session, RequestId::new())).await
    }

    #[tokio::test]
    async fn all_checks_pass() {
        let v = validator(&PipelineConfig::default());
        let result = verdict(&v, &triple(Some("john doe"), Some("workday"), Some("hr analyst"))).await;
        assert!(result.is_valid);
        assert_eq!(result.reason, ALL_CHECKS_PASSED);
        assert_eq!(result.confidence, 1.0);
        assert!(result.evidence.iter().any(|e| matches!(
            e,
            Evidence::ExecutedQuery { sql, .. } if sql == "SELECT * FROM Roles WHERE role_name = ? AND app_name = ?"
        )));
    }

    #[tokio::test]
    async fn first_failed_rule_is_reported() {
        let v = validator(&PipelineConfig::default());
        let cases = [
            (triple(None, Some("Workday"), Some("HR Analyst")), "user not specified"),
            (triple(Some("Nobody"), Some("Workday"), Some("HR Analyst")), "user not found"),
            (triple(Some("Former Employee"), Some("Workday"), Some("HR Analyst")), "user is inactive"),
            (triple(Some("John Doe"), None, Some("HR Analyst")), "application not specified"),
            (triple(Some("John Doe"), Some("Jira"), Some("HR Analyst")), "application not found"),
            (triple(Some("John Doe"), Some("Workday"), None), "role not specified"),
            (triple(Some("John Doe"), Some("Salesforce"), Some("HR Analyst")), "role not found in application"),
            (triple(Some("John Doe"), Some("Workday"), Some("Astronaut")), "role not found"),
        ];
        for (entities, reason) in cases {
            let result = verdict(&v, &entities).await;
            assert!(!result.is_valid, "{reason}");
            assert_eq!(result.reason, reason);
        }
    }

    #[tokio::test]
    async fn user_matched_by_email() {
        let v = validator(&PipelineConfig::default());
        let result =
            verdict(&v, &triple(Some("john.doe@example.com"), Some("Workday"), Some("HR Analyst"))).await;
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn duplicate_grant_when_grants_configured() {
        let schema = EntitySchema::default().with_grants(GrantTable::default());
        let config = PipelineConfig::default()
            .with_allowlist(TableAllowlist::default().with_table("UserRoles"))
            .with_schema(schema);
        let v = validator(&config);
        let result = verdict(&v, &triple(Some("John Doe"), Some("Workday"), Some("HR Analyst"))).await;
        assert_eq!(result.reason, "user already holds role");
    }

    struct Replies(&'static str);

    #[async_trait]
    impl LanguageModel for Replies {
        fn name(&self) -> &str {
            "replies"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn unsafe_generated_sql_is_never_executed() {
        let config = PipelineConfig::default();
        let generator = ModelSqlGenerator::new(
            Arc::new(Replies("SELECT * FROM Users; DROP TABLE Users;")),
            config.schema.clone(),
            config.tool_timeout(),
        );
        let v = validator(&config).with_generator(Arc::new(generator));
        let session = TraceSession::open();
        let result = v
            .validate(
                &triple(Some("John Doe"), Some("Workday"), Some("HR Analyst")),
                RequestTrace::new(&session, RequestId::new()),
            )
            .await;
        assert!(!result.is_valid);
        assert_eq!(result.reason, UNSAFE_QUERY_REASON);

        let entries = session.entries();
        assert!(entries.iter().all(|e| e.name != "entity_store_query"));
        let rejected = entries.iter().find(|e| e.name == "sql_validate").unwrap();
        assert_eq!(rejected.status, EntryStatus::Failed);
    }

    #[tokio::test]
    async fn model_generator_binds_intent_values() {
        let config = PipelineConfig::default();
        let generator = ModelSqlGenerator::new(
            Arc::new(Replies("```sql\nSELECT * FROM Users WHERE user_name = ?\n```")),
            config.schema.clone(),
            config.tool_timeout(),
        );
        let query = generator
            .generate(&QueryIntent::FindUser { identifier: " John Doe ".into() })
            .await
            .unwrap();
        assert_eq!(query.sql, "SELECT * FROM Users WHERE user_name = ?");
        assert_eq!(query.params, ["John Doe"]);
    }

    struct Broken;

    #[async_trait]
    impl RelationalStore for Broken {
        async fn fetch(&self, _query: &askiam_sql::SafeQuery) -> Result<Vec<crate::providers::Row>, ProviderError> {
            Err(ProviderError::Query("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_is_unavailable() {
        let v = DeterministicValidator::new(&PipelineConfig::default(), Arc::new(Broken));
        let result = verdict(&v, &triple(Some("John Doe"), Some("Workday"), Some("HR Analyst"))).await;
        assert!(!result.is_valid);
        assert_eq!(result.reason, DETERMINISTIC_UNAVAILABLE);
    }
}
