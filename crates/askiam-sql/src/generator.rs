//! Intent to SQL generation

use crate::error::GenerationError;
use crate::intent::{GeneratedQuery, QueryIntent};
use crate::schema::EntitySchema;
use async_trait::async_trait;

/// Turns a lookup intent into a single parameterized SELECT
///
/// Output is untrusted: whatever a generator returns still goes through
/// [`SqlSafetyValidator`](crate::SqlSafetyValidator) before execution.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generator name, recorded in the trace
    fn name(&self) -> &str;

    /// Generate a statement for `intent`
    ///
    /// # Errors
    /// - `GenerationError` if no statement can be produced
    async fn generate(&self, intent: &QueryIntent) -> Result<GeneratedQuery, GenerationError>;
}

/// Fixed-template generator over the configured schema
#[derive(Debug, Clone, Default)]
pub struct TemplateSqlGenerator {
    schema: EntitySchema,
}

impl TemplateSqlGenerator {
    /// Generator for `schema`
    #[must_use]
    pub fn new(schema: EntitySchema) -> Self {
        Self { schema }
    }

    /// Schema in use
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Render an intent synchronously
    ///
    /// # Errors
    /// - `GenerationError::EmptyValue` for blank intent values
    /// - `GenerationError::Unsupported` for `FindGrant` without a grants table
    pub fn render(&self, intent: &QueryIntent) -> Result<GeneratedQuery, GenerationError> {
        for value in intent.values() {
            if value.trim().is_empty() {
                return Err(GenerationError::EmptyValue(intent.name()));
            }
        }

        let s = &self.schema;
        let (table, columns): (&str, Vec<&str>) = match intent {
            QueryIntent::FindUser { identifier } => {
                let column = if QueryIntent::is_email(identifier) {
                    s.users.email_column.as_str()
                } else {
                    s.users.name_column.as_str()
                };
                (s.users.table.as_str(), vec![column])
            }
            QueryIntent::FindApplication { .. } => (
                s.applications.table.as_str(),
                vec![s.applications.name_column.as_str()],
            ),
            QueryIntent::FindRoleInApplication { .. } => (
                s.roles.table.as_str(),
                vec![s.roles.name_column.as_str(), s.roles.app_column.as_str()],
            ),
            QueryIntent::FindRole { .. } => {
                (s.roles.table.as_str(), vec![s.roles.name_column.as_str()])
            }
            QueryIntent::FindGrant { .. } => {
                let grants = s.grants.as_ref().ok_or_else(|| {
                    GenerationError::Unsupported("no grants table configured".to_string())
                })?;
                (
                    grants.table.as_str(),
                    vec![
                        grants.user_column.as_str(),
                        grants.role_column.as_str(),
                        grants.app_column.as_str(),
                    ],
                )
            }
        };

        let predicate = columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT * FROM {table} WHERE {predicate}");
        let params = intent.values().into_iter().map(|v| v.trim().to_string()).collect();

        tracing::trace!(intent = intent.name(), sql = %sql, "rendered template query");
        Ok(GeneratedQuery::new(sql, params))
    }
}

#[async_trait]
impl SqlGenerator for TemplateSqlGenerator {
    fn name(&self) -> &str {
        "template_sql_generator"
    }

    async fn generate(&self, intent: &QueryIntent) -> Result<GeneratedQuery, GenerationError> {
        self.render(intent)
    }
}
