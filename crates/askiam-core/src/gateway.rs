//! Entity Store Gateway
//!
//! Typed read-only accessor over the entity store. Executes only
//! [`SafeQuery`] values and maps rows to [`ResolvedEntity`] records.

use crate::error::ProviderError;
use crate::providers::memory::value_text;
use crate::providers::{with_timeout, RelationalStore, Row};
use crate::trace::RequestTrace;
use crate::types::{EntityKind, ResolvedEntity};
use askiam_sql::{EntitySchema, SafeQuery};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

// Column names recognised as an active flag when the schema names none
const STATUS_COLUMNS: [&str; 4] = ["active", "is_active", "status", "enabled"];

/// Rows returned for one executed statement
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// Statement text
    pub sql: String,
    /// Bound parameters
    pub params: Vec<String>,
    /// Rows returned
    pub rows: Vec<Row>,
}

/// Read-only gateway over a relational store
#[derive(Clone)]
pub struct EntityStore {
    store: Arc<dyn RelationalStore>,
    schema: EntitySchema,
    timeout: Duration,
}

impl EntityStore {
    /// Gateway over `store`
    pub fn new(store: Arc<dyn RelationalStore>, schema: EntitySchema, timeout: Duration) -> Self {
        Self {
            store,
            schema,
            timeout,
        }
    }

    /// Schema used for row mapping
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Execute a validated statement, recording it as a tool call
    ///
    /// # Errors
    /// - `ProviderError` on store failure or timeout
    pub async fn execute(
        &self,
        query: &SafeQuery,
        trace: RequestTrace<'_>,
    ) -> Result<QueryOutcome, ProviderError> {
        let span = trace.tool("entity_store_query", query);
        match with_timeout("entity_store_query", self.timeout, self.store.fetch(query)).await {
            Ok(rows) => {
                tracing::debug!(sql = query.sql(), rows = rows.len(), "entity store query");
                span.complete(&serde_json::json!({ "rows": rows.len(), "data": &rows }));
                Ok(QueryOutcome {
                    sql: query.sql().to_string(),
                    params: query.params().to_vec(),
                    rows,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, sql = query.sql(), "entity store query failed");
                span.fail(&e.to_string());
                Err(e)
            }
        }
    }

    /// Map the first row of an outcome to a resolved entity
    ///
    /// No rows is a normal `exists = false` result for `requested`.
    #[must_use]
    pub fn resolve(&self, kind: EntityKind, requested: &str, outcome: &QueryOutcome) -> ResolvedEntity {
        let Some(row) = outcome.rows.first() else {
            return ResolvedEntity::missing(kind, requested);
        };
        let (id_column, name_column) = match kind {
            EntityKind::User => (&self.schema.users.id_column, &self.schema.users.name_column),
            EntityKind::Application => (
                &self.schema.applications.id_column,
                &self.schema.applications.name_column,
            ),
            EntityKind::Role => (&self.schema.roles.id_column, &self.schema.roles.name_column),
        };
        let active = match kind {
            EntityKind::User => self.is_active(row),
            EntityKind::Application | EntityKind::Role => true,
        };
        ResolvedEntity {
            kind,
            id: cell(row, id_column).map(value_text),
            display_name: cell(row, name_column)
                .map(value_text)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| requested.to_string()),
            exists: true,
            active,
        }
    }

    fn is_active(&self, row: &Row) -> bool {
        let value = match &self.schema.users.status_column {
            Some(column) => cell(row, column),
            None => STATUS_COLUMNS.iter().find_map(|c| cell(row, c)),
        };
        value.map_or(true, flag_is_active)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("schema", &self.schema)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn cell<'r>(row: &'r Row, column: &str) -> Option<&'r serde_json::Value> {
    row.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map(|(_, value)| value)
}

/// Interpret a status cell; null counts as active
fn flag_is_active(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "active" | "enabled" | "true" | "yes" | "y" | "1"
        ),
        serde_json::Value::Null => true,
        _ => false,
    }
}
