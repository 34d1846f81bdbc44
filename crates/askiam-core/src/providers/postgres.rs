//! PostgreSQL entity store
//!
//! Runs each validated statement inside a read-only transaction that is
//! always rolled back.

use super::{RelationalStore, Row};
use crate::error::ProviderError;
use askiam_sql::SafeQuery;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};

/// Relational store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Store over an existing pool
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url`
    ///
    /// # Errors
    /// - `ProviderError::Unavailable` if the database cannot be reached
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ProviderError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn fetch(&self, query: &SafeQuery) -> Result<Vec<Row>, ProviderError> {
        let sql = numbered_placeholders(query.sql());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| ProviderError::Query(e.to_string()))?;

        let mut statement = sqlx::query(&sql);
        for param in query.params() {
            statement = statement.bind(param.as_str());
        }
        let rows = statement
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ProviderError::Query(e.to_string()));
        if let Err(e) = tx.rollback().await {
            tracing::debug!(error = %e, "read-only transaction rollback failed");
        }
        Ok(rows?.iter().map(decode_row).collect())
    }
}

/// Rewrite `?` placeholders as `$1, $2, ...`, leaving quoted text alone
fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut n = 0;
    for c in sql.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (Some(q), _) if c == q => {
                quote = None;
                out.push(c);
            }
            (None, '?') => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

fn decode_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .map(|column| {
            let i = column.ordinal();
            let value = match column.type_info().name() {
                "BOOL" => json_of(row.try_get::<Option<bool>, _>(i)),
                "INT2" => json_of(row.try_get::<Option<i16>, _>(i)),
                "INT4" => json_of(row.try_get::<Option<i32>, _>(i)),
                "INT8" => json_of(row.try_get::<Option<i64>, _>(i)),
                "FLOAT4" => json_of(row.try_get::<Option<f32>, _>(i)),
                "FLOAT8" => json_of(row.try_get::<Option<f64>, _>(i)),
                "JSON" | "JSONB" => row
                    .try_get::<Option<serde_json::Value>, _>(i)
                    .ok()
                    .flatten()
                    .unwrap_or(serde_json::Value::Null),
                _ => json_of(row.try_get::<Option<String>, _>(i)),
            };
            (column.name().to_string(), value)
        })
        .collect()
}

fn json_of<T: Into<serde_json::Value>>(cell: Result<Option<T>, sqlx::Error>) -> serde_json::Value {
    cell.ok().flatten().map_or(serde_json::Value::Null, Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_outside_quotes() {
        assert_eq!(
            numbered_placeholders("SELECT * FROM Roles WHERE role_name = ? AND app_name = ?"),
            "SELECT * FROM Roles WHERE role_name = $1 AND app_name = $2"
        );
        assert_eq!(
            numbered_placeholders("SELECT * FROM Users WHERE note = 'why?' AND user_name = ?"),
            "SELECT * FROM Users WHERE note = 'why?' AND user_name = $1"
        );
    }
}
