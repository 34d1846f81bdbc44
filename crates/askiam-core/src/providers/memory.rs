//! In-process reference providers
//!
//! [`InMemoryEntityStore`] runs the restricted statement shape the template
//! generator emits (`SELECT * FROM t [WHERE c = ? [AND c = ?]...] [LIMIT n]`)
//! over seeded rows. [`LexicalVectorStore`] scores documents by query-token
//! overlap. Both are built from an [`EntitySeed`], which is also the format
//! the CLI loads with `--seed`.

use super::{MetadataFilter, RelationalStore, Row, VectorStore};
use crate::error::ProviderError;
use crate::types::ScoredDocument;
use askiam_sql::{tokenize, EntitySchema, SafeQuery, Token};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// User row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Primary key
    pub user_id: String,
    /// Unique name
    pub user_name: String,
    /// Unique email
    pub email: String,
    /// Manager name
    #[serde(default)]
    pub manager: Option<String>,
    /// Active flag
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Application row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    /// Primary key
    pub app_id: String,
    /// Unique name
    pub app_name: String,
    /// Owner
    #[serde(default)]
    pub app_owner: Option<String>,
}

/// Role row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Primary key
    pub role_id: String,
    /// Role name
    pub role_name: String,
    /// Owning application
    pub app_name: String,
    /// Owner
    #[serde(default)]
    pub owner: Option<String>,
}

/// Existing role assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    /// User name
    pub user_name: String,
    /// Role name
    pub role_name: String,
    /// Application name
    pub app_name: String,
}

/// Seed rows for the reference providers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySeed {
    /// Users
    pub users: Vec<UserRecord>,
    /// Applications
    pub applications: Vec<ApplicationRecord>,
    /// Roles
    pub roles: Vec<RoleRecord>,
    /// Existing assignments
    pub grants: Vec<GrantRecord>,
}

impl EntitySeed {
    /// Load seed rows from a JSON file
    ///
    /// # Errors
    /// - `ProviderError::Unavailable` if the file cannot be read
    /// - `ProviderError::Malformed` if it is not a valid seed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Unavailable(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

/// Relational store over in-memory rows
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityStore {
    // lowercase table name -> rows
    tables: IndexMap<String, Vec<Row>>,
}

impl InMemoryEntityStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows to a table
    #[must_use]
    pub fn with_rows(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables
            .entry(table.to_ascii_lowercase())
            .or_default()
            .extend(rows);
        self
    }

    /// Store laid out per `schema`, populated from `seed`
    #[must_use]
    pub fn from_seed(schema: &EntitySchema, seed: &EntitySeed) -> Self {
        let users = seed
            .users
            .iter()
            .map(|u| {
                let mut cells = row([
                    (schema.users.id_column.as_str(), u.user_id.as_str().into()),
                    (schema.users.name_column.as_str(), u.user_name.as_str().into()),
                    (schema.users.email_column.as_str(), u.email.as_str().into()),
                    ("manager", opt(u.manager.as_deref())),
                ]);
                let status = schema.users.status_column.as_deref().unwrap_or("active");
                cells.insert(status.to_string(), u.active.into());
                cells
            })
            .collect();
        let applications = seed
            .applications
            .iter()
            .map(|a| {
                row([
                    (schema.applications.id_column.as_str(), a.app_id.as_str().into()),
                    (schema.applications.name_column.as_str(), a.app_name.as_str().into()),
                    ("app_owner", opt(a.app_owner.as_deref())),
                ])
            })
            .collect();
        let roles = seed
            .roles
            .iter()
            .map(|r| {
                row([
                    (schema.roles.id_column.as_str(), r.role_id.as_str().into()),
                    (schema.roles.name_column.as_str(), r.role_name.as_str().into()),
                    (schema.roles.app_column.as_str(), r.app_name.as_str().into()),
                    ("owner", opt(r.owner.as_deref())),
                ])
            })
            .collect();

        let mut store = Self::new()
            .with_rows(&schema.users.table, users)
            .with_rows(&schema.applications.table, applications)
            .with_rows(&schema.roles.table, roles);

        if let Some(grants) = &schema.grants {
            let rows = seed
                .grants
                .iter()
                .map(|g| {
                    row([
                        (grants.user_column.as_str(), g.user_name.as_str().into()),
                        (grants.role_column.as_str(), g.role_name.as_str().into()),
                        (grants.app_column.as_str(), g.app_name.as_str().into()),
                    ])
                })
                .collect();
            store = store.with_rows(&grants.table, rows);
        }
        store
    }

    fn run(&self, query: &SafeQuery) -> Result<Vec<Row>, ProviderError> {
        let plan = Plan::parse(query.sql())?;
        if plan.columns.len() != query.params().len() {
            return Err(ProviderError::Query(format!(
                "{} predicates but {} parameters",
                plan.columns.len(),
                query.params().len()
            )));
        }
        let Some(rows) = self.tables.get(&plan.table.to_ascii_lowercase()) else {
            return Err(ProviderError::Query(format!("no such table: {}", plan.table)));
        };

        let matches = rows
            .iter()
            .filter(|row| {
                plan.columns
                    .iter()
                    .zip(query.params())
                    .all(|(column, param)| column_matches(row, column, param))
            })
            .take(plan.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matches)
    }
}

#[async_trait]
impl RelationalStore for InMemoryEntityStore {
    async fn fetch(&self, query: &SafeQuery) -> Result<Vec<Row>, ProviderError> {
        self.run(query)
    }
}

/// `SELECT * FROM table [WHERE c = ? [AND c = ?]...] [LIMIT n]`
#[derive(Debug)]
struct Plan {
    table: String,
    columns: Vec<String>,
    limit: Option<usize>,
}

impl Plan {
    fn parse(sql: &str) -> Result<Self, ProviderError> {
        let unsupported = || ProviderError::Query(format!("unsupported statement for in-memory store: {sql}"));
        let tokens = tokenize(sql).map_err(|e| ProviderError::Query(e.to_string()))?;
        let mut it = tokens.iter().filter(|t| **t != Token::Semicolon).peekable();

        let select = it.next().is_some_and(|t| t.is_keyword("SELECT"));
        let star = it.next() == Some(&Token::Punct('*'));
        let from = it.next().is_some_and(|t| t.is_keyword("FROM"));
        if !(select && star && from) {
            return Err(unsupported());
        }
        let table = it.next().and_then(Token::ident).ok_or_else(unsupported)?.to_string();

        let mut columns = Vec::new();
        if it.peek().is_some_and(|t| t.is_keyword("WHERE")) {
            it.next();
            loop {
                let column = it.next().and_then(Token::ident).ok_or_else(unsupported)?;
                if it.next() != Some(&Token::Punct('=')) || it.next() != Some(&Token::Placeholder) {
                    return Err(unsupported());
                }
                columns.push(column.to_string());
                if it.peek().is_some_and(|t| t.is_keyword("AND")) {
                    it.next();
                } else {
                    break;
                }
            }
        }

        let mut limit = None;
        if it.peek().is_some_and(|t| t.is_keyword("LIMIT")) {
            it.next();
            match it.next() {
                Some(Token::Number(n)) => limit = Some(n.parse().map_err(|_| unsupported())?),
                _ => return Err(unsupported()),
            }
        }

        if it.next().is_some() {
            return Err(unsupported());
        }
        Ok(Self {
            table,
            columns,
            limit,
        })
    }
}

fn column_matches(row: &Row, column: &str, param: &str) -> bool {
    row.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .is_some_and(|(_, value)| value_text(value).trim().eq_ignore_ascii_case(param.trim()))
}

/// Text form of a cell for matching and display
#[must_use]
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn row<const N: usize>(cells: [(&str, serde_json::Value); N]) -> Row {
    cells
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn opt(value: Option<&str>) -> serde_json::Value {
    value.map_or(serde_json::Value::Null, Into::into)
}

/// Stored document before scoring
#[derive(Debug, Clone, PartialEq)]
struct Document {
    id: String,
    content: String,
    metadata: BTreeMap<String, String>,
    tokens: BTreeSet<String>,
}

/// Vector store scoring documents by query-token overlap
///
/// Score is the share of distinct query tokens present in the document, so a
/// query built only from names found in a document scores 1.0.
#[derive(Debug, Clone, Default)]
pub struct LexicalVectorStore {
    documents: Vec<Document>,
}

impl LexicalVectorStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document
    #[must_use]
    pub fn with_document(
        mut self,
        id: impl Into<String>,
        content: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let content = content.into();
        self.documents.push(Document {
            id: id.into(),
            tokens: tokens(&content),
            content,
            metadata,
        });
        self
    }

    /// Documents describing every seeded role, user and application
    ///
    /// Metadata carries `type` (`role`, `user`, `application`) plus the row's
    /// columns under the schema's column names.
    #[must_use]
    pub fn from_seed(schema: &EntitySchema, seed: &EntitySeed) -> Self {
        let mut store = Self::new();
        for r in &seed.roles {
            let owner = r.owner.as_deref().unwrap_or("unassigned");
            store = store.with_document(
                format!("role-{}", r.role_id),
                format!(
                    "Role {} belongs to the {} application. Role ID is {}. The role owner is {owner}.",
                    r.role_name, r.app_name, r.role_id
                ),
                meta([
                    ("type", "role"),
                    (schema.roles.id_column.as_str(), r.role_id.as_str()),
                    (schema.roles.name_column.as_str(), r.role_name.as_str()),
                    (schema.roles.app_column.as_str(), r.app_name.as_str()),
                ]),
            );
        }
        for u in &seed.users {
            let manager = u.manager.as_deref().unwrap_or("unassigned");
            store = store.with_document(
                format!("user-{}", u.user_id),
                format!(
                    "User {} has user ID {}. Email address is {}. The manager of this user is {manager}.",
                    u.user_name, u.user_id, u.email
                ),
                meta([
                    ("type", "user"),
                    (schema.users.id_column.as_str(), u.user_id.as_str()),
                    (schema.users.name_column.as_str(), u.user_name.as_str()),
                    (schema.users.email_column.as_str(), u.email.as_str()),
                ]),
            );
        }
        for a in &seed.applications {
            let owner = a.app_owner.as_deref().unwrap_or("unassigned");
            store = store.with_document(
                format!("application-{}", a.app_id),
                format!(
                    "Application {} has application ID {}. The application owner is {owner}.",
                    a.app_name, a.app_id
                ),
                meta([
                    ("type", "application"),
                    (schema.applications.id_column.as_str(), a.app_id.as_str()),
                    (schema.applications.name_column.as_str(), a.app_name.as_str()),
                ]),
            );
        }
        store
    }

    /// Number of documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn search(&self, query: &str, k: usize, filter: Option<&MetadataFilter>) -> Vec<ScoredDocument> {
        let query_tokens = tokens(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        #[allow(clippy::cast_precision_loss)]
        let mut scored: Vec<ScoredDocument> = self
            .documents
            .iter()
            .filter(|d| filter.map_or(true, |f| metadata_matches(&d.metadata, f)))
            .filter_map(|d| {
                let hits = query_tokens.intersection(&d.tokens).count();
                (hits > 0).then(|| ScoredDocument {
                    id: d.id.clone(),
                    content: d.content.clone(),
                    metadata: d.metadata.clone(),
                    score: hits as f64 / query_tokens.len() as f64,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);
        scored
    }
}

#[async_trait]
impl VectorStore for LexicalVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        Ok(self.search(query, k, filter))
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '@' && c != '.')
        .map(|t| t.trim_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn metadata_matches(metadata: &BTreeMap<String, String>, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(key, wanted)| {
        metadata
            .get(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(wanted.trim()))
    })
}

fn meta<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use askiam_sql::{GeneratedQuery, GrantTable, SqlSafetyValidator, TableAllowlist};

    fn seed() -> EntitySeed {
        EntitySeed {
            users: vec![UserRecord {
                user_id: "U1".into(),
                user_name: "John Doe".into(),
                email: "john.doe@example.com".into(),
                manager: Some("Jane Roe".into()),
                active: true,
            }],
            applications: vec![ApplicationRecord {
                app_id: "A1".into(),
                app_name: "Workday".into(),
                app_owner: None,
            }],
            roles: vec![RoleRecord {
                role_id: "R1".into(),
                role_name: "HR Analyst".into(),
                app_name: "Workday".into(),
                owner: None,
            }],
            grants: vec![],
        }
    }

    fn approve(sql: &str, params: &[&str]) -> SafeQuery {
        SqlSafetyValidator::new(TableAllowlist::default().with_table("UserRoles"))
            .approve(GeneratedQuery::new(
                sql,
                params.iter().map(|p| (*p).to_string()).collect(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn fetches_by_predicates_case_insensitively() {
        let store = InMemoryEntityStore::from_seed(&EntitySchema::default(), &seed());
        let rows = store
            .fetch(&approve(
                "SELECT * FROM Roles WHERE role_name = ? AND app_name = ?",
                &["hr analyst", "WORKDAY"],
            ))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["role_id"], "R1");

        let none = store
            .fetch(&approve("SELECT * FROM Roles WHERE role_name = ?", &["Payroll Admin"]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn users_carry_active_flag() {
        let store = InMemoryEntityStore::from_seed(&EntitySchema::default(), &seed());
        let rows = store
            .fetch(&approve("SELECT * FROM Users WHERE email = ?", &["john.doe@example.com"]))
            .await
            .unwrap();
        assert_eq!(rows[0]["active"], true);
    }

    #[tokio::test]
    async fn unsupported_shapes_are_query_errors() {
        let store = InMemoryEntityStore::from_seed(&EntitySchema::default(), &seed());
        let err = store
            .fetch(&approve("SELECT user_name FROM Users", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Query(_)));

        let err = store
            .fetch(&approve("SELECT * FROM UserRoles", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Query(m) if m.contains("no such table")));
    }

    #[tokio::test]
    async fn grants_table_is_populated_when_configured() {
        let mut data = seed();
        data.grants.push(GrantRecord {
            user_name: "John Doe".into(),
            role_name: "HR Analyst".into(),
            app_name: "Workday".into(),
        });
        let schema = EntitySchema::default().with_grants(GrantTable::default());
        let store = InMemoryEntityStore::from_seed(&schema, &data);
        let rows = store
            .fetch(&approve(
                "SELECT * FROM UserRoles WHERE user_name = ? AND role_name = ? AND app_name = ? LIMIT 1",
                &["John Doe", "HR Analyst", "Workday"],
            ))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn lexical_search_ranks_and_filters() {
        let store = LexicalVectorStore::from_seed(&EntitySchema::default(), &seed());
        assert_eq!(store.len(), 3);

        let hits = store
            .similarity_search("HR Analyst Workday", 3, None)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "role-R1");
        assert!((hits[0].score - 1.0).abs() < 1e-9);

        let filter: MetadataFilter = [("type".to_string(), "user".to_string())].into_iter().collect();
        let hits = store
            .similarity_search("HR Analyst Workday", 3, Some(&filter))
            .await
            .unwrap();
        assert!(hits.iter().all(|d| d.metadata["type"] == "user"));
    }

    #[test]
    fn seed_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, serde_json::to_string(&seed()).unwrap()).unwrap();
        assert_eq!(EntitySeed::load(&path).unwrap(), seed());
    }
}
