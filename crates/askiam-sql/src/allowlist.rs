//! Authoritative set of tables generated SQL may reference

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default allow-listed tables
pub const DEFAULT_TABLES: [&str; 3] = ["Users", "Applications", "Roles"];

/// Case-insensitive table allow-list
///
/// Names are matched against the full identifier as written in the
/// statement, so a schema-qualified `mysql.user` never matches a bare
/// `user` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TableAllowlist {
    // lowercase name -> name as configured
    tables: BTreeMap<String, String>,
}

impl TableAllowlist {
    /// Allow-list from table names
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = tables
            .into_iter()
            .map(Into::into)
            .map(|t| (t.to_ascii_lowercase(), t))
            .collect();
        Self { tables }
    }

    /// Whether `table` is allowed
    #[inline]
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_ascii_lowercase())
    }

    /// Add a table
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.tables.insert(table.to_ascii_lowercase(), table);
        self
    }

    /// Configured names, in case-insensitive order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tables.values().map(String::as_str)
    }

    /// Number of tables
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the allow-list is empty (rejects everything)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for TableAllowlist {
    fn default() -> Self {
        Self::new(DEFAULT_TABLES)
    }
}

impl From<Vec<String>> for TableAllowlist {
    fn from(tables: Vec<String>) -> Self {
        Self::new(tables)
    }
}

impl From<TableAllowlist> for Vec<String> {
    fn from(allowlist: TableAllowlist) -> Self {
        allowlist.tables.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_three_tables() {
        let allow = TableAllowlist::default();
        assert_eq!(allow.len(), 3);
        assert!(allow.contains("users"));
        assert!(allow.contains("ROLES"));
        assert!(!allow.contains("UserRoles"));
    }

    #[test]
    fn qualified_names_do_not_match_bare_entries() {
        let allow = TableAllowlist::default();
        assert!(!allow.contains("public.Users"));
        assert!(allow.with_table("public.Users").contains("PUBLIC.users"));
    }

    #[test]
    fn empty_allowlist() {
        let allow = TableAllowlist::new(Vec::<String>::new());
        assert!(allow.is_empty());
        assert!(!allow.contains("Users"));
    }
}
