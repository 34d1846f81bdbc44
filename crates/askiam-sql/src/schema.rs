//! Table and column names of the entity store

use crate::allowlist::TableAllowlist;
use serde::{Deserialize, Serialize};

/// Users table layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserTable {
    /// Table name
    pub table: String,
    /// Primary key column
    pub id_column: String,
    /// Unique display name column
    pub name_column: String,
    /// Unique email column
    pub email_column: String,
    /// Optional active flag / status column
    pub status_column: Option<String>,
}

impl Default for UserTable {
    fn default() -> Self {
        Self {
            table: "Users".to_string(),
            id_column: "user_id".to_string(),
            name_column: "user_name".to_string(),
            email_column: "email".to_string(),
            status_column: None,
        }
    }
}

/// Applications table layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationTable {
    /// Table name
    pub table: String,
    /// Primary key column
    pub id_column: String,
    /// Unique name column
    pub name_column: String,
}

impl Default for ApplicationTable {
    fn default() -> Self {
        Self {
            table: "Applications".to_string(),
            id_column: "app_id".to_string(),
            name_column: "app_name".to_string(),
        }
    }
}

/// Roles table layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTable {
    /// Table name
    pub table: String,
    /// Primary key column
    pub id_column: String,
    /// Role name column
    pub name_column: String,
    /// Owning application column
    pub app_column: String,
}

impl Default for RoleTable {
    fn default() -> Self {
        Self {
            table: "Roles".to_string(),
            id_column: "role_id".to_string(),
            name_column: "role_name".to_string(),
            app_column: "app_name".to_string(),
        }
    }
}

/// Existing role assignments, used for the duplicate-grant check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantTable {
    /// Table name
    pub table: String,
    /// User column
    pub user_column: String,
    /// Role column
    pub role_column: String,
    /// Application column
    pub app_column: String,
}

impl Default for GrantTable {
    fn default() -> Self {
        Self {
            table: "UserRoles".to_string(),
            user_column: "user_name".to_string(),
            role_column: "role_name".to_string(),
            app_column: "app_name".to_string(),
        }
    }
}

/// Full entity store layout
///
/// The fixed schema has no grants table; `grants` stays `None` unless a
/// deployment adds one, in which case it must also be allow-listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySchema {
    /// Users
    pub users: UserTable,
    /// Applications
    pub applications: ApplicationTable,
    /// Roles
    pub roles: RoleTable,
    /// Optional role assignments
    pub grants: Option<GrantTable>,
}

impl EntitySchema {
    /// Enable the duplicate-grant check
    #[inline]
    #[must_use]
    pub fn with_grants(mut self, grants: GrantTable) -> Self {
        self.grants = Some(grants);
        self
    }

    /// Every configured identifier, paired with a label for error messages
    fn identifiers(&self) -> Vec<(&'static str, &str)> {
        let mut idents = vec![
            ("users.table", self.users.table.as_str()),
            ("users.id_column", self.users.id_column.as_str()),
            ("users.name_column", self.users.name_column.as_str()),
            ("users.email_column", self.users.email_column.as_str()),
            ("applications.table", self.applications.table.as_str()),
            ("applications.id_column", self.applications.id_column.as_str()),
            ("applications.name_column", self.applications.name_column.as_str()),
            ("roles.table", self.roles.table.as_str()),
            ("roles.id_column", self.roles.id_column.as_str()),
            ("roles.name_column", self.roles.name_column.as_str()),
            ("roles.app_column", self.roles.app_column.as_str()),
        ];
        if let Some(status) = &self.users.status_column {
            idents.push(("users.status_column", status.as_str()));
        }
        if let Some(grants) = &self.grants {
            idents.push(("grants.table", grants.table.as_str()));
            idents.push(("grants.user_column", grants.user_column.as_str()));
            idents.push(("grants.role_column", grants.role_column.as_str()));
            idents.push(("grants.app_column", grants.app_column.as_str()));
        }
        idents
    }

    /// Tables the schema reads from
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.users.table.as_str()),
            Some(self.applications.table.as_str()),
            Some(self.roles.table.as_str()),
            self.grants.as_ref().map(|g| g.table.as_str()),
        ]
        .into_iter()
        .flatten()
    }

    /// Check identifiers are plain and every table is allow-listed
    ///
    /// # Errors
    /// Returns a message naming the first offending setting.
    pub fn validate(&self, allowlist: &TableAllowlist) -> Result<(), String> {
        for (label, ident) in self.identifiers() {
            if !is_plain_identifier(ident) {
                return Err(format!("{label} is not a plain identifier: '{ident}'"));
            }
        }
        for table in self.tables() {
            if !allowlist.contains(table) {
                return Err(format!("table '{table}' is not in sql_table_allowlist"));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
#[must_use]
pub fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_validates_against_default_allowlist() {
        assert!(EntitySchema::default().validate(&TableAllowlist::default()).is_ok());
    }

    #[test]
    fn grants_table_must_be_allowlisted() {
        let schema = EntitySchema::default().with_grants(GrantTable::default());
        let err = schema.validate(&TableAllowlist::default()).unwrap_err();
        assert!(err.contains("UserRoles"));

        let allow = TableAllowlist::default().with_table("UserRoles");
        assert!(schema.validate(&allow).is_ok());
    }

    #[test]
    fn injected_identifier_is_rejected() {
        let mut schema = EntitySchema::default();
        schema.roles.name_column = "role_name; DROP TABLE Roles".to_string();
        let err = schema.validate(&TableAllowlist::default()).unwrap_err();
        assert!(err.starts_with("roles.name_column"));
    }

    #[test]
    fn plain_identifiers() {
        assert!(is_plain_identifier("app_name"));
        assert!(is_plain_identifier("_x1"));
        assert!(!is_plain_identifier("1x"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("a.b"));
    }
}
