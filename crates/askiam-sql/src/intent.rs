//! Lookup intents and generated statements

use serde::{Deserialize, Serialize};

/// What the deterministic path wants to look up
///
/// Intents carry user-derived values; a generator must bind them as
/// parameters and never splice them into the statement text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum QueryIntent {
    /// Look up a user by name, or by email when the identifier contains '@'
    FindUser {
        /// User name or email
        identifier: String,
    },
    /// Look up an application by name
    FindApplication {
        /// Application name
        name: String,
    },
    /// Look up a role under a specific application
    FindRoleInApplication {
        /// Role name
        role: String,
        /// Application name
        application: String,
    },
    /// Look up a role in any application
    FindRole {
        /// Role name
        role: String,
    },
    /// Look up an existing assignment
    FindGrant {
        /// User name
        user: String,
        /// Role name
        role: String,
        /// Application name
        application: String,
    },
}

impl QueryIntent {
    /// Short name used in trace entries
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FindUser { .. } => "find_user",
            Self::FindApplication { .. } => "find_application",
            Self::FindRoleInApplication { .. } => "find_role_in_application",
            Self::FindRole { .. } => "find_role",
            Self::FindGrant { .. } => "find_grant",
        }
    }

    /// Bound values, in placeholder order
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::FindUser { identifier } => vec![identifier],
            Self::FindApplication { name } => vec![name],
            Self::FindRoleInApplication { role, application } => vec![role, application],
            Self::FindRole { role } => vec![role],
            Self::FindGrant {
                user,
                role,
                application,
            } => vec![user, role, application],
        }
    }

    /// Whether a user identifier should be matched against the email column
    #[inline]
    #[must_use]
    pub fn is_email(identifier: &str) -> bool {
        identifier.contains('@')
    }
}

/// One parameterized statement plus its bound values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    /// Statement text with `?` placeholders
    pub sql: String,
    /// Values for the placeholders, in order
    pub params: Vec<String>,
}

impl GeneratedQuery {
    /// Create a query
    pub fn new(sql: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_follow_placeholder_order() {
        let intent = QueryIntent::FindGrant {
            user: "John Doe".into(),
            role: "HR Analyst".into(),
            application: "Workday".into(),
        };
        assert_eq!(intent.values(), ["John Doe", "HR Analyst", "Workday"]);
        assert_eq!(intent.name(), "find_grant");
    }

    #[test]
    fn serializes_with_tag() {
        let intent = QueryIntent::FindRole { role: "Admin".into() };
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["intent"], "find_role");
        assert_eq!(json["role"], "Admin");
    }
}
