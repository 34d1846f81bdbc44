//! AskIAM SQL
//!
//! Generation and static safety validation of the read-only queries the
//! deterministic validation path runs against the entity store.
//!
//! # Overview
//!
//! - **QueryIntent**: what the caller wants to look up (never raw SQL)
//! - **SqlGenerator**: turns an intent into one parameterized SELECT
//! - **SqlSafetyValidator**: deny-by-default check of a generated statement
//!   against an allow-listed table set; the only way to obtain a [`SafeQuery`]
//!
//! # Example
//!
//! ```rust
//! use askiam_sql::{QueryIntent, SqlSafetyValidator, TableAllowlist, TemplateSqlGenerator};
//!
//! let generator = TemplateSqlGenerator::default();
//! let query = generator
//!     .render(&QueryIntent::FindRoleInApplication {
//!         role: "HR Analyst".into(),
//!         application: "Workday".into(),
//!     })
//!     .unwrap();
//! assert_eq!(query.sql, "SELECT * FROM Roles WHERE role_name = ? AND app_name = ?");
//!
//! let validator = SqlSafetyValidator::new(TableAllowlist::default());
//! let safe = validator.approve(query).unwrap();
//! assert_eq!(safe.params(), ["HR Analyst", "Workday"]);
//!
//! assert!(validator.check("SELECT * FROM Users; DROP TABLE Users;").is_err());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod allowlist;
pub mod error;
pub mod generator;
pub mod intent;
pub mod lexer;
pub mod safety;
pub mod schema;

// Re-exports
pub use allowlist::TableAllowlist;
pub use error::{GenerationError, UnsafeQueryError};
pub use generator::{SqlGenerator, TemplateSqlGenerator};
pub use intent::{GeneratedQuery, QueryIntent};
pub use lexer::{tokenize, Token};
pub use safety::{SafeQuery, SqlSafetyValidator, StatementShape};
pub use schema::{ApplicationTable, EntitySchema, GrantTable, RoleTable, UserTable};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
