//! Static, deny-by-default safety check for generated SQL
//!
//! A statement is accepted only if it is a single top-level `SELECT`, has no
//! comments, uses no blocklisted keyword, and every table it reads from
//! (after `FROM`, `JOIN` or `TABLE`, including sub-selects and `UNION` arms) is in
//! the allow-list. The check is a pure function of the statement text and
//! the allow-list, so validating the same string twice always agrees.
//!
//! Acceptance is necessary but not sufficient for execution: the gateway
//! only executes a [`SafeQuery`], which carries its bound parameters
//! separately from the statement text.

use crate::allowlist::TableAllowlist;
use crate::error::UnsafeQueryError;
use crate::intent::GeneratedQuery;
use crate::lexer::{tokenize, Token};
use serde::Serialize;

/// Keywords that never appear in an accepted statement
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "REPLACE",
    "MERGE",
    "EXEC",
    "EXECUTE",
    "CALL",
    "GRANT",
    "REVOKE",
    "INTO",
    "LOAD",
    "HANDLER",
    "RENAME",
    "LOCK",
    "UNLOCK",
    "SET",
    "SHUTDOWN",
    "KILL",
    "DECLARE",
    "PREPARE",
    "DEALLOCATE",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "COPY",
    "OUTFILE",
    "DUMPFILE",
    "SLEEP",
    "BENCHMARK",
    "LOAD_FILE",
    "PG_SLEEP",
    "XP_CMDSHELL",
    "WAITFOR",
];

// Words that end a table reference instead of aliasing it
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL", "ON",
    "USING", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "EXCEPT", "INTERSECT",
    "WINDOW", "FOR", "FETCH", "TABLE",
];

// Words that close a FROM clause at the current nesting level
const FROM_TERMINATORS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "EXCEPT", "INTERSECT",
    "WINDOW", "FOR", "FETCH",
];

/// Structure recovered from an accepted statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementShape {
    /// Tables read, in order of first appearance
    pub tables: Vec<String>,
    /// Number of bind placeholders
    pub placeholders: usize,
}

/// A statement that passed safety validation, with its bound parameters
///
/// Only [`SqlSafetyValidator::approve`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafeQuery {
    sql: String,
    params: Vec<String>,
    tables: Vec<String>,
}

impl SafeQuery {
    /// Statement text
    #[inline]
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters, in placeholder order
    #[inline]
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Tables the statement reads
    #[inline]
    #[must_use]
    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

/// Deny-by-default validator over an authoritative allow-list
#[derive(Debug, Clone, Default)]
pub struct SqlSafetyValidator {
    allowlist: TableAllowlist,
}

impl SqlSafetyValidator {
    /// Validator for `allowlist`
    #[must_use]
    pub fn new(allowlist: TableAllowlist) -> Self {
        Self { allowlist }
    }

    /// Allow-list in force
    #[inline]
    #[must_use]
    pub fn allowlist(&self) -> &TableAllowlist {
        &self.allowlist
    }

    /// Validate a statement string
    ///
    /// # Errors
    /// - `UnsafeQueryError` naming the first rule the statement breaks
    pub fn check(&self, sql: &str) -> Result<StatementShape, UnsafeQueryError> {
        let result = self.check_inner(sql);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "statement rejected by safety policy");
        }
        result
    }

    /// Validate a generated query and bind it for execution
    ///
    /// # Errors
    /// - `UnsafeQueryError` from [`check`](Self::check)
    /// - `UnsafeQueryError::ParameterMismatch` if the placeholder count differs
    ///   from the number of parameters
    pub fn approve(&self, query: GeneratedQuery) -> Result<SafeQuery, UnsafeQueryError> {
        let shape = self.check(&query.sql)?;
        if shape.placeholders != query.params.len() {
            return Err(UnsafeQueryError::ParameterMismatch {
                placeholders: shape.placeholders,
                params: query.params.len(),
            });
        }
        Ok(SafeQuery {
            sql: query.sql,
            params: query.params,
            tables: shape.tables,
        })
    }

    fn check_inner(&self, sql: &str) -> Result<StatementShape, UnsafeQueryError> {
        if sql.trim().is_empty() {
            return Err(UnsafeQueryError::Empty);
        }
        let mut tokens = tokenize(sql)?;

        // One trailing terminator is tolerated, nothing else.
        if tokens.last() == Some(&Token::Semicolon) {
            tokens.pop();
        }
        if tokens.is_empty() {
            return Err(UnsafeQueryError::Empty);
        }
        if tokens.contains(&Token::Semicolon) {
            return Err(UnsafeQueryError::MultipleStatements);
        }

        match &tokens[0] {
            t if t.is_keyword("SELECT") => {}
            other => return Err(UnsafeQueryError::NotSelect(describe(other))),
        }

        for token in &tokens {
            if let Token::Word(word) = token {
                if let Some(kw) = BLOCKED_KEYWORDS
                    .iter()
                    .find(|kw| word.eq_ignore_ascii_case(kw))
                {
                    return Err(UnsafeQueryError::ForbiddenKeyword((*kw).to_string()));
                }
            }
        }

        let tables = referenced_tables(&tokens)?;
        if tables.is_empty() {
            return Err(UnsafeQueryError::NoTableReference);
        }
        if let Some(table) = tables.iter().find(|t| !self.allowlist.contains(t)) {
            return Err(UnsafeQueryError::TableNotAllowed(table.clone()));
        }

        let placeholders = tokens.iter().filter(|t| **t == Token::Placeholder).count();
        Ok(StatementShape {
            tables,
            placeholders,
        })
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) | Token::QuotedIdent(w) | Token::Number(w) => w.clone(),
        Token::Literal(_) => "<literal>".to_string(),
        Token::Placeholder => "?".to_string(),
        Token::Semicolon => ";".to_string(),
        Token::Punct(c) => c.to_string(),
    }
}

fn is_clause_keyword(token: &Token) -> bool {
    CLAUSE_KEYWORDS.iter().any(|kw| token.is_keyword(kw))
}

/// Collect every table identifier in FROM clauses, JOINs and `TABLE` shorthands
///
/// Tracks parenthesis depth so that commas inside function calls or
/// sub-selects are not read as table-list separators, while a comma after a
/// join condition still is.
fn referenced_tables(tokens: &[Token]) -> Result<Vec<String>, UnsafeQueryError> {
    let mut tables: Vec<String> = Vec::new();
    // Whether each open nesting level is currently inside a FROM clause
    let mut in_from: Vec<bool> = vec![false];
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        match token {
            Token::Punct('(') => {
                in_from.push(false);
                i += 1;
                continue;
            }
            Token::Punct(')') => {
                if in_from.len() > 1 {
                    in_from.pop();
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        let level = in_from.len() - 1;
        if token.is_keyword("FROM") || token.is_keyword("JOIN") {
            in_from[level] = true;
            i = table_reference(tokens, i + 1, &mut tables)?;
        } else if token.is_keyword("TABLE") {
            // `TABLE t` is shorthand for `SELECT * FROM t`
            i = table_reference(tokens, i + 1, &mut tables)?;
        } else if in_from[level] && *token == Token::Punct(',') {
            i = table_reference(tokens, i + 1, &mut tables)?;
        } else {
            if in_from[level] && FROM_TERMINATORS.iter().any(|kw| token.is_keyword(kw)) {
                in_from[level] = false;
            }
            i += 1;
        }
    }

    Ok(tables)
}

/// Read one table reference starting at `i`; returns the index after it
///
/// A sub-select is left in place for the caller to descend into.
fn table_reference(
    tokens: &[Token],
    i: usize,
    tables: &mut Vec<String>,
) -> Result<usize, UnsafeQueryError> {
    match tokens.get(i) {
        Some(Token::Punct('(')) => return Ok(i),
        Some(t) if t.ident().is_some() && !is_clause_keyword(t) => {}
        Some(other) => {
            return Err(UnsafeQueryError::Malformed(format!(
                "expected table name, found '{}'",
                describe(other)
            )))
        }
        None => {
            return Err(UnsafeQueryError::Malformed(
                "expected table name at end of statement".to_string(),
            ))
        }
    }

    let (name, next) = qualified_name(tokens, i)?;
    if !tables.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
        tables.push(name);
    }
    Ok(skip_alias(tokens, next))
}

/// `ident ( '.' ident )*`, joined with dots
fn qualified_name(tokens: &[Token], start: usize) -> Result<(String, usize), UnsafeQueryError> {
    let mut parts = Vec::new();
    let mut i = start;
    loop {
        match tokens.get(i).and_then(Token::ident) {
            Some(part) => parts.push(part.to_string()),
            None => {
                return Err(UnsafeQueryError::Malformed(
                    "incomplete qualified table name".to_string(),
                ))
            }
        }
        i += 1;
        if tokens.get(i) == Some(&Token::Punct('.')) {
            i += 1;
        } else {
            break;
        }
    }
    Ok((parts.join("."), i))
}

fn skip_alias(tokens: &[Token], mut i: usize) -> usize {
    if tokens.get(i).is_some_and(|t| t.is_keyword("AS")) {
        i += 1;
        if tokens.get(i).and_then(Token::ident).is_some() {
            i += 1;
        }
        return i;
    }
    match tokens.get(i) {
        Some(t) if t.ident().is_some() && !is_clause_keyword(t) => i + 1,
        _ => i,
    }
}
