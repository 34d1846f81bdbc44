//! Error types for SQL generation and safety validation

/// Generated SQL failed safety validation
///
/// A hard, local failure: the statement is never executed and never retried
/// with a "fixed" version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsafeQueryError {
    /// Nothing to validate
    #[error("empty statement")]
    Empty,

    /// Statement could not be tokenized
    #[error("malformed statement: {0}")]
    Malformed(String),

    /// Statement contains a comment
    #[error("comments are not allowed")]
    Comment,

    /// More than one statement, or a separator in the middle of one
    #[error("multiple statements detected")]
    MultipleStatements,

    /// Leading verb is not SELECT
    #[error("only SELECT statements are allowed (found '{0}')")]
    NotSelect(String),

    /// Blocklisted keyword present
    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    /// Table outside the allow-list
    #[error("table not allow-listed: {0}")]
    TableNotAllowed(String),

    /// SELECT without any table reference
    #[error("statement references no table")]
    NoTableReference,

    /// Placeholder count does not match bound parameters
    #[error("parameter mismatch: {placeholders} placeholders, {params} bound parameters")]
    ParameterMismatch {
        /// Placeholders found in the statement
        placeholders: usize,
        /// Parameters supplied
        params: usize,
    },
}

impl UnsafeQueryError {
    /// Whether the statement looked like an injection attempt rather than a
    /// merely malformed one
    #[inline]
    #[must_use]
    pub fn is_injection_signal(&self) -> bool {
        matches!(
            self,
            Self::Comment
                | Self::MultipleStatements
                | Self::ForbiddenKeyword(_)
                | Self::TableNotAllowed(_)
                | Self::NotSelect(_)
        )
    }
}

/// SQL generation failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Intent carries an empty value
    #[error("empty value for {0}")]
    EmptyValue(&'static str),

    /// Intent needs a table the schema does not configure
    #[error("intent not supported by schema: {0}")]
    Unsupported(String),

    /// Generator backend failed (model error, timeout, empty output)
    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_error_display() {
        let err = UnsafeQueryError::TableNotAllowed("mysql.user".to_string());
        assert_eq!(err.to_string(), "table not allow-listed: mysql.user");
    }

    #[test]
    fn injection_signal_classification() {
        assert!(UnsafeQueryError::MultipleStatements.is_injection_signal());
        assert!(UnsafeQueryError::Comment.is_injection_signal());
        assert!(!UnsafeQueryError::Empty.is_injection_signal());
        let mismatch = UnsafeQueryError::ParameterMismatch {
            placeholders: 1,
            params: 2,
        };
        assert!(!mismatch.is_injection_signal());
    }
}
