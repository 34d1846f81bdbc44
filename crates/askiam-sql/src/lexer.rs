//! Minimal SQL tokenizer
//!
//! Enough structure to recognize statement boundaries, the leading verb,
//! keywords and identifiers. Not a general-purpose SQL parser. String
//! literals and quoted identifiers are kept opaque so their contents can
//! never be mistaken for keywords, and any comment is a hard error.
//! Quoting whose extent differs between dialects (backslash escapes,
//! dollar quoting) is rejected rather than guessed.

use crate::error::UnsafeQueryError;

/// One lexical token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare word: keyword or unquoted identifier
    Word(String),
    /// Quoted identifier (`"x"`, `` `x` ``, `[x]`), content only
    QuotedIdent(String),
    /// String literal, content only
    Literal(String),
    /// Numeric literal
    Number(String),
    /// Bind placeholder (`?` or `$n`)
    Placeholder,
    /// Statement separator
    Semicolon,
    /// Any other single character
    Punct(char),
}

impl Token {
    /// Whether this is a bare word equal (ASCII case-insensitively) to `keyword`
    #[inline]
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// Identifier text for words and quoted identifiers
    #[inline]
    #[must_use]
    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Word(w) | Token::QuotedIdent(w) => Some(w),
            _ => None,
        }
    }
}

/// Tokenize a statement
///
/// # Errors
/// - `UnsafeQueryError::Comment` for `--`, `#` or `/* */` comments
/// - `UnsafeQueryError::Malformed` for unterminated literals or identifiers,
///   a backslash inside quotes, or a dollar-quoted string
pub fn tokenize(sql: &str) -> Result<Vec<Token>, UnsafeQueryError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '-' if next == Some('-') => return Err(UnsafeQueryError::Comment),
            '/' if next == Some('*') => return Err(UnsafeQueryError::Comment),
            '#' => return Err(UnsafeQueryError::Comment),
            '\'' => {
                let (content, end) = read_literal(&chars, i)?;
                tokens.push(Token::Literal(content));
                i = end;
            }
            '"' | '`' | '[' => {
                let close = match c {
                    '[' => ']',
                    other => other,
                };
                let (content, end) = read_quoted(&chars, i, close)?;
                tokens.push(Token::QuotedIdent(content));
                i = end;
            }
            '?' => {
                tokens.push(Token::Placeholder);
                i += 1;
            }
            '$' if next.is_some_and(|n| n.is_ascii_digit()) => {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Placeholder);
            }
            '$' => {
                return Err(UnsafeQueryError::Malformed(
                    "dollar-quoted strings are not supported".to_string(),
                ))
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => {
                tokens.push(Token::Punct(other));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

fn read_literal(chars: &[char], start: usize) -> Result<(String, usize), UnsafeQueryError> {
    let mut content = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            // `\` escapes in MySQL but not in standard SQL
            '\\' => return Err(backslash_in_quotes()),
            '\'' if chars.get(i + 1) == Some(&'\'') => {
                content.push('\'');
                i += 2;
            }
            '\'' => return Ok((content, i + 1)),
            other => {
                content.push(other);
                i += 1;
            }
        }
    }
    Err(UnsafeQueryError::Malformed(
        "unterminated string literal".to_string(),
    ))
}

fn backslash_in_quotes() -> UnsafeQueryError {
    UnsafeQueryError::Malformed("backslash inside quoted text".to_string())
}

fn read_quoted(
    chars: &[char],
    start: usize,
    close: char,
) -> Result<(String, usize), UnsafeQueryError> {
    let mut content = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\\' {
            return Err(backslash_in_quotes());
        }
        if chars[i] == close {
            if close != ']' && chars.get(i + 1) == Some(&close) {
                content.push(close);
                i += 2;
                continue;
            }
            return Ok((content, i + 1));
        }
        content.push(chars[i]);
        i += 1;
    }
    Err(UnsafeQueryError::Malformed(
        "unterminated quoted identifier".to_string(),
    ))
}
