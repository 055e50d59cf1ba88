//! Splits decoded key text into `(field, value)` tokens.
//!
//! Tokens are separated by `:` and split on their first `=`. A `|` inside a
//! value stands for a literal `:`. Empty tokens (`a=1::b=2`, a trailing `:`)
//! are skipped.

use crate::errors::{LicenseError, LicenseResult};
use crate::keywords::FieldCode;

pub const TOKEN_SEPARATOR: char = ':';
pub const VALUE_SEPARATOR: char = '=';
pub const ESCAPED_SEPARATOR: char = '|';

/// One `tag=value` pair of a decoded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub code: FieldCode,
    pub value: String,
    /// Byte offset of the token in the decoded key text.
    pub offset: usize,
}

/// Restore escaped separators inside a value.
pub fn unescape(value: &str) -> String {
    value.replace(ESCAPED_SEPARATOR, ":")
}

/// Inverse of [`unescape`], for building key text.
pub fn escape(value: &str) -> String {
    value.replace(TOKEN_SEPARATOR, "|")
}

pub fn tokenize(text: &str) -> LicenseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut offset = 0;

    for raw in text.split(TOKEN_SEPARATOR) {
        if raw.is_empty() {
            offset += TOKEN_SEPARATOR.len_utf8();
            continue;
        }
        let (tag, value) = raw
            .split_once(VALUE_SEPARATOR)
            .ok_or_else(|| LicenseError::malformed(format!("token at {offset} has no '='")))?;

        if tag.is_empty() {
            return Err(LicenseError::malformed(format!("empty tag at {offset}")));
        }
        let code = FieldCode::from_tag(tag)
            .ok_or_else(|| LicenseError::malformed(format!("unknown tag '{tag}'")))?;
        if value.is_empty() {
            return Err(LicenseError::malformed(format!("empty value for '{tag}'")));
        }

        tokens.push(Token {
            code,
            value: unescape(value),
            offset,
        });
        offset += raw.len() + TOKEN_SEPARATOR.len_utf8();
    }

    if tokens.is_empty() {
        return Err(LicenseError::malformed("empty key text"));
    }
    Ok(tokens)
}
