//! Additive key checksum.
//!
//! The checksum is the sum of the character codes of the decoded key text
//! that precedes the `:` in front of the checksum token. It catches
//! accidental corruption only; forgery resistance comes from the envelope
//! and the protected-field layer.

use crate::errors::{LicenseError, LicenseResult};
use crate::tokenizer::TOKEN_SEPARATOR;

/// Sum of the character codes of `text`.
pub fn compute(text: &str) -> u64 {
    text.chars().map(|c| u64::from(u32::from(c))).sum()
}

/// The portion of `text` covered by a checksum token starting at `offset`.
pub fn covered_prefix(text: &str, offset: usize) -> &str {
    let end = offset.min(text.len());
    let head = &text[..end];
    head.strip_suffix(TOKEN_SEPARATOR).unwrap_or(head)
}

/// Compare the embedded checksum against the key text.
pub fn verify(text: &str, offset: usize, expected: u64) -> LicenseResult<()> {
    let actual = compute(covered_prefix(text, offset));
    if actual != expected {
        return Err(LicenseError::IntegrityFailure { expected, actual });
    }
    Ok(())
}

/// Append a checksum token to key text. Used when issuing keys.
pub fn seal(text: &str) -> String {
    format!("{text}{TOKEN_SEPARATOR}cksm={}", compute(text))
}
