//! Canonical JSON (RFC 8785 / JCS).
//!
//! Used for the JSON ordering detector, the canonicalize-JSON transform, the
//! canonical-JSON equivalence method and every fingerprint. `serde_jcs`
//! guarantees:
//!
//! - Lexicographic key ordering
//! - No whitespace between tokens
//! - Numbers serialized per ECMAScript/IEEE 754 rules
//! - Unicode preserved as-is (no normalization)

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize a value to its canonical JSON string.
pub fn to_string<T: Serialize>(value: &T) -> Result<String> {
    serde_jcs::to_string(value).context("JCS canonicalization failed")
}

/// Parse `raw` as JSON and return its canonical form.
///
/// Returns `None` for anything that does not parse; callers decide how to
/// fail closed.
pub fn canonicalize_str(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    to_string(&value).ok()
}

/// Like [`canonicalize_str`] but keeps the parse error for reasoning text.
pub fn try_canonicalize_str(raw: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(raw).context("invalid JSON")?;
    to_string(&value)
}
