use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    sha256_bytes_hex(s.as_bytes())
}

pub fn sha256_bytes_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Short content hash used in audit records and placeholders.
pub fn content_hash(content: &str) -> String {
    format!("sha256:{}", sha256_hex(content))
}

/// Hash of the canonical (JCS) serialization of `value`.
///
/// Config structs and registries are hashed through this so that the
/// fingerprint is independent of field order in the source document.
pub fn canonical_fingerprint<T: Serialize>(value: &T) -> String {
    let raw = crate::canonical::to_string(value)
        .or_else(|_| serde_json::to_string(value).map_err(anyhow::Error::from))
        .unwrap_or_default();
    sha256_hex(&raw)
}

/// Computes a deterministic fingerprint from named components.
///
/// Components are sorted by name so that callers may push them in any order.
pub fn compute(components: &[(&str, String)]) -> Fingerprint {
    let mut parts: Vec<String> = components
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    parts.sort();

    // Invalidate everything on engine upgrades.
    parts.push(format!("concord_version={}", env!("CARGO_PKG_VERSION")));

    let raw = parts.join("\n");
    Fingerprint {
        hex: sha256_hex(&raw),
        components: parts,
    }
}

/// Describes the process that produced a result, for reproducibility.
pub fn runtime_descriptor() -> serde_json::Value {
    serde_json::json!({
        "crate_version": env!("CARGO_PKG_VERSION"),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}
