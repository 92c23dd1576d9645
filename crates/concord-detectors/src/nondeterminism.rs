use std::collections::BTreeMap;

use concord_core::detect::{Detector, DetectorResult};
use concord_core::model::{ArtifactType, MismatchType};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

lazy_static! {
    static ref RFC2822: Regex = Regex::new(
        r"\b(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun),\s+\d{1,2}\s+(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{4}\s+\d{2}:\d{2}(?::\d{2})?\s+(?:[+-]\d{4}|GMT|UTC|[A-Z]{3})"
    )
    .unwrap();
    static ref UUID: Regex = Regex::new(
        r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b"
    )
    .unwrap();
    static ref ISO8601: Regex = Regex::new(
        r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?"
    )
    .unwrap();
    static ref SEED: Regex =
        Regex::new(r"(?i)\b(seed|random_state|rng_seed)(\s*[=:]\s*)(\d+)").unwrap();
}

/// Masks run-specific tokens with a per-kind placeholder.
fn mask(s: &str) -> (String, BTreeMap<&'static str, Vec<String>>) {
    let mut found: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    let mut out = s.to_string();
    for (kind, re) in [("rfc2822", &*RFC2822), ("uuid", &*UUID), ("iso8601", &*ISO8601)] {
        let hits: Vec<String> = re.find_iter(&out).map(|m| m.as_str().to_string()).collect();
        if !hits.is_empty() {
            out = re.replace_all(&out, format!("<{kind}>").as_str()).into_owned();
            found.insert(kind, hits);
        }
    }
    let seeds: Vec<String> = SEED.captures_iter(&out).map(|c| c[3].to_string()).collect();
    if !seeds.is_empty() {
        out = SEED.replace_all(&out, "${1}${2}<seed>").into_owned();
        found.insert("seed", seeds);
    }
    (out, found)
}

/// Differences confined to timestamps, UUIDs and seeds.
///
/// These explain a mismatch but say nothing about whether the artifacts
/// are interchangeable, so results are never auto-resolvable.
pub struct NondeterminismDetector;

impl Detector for NondeterminismDetector {
    fn name(&self) -> &'static str {
        "nondeterminism"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        60
    }

    fn supported_types(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Text, ArtifactType::Json, ArtifactType::Code]
    }

    fn detect(
        &self,
        source: &str,
        target: &str,
        _artifact_type: ArtifactType,
    ) -> anyhow::Result<Option<DetectorResult>> {
        let (masked_a, found_a) = mask(source);
        let (masked_b, found_b) = mask(target);
        if masked_a != masked_b {
            return Ok(None);
        }

        let kinds: Vec<&str> = found_a
            .keys()
            .chain(found_b.keys())
            .copied()
            .filter(|k| found_a.get(k) != found_b.get(k))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if kinds.is_empty() {
            return Ok(None);
        }
        let occurrences: usize = kinds
            .iter()
            .map(|k| found_a.get(k).map_or(0, Vec::len))
            .sum();

        Ok(Some(
            DetectorResult::new(
                self,
                MismatchType::Nondeterminism,
                0.85,
                format!("run-specific values differ: {}", kinds.join(", ")),
            )
            .analysis_only()
            .with_meta("kinds", json!(kinds))
            .with_meta("occurrences", json!(occurrences)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(a: &str, b: &str) -> Option<DetectorResult> {
        NondeterminismDetector
            .detect(a, b, ArtifactType::Text)
            .unwrap()
    }

    #[test]
    fn timestamps_and_uuids() {
        let r = detect(
            "run 3f2504e0-4f89-11d3-9a0c-0305e82c3301 at 2024-01-01T10:00:00Z",
            "run 9b2c8d1e-0000-4a1b-8c2d-123456789abc at 2024-01-02T11:30:00.123+02:00",
        )
        .unwrap();
        assert_eq!(r.mismatch_type, MismatchType::Nondeterminism);
        assert!(!r.auto_resolvable);
        assert_eq!(r.metadata["kinds"], json!(["iso8601", "uuid"]));
    }

    #[test]
    fn rfc2822_and_seed() {
        let r = detect(
            "Date: Mon, 1 Jan 2024 10:00:00 +0000\nseed=42",
            "Date: Tue, 2 Jan 2024 09:15:00 GMT\nseed=7",
        )
        .unwrap();
        assert_eq!(r.metadata["kinds"], json!(["rfc2822", "seed"]));
    }

    #[test]
    fn other_changes_are_not_explained() {
        assert!(detect("id 2024-01-01 ok", "id 2024-01-02 failed").is_none());
        assert!(detect("seed=1 x", "seed=1 y").is_none());
    }
}
