use concord_core::detect::{Detector, DetectorResult};
use concord_core::fingerprint::sha256_hex;
use concord_core::model::{ArtifactType, MismatchType};
use serde_json::json;

use crate::numbers::{aligned_pairs, same, within_epsilon};

/// Number pairs differing by less than an absolute or relative tolerance.
///
/// The texts must be identical apart from their numeric literals. One pair
/// outside both tolerances rejects the whole comparison.
pub struct NumericEpsilonDetector {
    abs_tol: f64,
    rel_tol: f64,
}

impl NumericEpsilonDetector {
    pub fn new(abs_tol: f64, rel_tol: f64) -> Self {
        Self { abs_tol, rel_tol }
    }
}

impl Default for NumericEpsilonDetector {
    fn default() -> Self {
        Self::new(1e-6, 1e-6)
    }
}

impl Detector for NumericEpsilonDetector {
    fn name(&self) -> &'static str {
        "numeric_epsilon"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        40
    }

    fn supported_types(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Text, ArtifactType::Json, ArtifactType::Code]
    }

    fn config_fingerprint(&self) -> String {
        sha256_hex(&format!("abs={:e};rel={:e}", self.abs_tol, self.rel_tol))
    }

    fn detect(
        &self,
        source: &str,
        target: &str,
        _artifact_type: ArtifactType,
    ) -> anyhow::Result<Option<DetectorResult>> {
        let Some(pairs) = aligned_pairs(source, target) else {
            return Ok(None);
        };

        let mut differing = 0usize;
        let mut max_abs_diff = 0.0f64;
        for &(a, b) in &pairs {
            if same(a, b) {
                continue;
            }
            if !within_epsilon(a, b, self.abs_tol, self.rel_tol) {
                tracing::trace!(a, b, "numeric pair outside tolerance");
                return Ok(None);
            }
            differing += 1;
            max_abs_diff = max_abs_diff.max((a - b).abs());
        }
        if differing == 0 {
            return Ok(None);
        }

        let exact_share = (pairs.len() - differing) as f64 / pairs.len() as f64;
        let confidence = 0.7 + 0.25 * exact_share;

        Ok(Some(
            DetectorResult::new(
                self,
                MismatchType::NumericEpsilon,
                confidence,
                format!("{differing} of {} numbers differ within tolerance", pairs.len()),
            )
            .with_meta("pairs", json!(pairs.len()))
            .with_meta("differing", json!(differing))
            .with_meta("max_abs_diff", json!(max_abs_diff))
            .with_meta("abs_tol", json!(self.abs_tol))
            .with_meta("rel_tol", json!(self.rel_tol)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_jitter_is_numeric_epsilon() {
        let r = NumericEpsilonDetector::default()
            .detect(
                "loss=0.5 acc=0.9 epoch=3",
                "loss=0.500000001 acc=0.9 epoch=3",
                ArtifactType::Text,
            )
            .unwrap()
            .unwrap();
        assert_eq!(r.mismatch_type, MismatchType::NumericEpsilon);
        assert!((0.7..=0.95).contains(&r.confidence));
        assert!(!r.auto_resolvable);
        assert_eq!(r.metadata["differing"], 1);
    }

    #[test]
    fn large_difference_aborts() {
        let d = NumericEpsilonDetector::default();
        assert!(d
            .detect("value 1.0 and 2.0", "value 1.1 and 2.0", ArtifactType::Text)
            .unwrap()
            .is_none());
        assert!(d
            .detect("a 1.0 b 1.0", "a 1.0000000001 b 9.0", ArtifactType::Text)
            .unwrap()
            .is_none());
    }

    #[test]
    fn non_numeric_change_is_ignored() {
        let d = NumericEpsilonDetector::default();
        assert!(d.detect("x 1.0", "y 1.0000000001", ArtifactType::Text).unwrap().is_none());
        assert!(d.detect("x 1.0", "x 1.0", ArtifactType::Text).unwrap().is_none());
    }

    #[test]
    fn fingerprint_tracks_tolerances() {
        assert_ne!(
            NumericEpsilonDetector::new(1e-6, 1e-6).config_fingerprint(),
            NumericEpsilonDetector::new(1e-3, 1e-6).config_fingerprint()
        );
    }
}
