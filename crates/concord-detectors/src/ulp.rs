use concord_core::config::DetectorConfig;
use concord_core::detect::{Detector, DetectorResult};
use concord_core::fingerprint::sha256_hex;
use concord_core::model::{ArtifactType, MismatchType};
use serde_json::json;

use crate::numbers::{aligned_pairs, same, ulp_distance, within_epsilon};

/// Floating-point drift measured in units in the last place.
///
/// NaN only matches NaN and infinities only match themselves. Values below
/// `min_magnitude` fall back to the epsilon tolerances, since subnormal
/// spacing makes bit distance meaningless there. A pair beyond both the ULP
/// bound and epsilon rejects the comparison; otherwise at least half of the
/// pairs must sit within the ULP bound.
pub struct UlpDetector {
    max_ulps: u64,
    min_magnitude: f64,
    abs_tol: f64,
    rel_tol: f64,
}

impl UlpDetector {
    pub fn new(max_ulps: u64, min_magnitude: f64, abs_tol: f64, rel_tol: f64) -> Self {
        Self {
            max_ulps,
            min_magnitude,
            abs_tol,
            rel_tol,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.max_ulps,
            config.ulp_min_magnitude,
            config.numeric_abs_tol,
            config.numeric_rel_tol,
        )
    }

    fn within_ulps(&self, a: f64, b: f64) -> Option<bool> {
        if same(a, b) {
            return Some(true);
        }
        if a.is_nan() || b.is_nan() || a.is_infinite() || b.is_infinite() {
            return None;
        }
        if a.abs().max(b.abs()) < self.min_magnitude {
            return Some(within_epsilon(a, b, self.abs_tol, self.rel_tol));
        }
        ulp_distance(a, b).map(|d| d <= self.max_ulps)
    }
}

impl Default for UlpDetector {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl Detector for UlpDetector {
    fn name(&self) -> &'static str {
        "ulp"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        45
    }

    fn supported_types(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Text, ArtifactType::Json, ArtifactType::Code]
    }

    fn config_fingerprint(&self) -> String {
        sha256_hex(&format!(
            "ulps={};min={:e};abs={:e};rel={:e}",
            self.max_ulps, self.min_magnitude, self.abs_tol, self.rel_tol
        ))
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

        let mut within = 0usize;
        let mut differing = 0usize;
        let mut max_distance = 0u64;
        for &(a, b) in &pairs {
            if !same(a, b) {
                differing += 1;
            }
            match self.within_ulps(a, b) {
                None => return Ok(None),
                Some(true) => within += 1,
                Some(false) => {
                    if !within_epsilon(a, b, self.abs_tol, self.rel_tol) {
                        tracing::trace!(a, b, "pair beyond ulp bound and epsilon");
                        return Ok(None);
                    }
                }
            }
            if let Some(d) = ulp_distance(a, b) {
                max_distance = max_distance.max(d);
            }
        }
        if differing == 0 || within * 2 < pairs.len() {
            return Ok(None);
        }

        let share = within as f64 / pairs.len() as f64;
        Ok(Some(
            DetectorResult::new(
                self,
                MismatchType::NumericEpsilon,
                0.7 + 0.25 * share,
                format!(
                    "{within} of {} numbers within {} ulps",
                    pairs.len(),
                    self.max_ulps
                ),
            )
            .with_meta("pairs", json!(pairs.len()))
            .with_meta("within_ulps", json!(within))
            .with_meta("max_ulp_distance", json!(max_distance))
            .with_meta("max_ulps", json!(self.max_ulps)),
        ))
    }
}
