use concord_core::detect::{Detector, DetectorResult};
use concord_core::model::{ArtifactType, MismatchType};
use concord_core::normalize::{count_nbsp, count_zero_width, normalize_unicode};
use serde_json::json;

/// Composition, zero-width and non-breaking-space differences.
///
/// No transform rewrites these, so results are analysis-only. When the
/// invisible characters are present but the versions still differ after
/// normalization, the hit is reported at low confidence as a flag.
pub struct UnicodeDetector;

impl Detector for UnicodeDetector {
    fn name(&self) -> &'static str {
        "unicode"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        25
    }

    fn supported_types(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Text, ArtifactType::Code]
    }

    fn detect(
        &self,
        source: &str,
        target: &str,
        _artifact_type: ArtifactType,
    ) -> anyhow::Result<Option<DetectorResult>> {
        let zero_width = count_zero_width(source) + count_zero_width(target);
        let nbsp = count_nbsp(source) + count_nbsp(target);
        let normalized_match = normalize_unicode(source) == normalize_unicode(target);
        let flagged = zero_width > 0 || nbsp > 0;

        let (confidence, explanation) = match (normalized_match, flagged) {
            (true, _) => (0.9, "versions match after unicode normalization"),
            (false, true) => (
                0.5,
                "invisible or non-breaking characters present alongside other changes",
            ),
            (false, false) => return Ok(None),
        };

        Ok(Some(
            DetectorResult::new(self, MismatchType::Whitespace, confidence, explanation)
                .analysis_only()
                .with_meta("normalized_match", json!(normalized_match))
                .with_meta("zero_width_chars", json!(zero_width))
                .with_meta("nbsp_chars", json!(nbsp)),
        ))
    }
}
