use concord_core::detect::{Detector, DetectorResult};
use concord_core::model::{ArtifactType, MismatchType};
use concord_core::normalize::collapse_whitespace;
use serde_json::json;

const MAX_CONFIDENCE: f64 = 0.95;
const MIN_CONFIDENCE: f64 = 0.7;

/// Prose that matches once whitespace runs and blank lines are collapsed.
///
/// Confidence drops as the share of changed characters grows, but never
/// below the floor: whatever the size of the delta, only whitespace moved.
pub struct WhitespaceDetector;

impl Detector for WhitespaceDetector {
    fn name(&self) -> &'static str {
        "whitespace"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        20
    }

    fn supported_types(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Text]
    }

    fn detect(
        &self,
        source: &str,
        target: &str,
        _artifact_type: ArtifactType,
    ) -> anyhow::Result<Option<DetectorResult>> {
        if collapse_whitespace(source) != collapse_whitespace(target) {
            return Ok(None);
        }

        let a = source.chars().count();
        let b = target.chars().count();
        let delta = a.abs_diff(b);
        let size = a.max(b).max(1);
        let share = delta as f64 / size as f64;
        let confidence = (MAX_CONFIDENCE - share * 0.5).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);

        Ok(Some(
            DetectorResult::new(
                self,
                MismatchType::Whitespace,
                confidence,
                "versions match after collapsing whitespace",
            )
            .with_meta("char_delta", json!(delta)),
        ))
    }
}
