use concord_core::detect::{Detector, DetectorResult};
use concord_core::model::{ArtifactType, MismatchType};
use concord_core::normalize::markdown::{normalize_markdown, strip_markdown};
use serde_json::json;

/// Markdown whose rendered text is unchanged.
///
/// When the canonical spelling already reconciles both versions the result
/// carries the normalize action. Emphasis or heading changes that only
/// match once syntax is stripped are reported for analysis only.
pub struct MarkdownDetector;

impl Detector for MarkdownDetector {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        50
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
        if normalize_markdown(source) == normalize_markdown(target) {
            return Ok(Some(
                DetectorResult::new(
                    self,
                    MismatchType::MarkdownFormatting,
                    0.9,
                    "versions share one canonical markdown spelling",
                )
                .with_meta("canonical_match", json!(true)),
            ));
        }
        if strip_markdown(source) != strip_markdown(target) {
            return Ok(None);
        }
        Ok(Some(
            DetectorResult::new(
                self,
                MismatchType::MarkdownFormatting,
                0.75,
                "versions differ only in markdown markup",
            )
            .analysis_only()
            .with_meta("canonical_match", json!(false)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::model::ActionKind;

    #[test]
    fn bullet_and_heading_spelling() {
        let r = MarkdownDetector
            .detect("#  Title ##\n\n* a\n+ b\n", "# Title\n\n- a\n- b\n", ArtifactType::Text)
            .unwrap()
            .unwrap();
        assert_eq!(r.mismatch_type, MismatchType::MarkdownFormatting);
        assert_eq!(r.suggested_action, Some(ActionKind::NormalizeMarkdown));
        assert!(r.auto_resolvable);
    }

    #[test]
    fn emphasis_change_is_analysis_only() {
        let r = MarkdownDetector
            .detect("Some **bold** text", "Some bold text", ArtifactType::Text)
            .unwrap()
            .unwrap();
        assert!(!r.auto_resolvable);
        assert!(r.confidence < 0.9);
    }

    #[test]
    fn code_changes_are_never_formatting() {
        assert!(MarkdownDetector
            .detect("run `cargo test`", "run `cargo build`", ArtifactType::Text)
            .unwrap()
            .is_none());
    }
}
