use concord_core::detect::{Detector, DetectorResult};
use concord_core::model::{ActionKind, ArtifactType, MismatchType};
use concord_core::normalize::{eol_style, normalize_newlines, normalize_newlines_with_trailing};
use serde_json::json;

/// Line-ending style and trailing-newline differences.
pub struct NewlineDetector;

impl Detector for NewlineDetector {
    fn name(&self) -> &'static str {
        "newline"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        10
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
        if normalize_newlines_with_trailing(source) != normalize_newlines_with_trailing(target) {
            return Ok(None);
        }

        let eol_only = normalize_newlines(source) == normalize_newlines(target);
        let (confidence, explanation) = if eol_only {
            (0.95, "versions differ only in line-ending style")
        } else {
            (0.9, "versions differ in line endings or trailing newlines")
        };

        Ok(Some(
            DetectorResult::new(self, MismatchType::Whitespace, confidence, explanation)
                .with_action(ActionKind::NormalizeNewlines)
                .with_meta("eol_source", json!(eol_style(source).as_str()))
                .with_meta("eol_target", json!(eol_style(target).as_str()))
                .with_meta("trailing_newline_only", json!(!eol_only)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_versus_lf() {
        let r = NewlineDetector
            .detect("a\r\nb\r\n", "a\nb\n", ArtifactType::Code)
            .unwrap()
            .unwrap();
        assert_eq!(r.mismatch_type, MismatchType::Whitespace);
        assert_eq!(r.suggested_action, Some(ActionKind::NormalizeNewlines));
        assert_eq!(r.metadata["eol_source"], "crlf");
        assert_eq!(r.metadata["eol_target"], "lf");
        assert!(r.confidence >= 0.9);
    }

    #[test]
    fn trailing_newline_only() {
        let r = NewlineDetector
            .detect("a\nb", "a\nb\n\n", ArtifactType::Text)
            .unwrap()
            .unwrap();
        assert_eq!(r.metadata["trailing_newline_only"], true);
        assert!(r.confidence < 0.95);
    }

    #[test]
    fn content_change_is_ignored() {
        assert!(NewlineDetector
            .detect("a\r\nb", "a\nc", ArtifactType::Text)
            .unwrap()
            .is_none());
        assert!(!NewlineDetector.supports(ArtifactType::Binary));
    }
}
