//! Built-in idempotent transforms.

use crate::canonical;
use crate::model::{ActionKind, ArtifactType};
use crate::normalize;

use super::Transform;

/// CRLF/CR to LF and exactly one trailing newline. Applies to every type.
pub struct NormalizeNewlines;

impl Transform for NormalizeNewlines {
    fn id(&self) -> &'static str {
        "normalize_newlines"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn action(&self) -> ActionKind {
        ActionKind::NormalizeNewlines
    }
    fn artifact_types(&self) -> Option<&'static [ArtifactType]> {
        None
    }
    fn apply(&self, content: &str, _artifact_type: ArtifactType) -> String {
        normalize::normalize_newlines_with_trailing(content)
    }
}

/// Collapses whitespace in prose.
pub struct NormalizeWhitespace;

impl Transform for NormalizeWhitespace {
    fn id(&self) -> &'static str {
        "normalize_whitespace"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn action(&self) -> ActionKind {
        ActionKind::NormalizeWhitespace
    }
    fn artifact_types(&self) -> Option<&'static [ArtifactType]> {
        Some(&[ArtifactType::Text])
    }
    fn apply(&self, content: &str, _artifact_type: ArtifactType) -> String {
        normalize::collapse_whitespace_with_trailing(content)
    }
}

/// Whitespace normalization for code: newlines only, indentation is kept.
pub struct CodeWhitespace;

impl Transform for CodeWhitespace {
    fn id(&self) -> &'static str {
        "normalize_whitespace_code"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn action(&self) -> ActionKind {
        ActionKind::NormalizeWhitespace
    }
    fn artifact_types(&self) -> Option<&'static [ArtifactType]> {
        Some(&[ArtifactType::Code])
    }
    fn apply(&self, content: &str, artifact_type: ArtifactType) -> String {
        NormalizeNewlines.apply(content, artifact_type)
    }
}

/// JCS canonical form. Unparsable input comes back untouched.
pub struct CanonicalizeJson;

impl Transform for CanonicalizeJson {
    fn id(&self) -> &'static str {
        "canonicalize_json"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn action(&self) -> ActionKind {
        ActionKind::CanonicalizeJson
    }
    fn artifact_types(&self) -> Option<&'static [ArtifactType]> {
        Some(&[ArtifactType::Json])
    }
    fn apply(&self, content: &str, _artifact_type: ArtifactType) -> String {
        canonical::canonicalize_str(content).unwrap_or_else(|| content.to_string())
    }
}

pub struct NormalizeMarkdown;

impl Transform for NormalizeMarkdown {
    fn id(&self) -> &'static str {
        "normalize_markdown"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn action(&self) -> ActionKind {
        ActionKind::NormalizeMarkdown
    }
    fn artifact_types(&self) -> Option<&'static [ArtifactType]> {
        Some(&[ArtifactType::Text])
    }
    fn apply(&self, content: &str, _artifact_type: ArtifactType) -> String {
        normalize::normalize_markdown(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtins() -> Vec<(Box<dyn Transform>, ArtifactType)> {
        vec![
            (Box::new(NormalizeNewlines), ArtifactType::Text),
            (Box::new(NormalizeWhitespace), ArtifactType::Text),
            (Box::new(CodeWhitespace), ArtifactType::Code),
            (Box::new(CanonicalizeJson), ArtifactType::Json),
            (Box::new(NormalizeMarkdown), ArtifactType::Text),
        ]
    }

    #[test]
    fn every_builtin_reaches_a_fixed_point() {
        let inputs = [
            "",
            "\n\n",
            "Hello,   world!\r\n  \r\n\r\n",
            "{\"b\": 2,\r\n \"a\": [1, 2.50]}",
            "{broken",
            "#  Title ##\n* a\n\n\n```\n  code  \n```",
            "\tfn main() {\r\n\t\tprintln!(\"x\");  \r}\r",
            "\u{00A0}lead and trail\u{00A0}",
            "# a # #\n",
            "#### x ## ##\n",
            "____a____\n__b__ __c__",
        ];
        for (t, ty) in builtins() {
            for input in inputs {
                let once = t.apply(input, ty);
                assert_eq!(t.apply(&once, ty), once, "{} on {input:?}", t.id());
            }
        }
    }

    #[test]
    fn code_whitespace_keeps_indentation() {
        let out = CodeWhitespace.apply("if x:\r\n    y  = 1\r\n", ArtifactType::Code);
        assert_eq!(out, "if x:\n    y  = 1\n");
    }

    #[test]
    fn canonicalize_json_fails_closed() {
        assert_eq!(CanonicalizeJson.apply("{nope", ArtifactType::Json), "{nope");
        assert_eq!(
            CanonicalizeJson.apply("{\"b\":1, \"a\":2}", ArtifactType::Json),
            "{\"a\":2,\"b\":1}"
        );
    }
}
