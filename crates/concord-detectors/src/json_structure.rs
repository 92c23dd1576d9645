use concord_core::canonical::canonicalize_str;
use concord_core::detect::{Detector, DetectorResult};
use concord_core::model::{ArtifactType, MismatchType};
use serde_json::json;

/// Documents whose JCS canonical forms are identical.
pub struct JsonStructureDetector;

impl Detector for JsonStructureDetector {
    fn name(&self) -> &'static str {
        "json_structure"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    fn precedence(&self) -> u32 {
        30
    }

    fn supported_types(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Json]
    }

    fn detect(
        &self,
        source: &str,
        target: &str,
        _artifact_type: ArtifactType,
    ) -> anyhow::Result<Option<DetectorResult>> {
        let (Some(a), Some(b)) = (canonicalize_str(source), canonicalize_str(target)) else {
            return Ok(None);
        };
        if a != b {
            return Ok(None);
        }
        Ok(Some(
            DetectorResult::new(
                self,
                MismatchType::JsonOrdering,
                0.95,
                "documents are identical after canonicalization",
            )
            .with_meta("canonical_bytes", json!(a.len())),
        ))
    }
}
