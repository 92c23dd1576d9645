//! Deterministic mismatch detection.
//!
//! A [`Detector`] is a pure function over two contents that either explains
//! the difference as a known class of noise or stays silent. Detectors are
//! collected in a [`DetectorRegistry`] and run in a fixed precedence order.

pub mod registry;

pub use registry::{DetectionReport, DetectorRegistry, DetectorStats, RunMode};

use serde::{Deserialize, Serialize};

use crate::model::{ActionKind, ArtifactType, Metadata, MismatchType};

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Semantic version, recorded in every result for reproducibility.
    fn version(&self) -> &'static str;

    /// Lower runs first.
    fn precedence(&self) -> u32;

    fn supported_types(&self) -> &'static [ArtifactType];

    fn supports(&self, artifact_type: ArtifactType) -> bool {
        self.supported_types().contains(&artifact_type)
    }

    /// Hash of whatever configuration changes this detector's verdicts.
    fn config_fingerprint(&self) -> String {
        String::new()
    }

    /// `Ok(None)` means "does not explain this difference". Unparsable input
    /// is a `None`, not an error; errors are reserved for detector bugs.
    fn detect(
        &self,
        source: &str,
        target: &str,
        artifact_type: ArtifactType,
    ) -> anyhow::Result<Option<DetectorResult>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorResult {
    pub detector: String,
    pub detector_version: String,
    pub mismatch_type: MismatchType,
    pub confidence: f64,
    pub explanation: String,
    /// False for analysis-only detections that must never be auto-resolved.
    pub auto_resolvable: bool,
    pub suggested_action: Option<ActionKind>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DetectorResult {
    pub fn new<D: Detector + ?Sized>(
        detector: &D,
        mismatch_type: MismatchType,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            "detector_version".to_string(),
            serde_json::json!(detector.version()),
        );
        Self {
            detector: detector.name().to_string(),
            detector_version: detector.version().to_string(),
            mismatch_type,
            confidence: confidence.clamp(0.0, 1.0),
            explanation: explanation.into(),
            auto_resolvable: mismatch_type.auto_resolvable(),
            suggested_action: mismatch_type.default_action(),
            metadata,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_action(mut self, action: ActionKind) -> Self {
        self.suggested_action = Some(action);
        self
    }

    pub fn analysis_only(mut self) -> Self {
        self.auto_resolvable = false;
        self.suggested_action = None;
        self
    }

    pub fn is_benign(&self) -> bool {
        self.mismatch_type.is_benign()
    }
}
