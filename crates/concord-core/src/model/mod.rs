//! Plain structured records produced and consumed by the engine.
//!
//! Every tag serializes as stable lowercase snake_case so records can be
//! persisted and compared byte-for-byte.

pub mod diff;
pub mod evaluation;
pub mod mismatch;
pub mod resolution;

pub use diff::{ChangeCounts, Diff, DiffBuilder, DiffClassification, Hunk, HunkOp, Span};
pub use evaluation::{
    Consensus, Evaluation, EvaluationMethod, EvaluationResult, EvaluationStatus,
};
pub use mismatch::{Evidence, Mismatch, MismatchStatus, MismatchType, Provenance};
pub use resolution::{ActionKind, Approval, ResolutionAction, ResolutionPlan, SafetyLevel};

use serde::{Deserialize, Serialize};

/// Kind of artifact being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Text,
    Json,
    Code,
    Binary,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 4] = [Self::Text, Self::Json, Self::Code, Self::Binary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Code => "code",
            Self::Binary => "binary",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = crate::errors::ConcordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "code" => Ok(Self::Code),
            "binary" => Ok(Self::Binary),
            other => Err(crate::errors::ConcordError::invalid_record(format!(
                "unknown artifact type '{other}'"
            ))),
        }
    }
}

/// One version of an artifact produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub artifact_type: ArtifactType,
    pub content: String,
}

impl Artifact {
    pub fn new(id: impl Into<String>, artifact_type: ArtifactType, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artifact_type,
            content: content.into(),
        }
    }

    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, ArtifactType::Text, content)
    }

    pub fn json(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, ArtifactType::Json, content)
    }

    pub fn code(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, ArtifactType::Code, content)
    }
}

/// Ordered, deterministic free-form metadata.
pub type Metadata = std::collections::BTreeMap<String, serde_json::Value>;

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_type_tags_are_snake_case() {
        for ty in ArtifactType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
            assert_eq!(ty.as_str().parse::<ArtifactType>().unwrap(), ty);
        }
        assert!("yaml".parse::<ArtifactType>().is_err());
    }
}
