use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, ActionKind};
use crate::errors::{ConcordError, ConcordResult};

/// Classification of a difference between two artifact versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchType {
    Whitespace,
    JsonOrdering,
    NumericEpsilon,
    MarkdownFormatting,
    Nondeterminism,
    Semantic,
    Unknown,
}

impl MismatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whitespace => "whitespace",
            Self::JsonOrdering => "json_ordering",
            Self::NumericEpsilon => "numeric_epsilon",
            Self::MarkdownFormatting => "markdown_formatting",
            Self::Nondeterminism => "nondeterminism",
            Self::Semantic => "semantic",
            Self::Unknown => "unknown",
        }
    }

    /// Noise that does not change behavior.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::Whitespace | Self::JsonOrdering | Self::NumericEpsilon | Self::MarkdownFormatting
        )
    }

    /// A deterministic transform exists that removes this class of noise.
    pub fn auto_resolvable(&self) -> bool {
        self.default_action().is_some()
    }

    pub fn default_action(&self) -> Option<ActionKind> {
        match self {
            Self::Whitespace => Some(ActionKind::NormalizeWhitespace),
            Self::JsonOrdering => Some(ActionKind::CanonicalizeJson),
            Self::MarkdownFormatting => Some(ActionKind::NormalizeMarkdown),
            Self::NumericEpsilon | Self::Nondeterminism | Self::Semantic | Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for MismatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchStatus {
    Detected,
    Analyzing,
    Resolved,
    Failed,
    Skipped,
    Error,
    Inconclusive,
}

impl MismatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Analyzing => "analyzing",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Inconclusive => "inconclusive",
        }
    }

    /// Allowed successor states.
    pub fn successors(&self) -> &'static [MismatchStatus] {
        use MismatchStatus::*;
        match self {
            Detected => &[Analyzing, Skipped],
            Analyzing => &[Resolved, Error, Failed, Inconclusive],
            Failed | Inconclusive => &[Analyzing],
            Resolved | Error | Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, next: MismatchStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl std::fmt::Display for MismatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub diff_id: Option<String>,
    #[serde(default)]
    pub evaluation_ids: Vec<String>,
    pub cost_estimate_usd: f64,
    pub latency_ms: u64,
    /// Similarity per method tag.
    #[serde(default)]
    pub similarity_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub seeds: Vec<u64>,
    #[serde(default)]
    pub model_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub detector_versions: BTreeMap<String, String>,
    pub checkpoint_id: Option<String>,
    pub operator: Option<String>,
    pub config_fingerprint: Option<String>,
}

/// A classified difference, mutated only through its status state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub id: String,
    pub run_id: String,
    pub source_artifact_id: String,
    pub target_artifact_id: String,
    pub mismatch_type: MismatchType,
    pub detectors: Vec<String>,
    pub evidence: Evidence,
    status: MismatchStatus,
    pub confidence: f64,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mismatch {
    pub fn new(
        run_id: impl Into<String>,
        source_artifact_id: impl Into<String>,
        target_artifact_id: impl Into<String>,
        mismatch_type: MismatchType,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("mm"),
            run_id: run_id.into(),
            source_artifact_id: source_artifact_id.into(),
            target_artifact_id: target_artifact_id.into(),
            mismatch_type,
            detectors: Vec::new(),
            evidence: Evidence::default(),
            status: MismatchStatus::Detected,
            confidence: confidence.clamp(0.0, 1.0),
            provenance: Provenance::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn status(&self) -> MismatchStatus {
        self.status
    }

    pub fn transition(&mut self, next: MismatchStatus) -> ConcordResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConcordError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(mismatch_id = %self.id, from = %self.status, to = %next, "mismatch transition");
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mismatch() -> Mismatch {
        Mismatch::new("run", "a", "b", MismatchType::Whitespace, 0.9)
    }

    #[test]
    fn happy_path_reaches_terminal_resolved() {
        let mut m = mismatch();
        m.transition(MismatchStatus::Analyzing).unwrap();
        m.transition(MismatchStatus::Resolved).unwrap();
        assert!(m.status().is_terminal());
        let err = m.transition(MismatchStatus::Analyzing).unwrap_err();
        assert!(matches!(err, ConcordError::InvalidTransition { .. }));
    }

    #[test]
    fn cannot_skip_analysis() {
        let mut m = mismatch();
        assert!(m.transition(MismatchStatus::Resolved).is_err());
        assert!(m.transition(MismatchStatus::Error).is_err());
        assert_eq!(m.status(), MismatchStatus::Detected);
    }

    #[test]
    fn inconclusive_can_be_reanalyzed() {
        let mut m = mismatch();
        m.transition(MismatchStatus::Analyzing).unwrap();
        m.transition(MismatchStatus::Inconclusive).unwrap();
        m.transition(MismatchStatus::Analyzing).unwrap();
        m.transition(MismatchStatus::Error).unwrap();
        assert!(m.status().is_terminal());
    }

    #[test]
    fn type_lookup_table() {
        assert!(MismatchType::NumericEpsilon.is_benign());
        assert!(!MismatchType::NumericEpsilon.auto_resolvable());
        assert!(!MismatchType::Nondeterminism.is_benign());
        assert_eq!(
            MismatchType::JsonOrdering.default_action(),
            Some(ActionKind::CanonicalizeJson)
        );
    }
}
