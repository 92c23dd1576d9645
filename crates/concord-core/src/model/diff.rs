//! Structural differences between two artifact versions.
//!
//! A [`Diff`] is immutable once built. Aggregate change counts are derived
//! from the hunks and the signature from the normalized fields, so a diff
//! can never disagree with itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, ArtifactType, Metadata};
use crate::errors::{ConcordError, ConcordResult};

/// Below this similarity a diff counts as significant even without hunks.
pub const SIGNIFICANCE_SIMILARITY: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffClassification {
    Textual,
    Structural,
    Semantic,
    Formatting,
    Ordering,
    Numeric,
    Temporal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HunkOp {
    Insert,
    Delete,
    Replace,
    Move,
    Copy,
}

/// Line span inside one side of the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub length: usize,
}

impl Span {
    pub fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hunk {
    pub op: HunkOp,
    pub source_span: Span,
    pub target_span: Span,
    pub source_content: String,
    pub target_content: String,
    /// Last unchanged line before the hunk, used to re-anchor it.
    pub context_before: Option<String>,
    /// First unchanged line after the hunk.
    pub context_after: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Hunk {
    pub fn new(op: HunkOp, source_span: Span, target_span: Span) -> Self {
        Self {
            op,
            source_span,
            target_span,
            source_content: String::new(),
            target_content: String::new(),
            context_before: None,
            context_after: None,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_content(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_content = source.into();
        self.target_content = target.into();
        self
    }

    pub fn with_context(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub insertions: usize,
    pub deletions: usize,
    pub replacements: usize,
    pub moves: usize,
    pub copies: usize,
}

impl ChangeCounts {
    pub fn from_hunks(hunks: &[Hunk]) -> Self {
        let mut counts = Self::default();
        for h in hunks {
            match h.op {
                HunkOp::Insert => counts.insertions += 1,
                HunkOp::Delete => counts.deletions += 1,
                HunkOp::Replace => counts.replacements += 1,
                HunkOp::Move => counts.moves += 1,
                HunkOp::Copy => counts.copies += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.insertions + self.deletions + self.replacements + self.moves + self.copies
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DiffRecord")]
pub struct Diff {
    id: String,
    source_artifact_id: String,
    target_artifact_id: String,
    classification: DiffClassification,
    artifact_type: ArtifactType,
    hunks: Vec<Hunk>,
    summary: String,
    similarity_score: f64,
    changes: ChangeCounts,
    created_at: DateTime<Utc>,
    signature: String,
}

/// Wire form of a [`Diff`]; validated on the way in.
#[derive(Debug, Clone, Deserialize)]
struct DiffRecord {
    id: String,
    source_artifact_id: String,
    target_artifact_id: String,
    classification: DiffClassification,
    artifact_type: ArtifactType,
    hunks: Vec<Hunk>,
    summary: String,
    similarity_score: f64,
    changes: ChangeCounts,
    created_at: DateTime<Utc>,
    signature: String,
}

impl TryFrom<DiffRecord> for Diff {
    type Error = ConcordError;

    fn try_from(r: DiffRecord) -> Result<Self, Self::Error> {
        let derived = ChangeCounts::from_hunks(&r.hunks);
        if derived != r.changes {
            return Err(ConcordError::invalid_record(
                "diff change counts disagree with hunks",
            ));
        }
        validate_similarity(r.similarity_score, derived.total())?;
        let signature = compute_signature(
            &r.source_artifact_id,
            &r.target_artifact_id,
            r.classification,
            r.artifact_type,
            &r.hunks,
            r.similarity_score,
        );
        if signature != r.signature {
            return Err(ConcordError::invalid_record("diff signature mismatch"));
        }
        Ok(Self {
            id: r.id,
            source_artifact_id: r.source_artifact_id,
            target_artifact_id: r.target_artifact_id,
            classification: r.classification,
            artifact_type: r.artifact_type,
            hunks: r.hunks,
            summary: r.summary,
            similarity_score: r.similarity_score,
            changes: r.changes,
            created_at: r.created_at,
            signature: r.signature,
        })
    }
}

fn validate_similarity(similarity: f64, total_changes: usize) -> ConcordResult<()> {
    if !(0.0..=1.0).contains(&similarity) {
        return Err(ConcordError::invalid_record(format!(
            "similarity_score {similarity} outside [0, 1]"
        )));
    }
    if total_changes == 0 && similarity < 1.0 {
        return Err(ConcordError::invalid_record(
            "diff without changes must have similarity 1.0",
        ));
    }
    if total_changes > 0 && similarity >= 1.0 {
        return Err(ConcordError::invalid_record(
            "diff with changes cannot have similarity 1.0",
        ));
    }
    Ok(())
}

#[derive(Serialize)]
struct SignaturePayload<'a> {
    source: &'a str,
    target: &'a str,
    classification: DiffClassification,
    artifact_type: ArtifactType,
    hunks: Vec<(HunkOp, Span, Span, &'a str, &'a str)>,
    similarity_micros: i64,
}

fn compute_signature(
    source: &str,
    target: &str,
    classification: DiffClassification,
    artifact_type: ArtifactType,
    hunks: &[Hunk],
    similarity: f64,
) -> String {
    let payload = SignaturePayload {
        source,
        target,
        classification,
        artifact_type,
        hunks: hunks
            .iter()
            .map(|h| {
                (
                    h.op,
                    h.source_span,
                    h.target_span,
                    h.source_content.as_str(),
                    h.target_content.as_str(),
                )
            })
            .collect(),
        similarity_micros: (similarity * 1_000_000.0).round() as i64,
    };
    crate::fingerprint::canonical_fingerprint(&payload)
}

impl Diff {
    pub fn builder(
        source_artifact_id: impl Into<String>,
        target_artifact_id: impl Into<String>,
        artifact_type: ArtifactType,
    ) -> DiffBuilder {
        DiffBuilder {
            source_artifact_id: source_artifact_id.into(),
            target_artifact_id: target_artifact_id.into(),
            artifact_type,
            classification: DiffClassification::Textual,
            hunks: Vec::new(),
            summary: String::new(),
            similarity_score: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_artifact_id(&self) -> &str {
        &self.source_artifact_id
    }

    pub fn target_artifact_id(&self) -> &str {
        &self.target_artifact_id
    }

    pub fn classification(&self) -> DiffClassification {
        self.classification
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn similarity_score(&self) -> f64 {
        self.similarity_score
    }

    pub fn changes(&self) -> ChangeCounts {
        self.changes
    }

    pub fn total_changes(&self) -> usize {
        self.changes.total()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stable hash of the normalized fields, for caching and dedup.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn is_significant(&self) -> bool {
        self.similarity_score < SIGNIFICANCE_SIMILARITY || self.changes.total() > 0
    }
}

#[derive(Debug, Clone)]
pub struct DiffBuilder {
    source_artifact_id: String,
    target_artifact_id: String,
    artifact_type: ArtifactType,
    classification: DiffClassification,
    hunks: Vec<Hunk>,
    summary: String,
    similarity_score: Option<f64>,
}

impl DiffBuilder {
    pub fn classification(mut self, classification: DiffClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn hunk(mut self, hunk: Hunk) -> Self {
        self.hunks.push(hunk);
        self
    }

    pub fn hunks(mut self, hunks: impl IntoIterator<Item = Hunk>) -> Self {
        self.hunks.extend(hunks);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn similarity(mut self, similarity: f64) -> Self {
        self.similarity_score = Some(similarity);
        self
    }

    /// Validates invariants and freezes the diff.
    ///
    /// Without an explicit similarity, an empty diff scores 1.0 and a
    /// non-empty one is rejected.
    pub fn build(self) -> ConcordResult<Diff> {
        let changes = ChangeCounts::from_hunks(&self.hunks);
        let similarity = match self.similarity_score {
            Some(s) => s,
            None if changes.total() == 0 => 1.0,
            None => {
                return Err(ConcordError::invalid_record(
                    "similarity_score is required for a diff with changes",
                ))
            }
        };
        validate_similarity(similarity, changes.total())?;

        let signature = compute_signature(
            &self.source_artifact_id,
            &self.target_artifact_id,
            self.classification,
            self.artifact_type,
            &self.hunks,
            similarity,
        );
        let summary = if self.summary.is_empty() {
            default_summary(&changes)
        } else {
            self.summary
        };

        Ok(Diff {
            id: new_id("diff"),
            source_artifact_id: self.source_artifact_id,
            target_artifact_id: self.target_artifact_id,
            classification: self.classification,
            artifact_type: self.artifact_type,
            hunks: self.hunks,
            summary,
            similarity_score: similarity,
            changes,
            created_at: Utc::now(),
            signature,
        })
    }
}

fn default_summary(c: &ChangeCounts) -> String {
    if c.total() == 0 {
        return "no changes".to_string();
    }
    format!(
        "{} insertions, {} deletions, {} replacements, {} moves, {} copies",
        c.insertions, c.deletions, c.replacements, c.moves, c.copies
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace_hunk() -> Hunk {
        Hunk::new(HunkOp::Replace, Span::new(0, 1), Span::new(0, 1)).with_content("a", "b")
    }

    #[test]
    fn empty_diff_is_identical_and_insignificant() {
        let diff = Diff::builder("s", "t", ArtifactType::Text).build().unwrap();
        assert_eq!(diff.similarity_score(), 1.0);
        assert_eq!(diff.total_changes(), 0);
        assert!(!diff.is_significant());
        assert_eq!(diff.summary(), "no changes");
    }

    #[test]
    fn changes_are_derived_from_hunks() {
        let diff = Diff::builder("s", "t", ArtifactType::Text)
            .hunk(replace_hunk())
            .hunk(Hunk::new(HunkOp::Insert, Span::new(1, 0), Span::new(1, 2)))
            .similarity(0.5)
            .build()
            .unwrap();
        assert_eq!(diff.changes().replacements, 1);
        assert_eq!(diff.changes().insertions, 1);
        assert!(diff.is_significant());
    }

    #[test]
    fn contradictory_similarity_is_rejected() {
        let err = Diff::builder("s", "t", ArtifactType::Text)
            .similarity(0.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConcordError::InvalidRecord { .. }));

        let err = Diff::builder("s", "t", ArtifactType::Text)
            .hunk(replace_hunk())
            .similarity(1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConcordError::InvalidRecord { .. }));

        assert!(Diff::builder("s", "t", ArtifactType::Text)
            .hunk(replace_hunk())
            .build()
            .is_err());
    }

    #[test]
    fn signature_ignores_id_and_timestamp() {
        let a = Diff::builder("s", "t", ArtifactType::Text)
            .hunk(replace_hunk())
            .similarity(0.5)
            .build()
            .unwrap();
        let b = Diff::builder("s", "t", ArtifactType::Text)
            .hunk(replace_hunk())
            .similarity(0.5)
            .build()
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn deserialization_revalidates_invariants() {
        let diff = Diff::builder("s", "t", ArtifactType::Json)
            .classification(DiffClassification::Ordering)
            .hunk(replace_hunk())
            .similarity(0.8)
            .build()
            .unwrap();
        let json = serde_json::to_value(&diff).unwrap();
        let back: Diff = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, diff);

        let mut tampered = json;
        tampered["similarity_score"] = serde_json::json!(0.7);
        assert!(serde_json::from_value::<Diff>(tampered).is_err());
    }
}
