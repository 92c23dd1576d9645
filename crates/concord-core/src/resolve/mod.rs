//! Idempotent resolution transforms.
//!
//! A [`Transform`] rewrites content toward a canonical form and must reach
//! a fixed point after one application. The [`TransformEngine`] resolves a
//! plan action to the most specific registered transform, verifies the
//! fixed point on every call, and emits an [`AuditRecord`] when applying.

pub mod diff;
pub mod transforms;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ConcordError, ConcordResult};
use crate::fingerprint::{self, content_hash};
use crate::model::{ActionKind, ArtifactType, Diff, DiffClassification, ResolutionAction};

pub use diff::{line_diff, LineDiffOptions};

pub trait Transform: Send + Sync {
    fn id(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn action(&self) -> ActionKind;

    /// `None` registers a fallback for every artifact type.
    fn artifact_types(&self) -> Option<&'static [ArtifactType]>;

    fn config_fingerprint(&self) -> String {
        String::new()
    }

    /// Must satisfy `apply(apply(x)) == apply(x)`.
    fn apply(&self, content: &str, artifact_type: ArtifactType) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Lines of unchanged source kept around each preview hunk.
    pub context_lines: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self { context_lines: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub transform_id: String,
    pub transform_version: String,
    pub action: ActionKind,
    pub artifact_type: ArtifactType,
    pub new_content: String,
    pub diff: Diff,
    pub changed: bool,
    /// Re-applying the transform to `new_content` left it unchanged.
    pub idempotent: bool,
}

/// What an external store needs to persist and roll back an apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub target_artifact_id: String,
    pub action: ActionKind,
    pub transform_id: String,
    pub transform_version: String,
    pub before_hash: String,
    pub after_hash: String,
    pub idempotent: bool,
    pub config_fingerprint: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TransformStats {
    noop: AtomicU64,
    applied: AtomicU64,
    idempotency_violations: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransformStatsSnapshot {
    pub noop: u64,
    pub applied: u64,
    pub idempotency_violations: u64,
    pub errors: u64,
}

impl TransformStats {
    pub fn snapshot(&self) -> TransformStatsSnapshot {
        TransformStatsSnapshot {
            noop: self.noop.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            idempotency_violations: self.idempotency_violations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
pub struct TransformRegistry {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in transforms.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(transforms::NormalizeNewlines));
        reg.register(Box::new(transforms::NormalizeWhitespace));
        reg.register(Box::new(transforms::CodeWhitespace));
        reg.register(Box::new(transforms::CanonicalizeJson));
        reg.register(Box::new(transforms::NormalizeMarkdown));
        reg
    }

    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// Most specific match: an explicit type listing beats a fallback.
    /// Among equals the most recently registered wins.
    pub fn resolve(&self, action: ActionKind, artifact_type: ArtifactType) -> Option<&dyn Transform> {
        self.transforms
            .iter()
            .filter(|t| t.action() == action)
            .filter_map(|t| match t.artifact_types() {
                Some(types) if types.contains(&artifact_type) => Some((2u8, t)),
                Some(_) => None,
                None => Some((1u8, t)),
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, t)| t.as_ref())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.id()).collect()
    }
}

pub struct TransformEngine {
    registry: TransformRegistry,
    config: TransformConfig,
    stats: TransformStats,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(TransformRegistry::with_defaults(), TransformConfig::default())
    }
}

impl TransformEngine {
    pub fn new(registry: TransformRegistry, config: TransformConfig) -> Self {
        Self {
            registry,
            config,
            stats: TransformStats::default(),
        }
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub fn stats(&self) -> TransformStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs the transform without side effects beyond the counters.
    pub fn preview(
        &self,
        action: &ResolutionAction,
        content: &str,
        artifact_type: ArtifactType,
    ) -> ConcordResult<TransformResult> {
        let transform = self.resolve(action.action, artifact_type)?;
        let new_content = transform.apply(content, artifact_type);
        let idempotent = transform.apply(&new_content, artifact_type) == new_content;
        let changed = new_content != content;

        let diff = line_diff(
            content,
            &new_content,
            &LineDiffOptions {
                source_artifact_id: &action.target_artifact_id,
                target_artifact_id: &action.target_artifact_id,
                artifact_type,
                classification: classification_for(action.action),
                context_lines: self.config.context_lines,
            },
        )
        .inspect_err(|_| {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        })?;

        if !idempotent {
            self.stats
                .idempotency_violations
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                transform = transform.id(),
                artifact_id = %action.target_artifact_id,
                "transform is not idempotent on this content"
            );
        } else if changed {
            self.stats.applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.noop.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            transform = transform.id(),
            changed,
            idempotent,
            hunks = diff.hunks().len(),
            "transform preview"
        );

        Ok(TransformResult {
            transform_id: transform.id().to_string(),
            transform_version: transform.version().to_string(),
            action: action.action,
            artifact_type,
            new_content,
            diff,
            changed,
            idempotent,
        })
    }

    /// [`preview`](Self::preview) plus an audit record. Refuses to hand out
    /// content from a transform that failed its own fixed-point check.
    pub fn apply_action(
        &self,
        action: &ResolutionAction,
        content: &str,
        artifact_type: ArtifactType,
    ) -> ConcordResult<(TransformResult, AuditRecord)> {
        let result = self.preview(action, content, artifact_type)?;
        if !result.idempotent {
            return Err(ConcordError::IdempotencyViolation {
                transform_id: result.transform_id,
            });
        }
        let transform = self.resolve(action.action, artifact_type)?;
        let audit = AuditRecord {
            target_artifact_id: action.target_artifact_id.clone(),
            action: action.action,
            transform_id: result.transform_id.clone(),
            transform_version: result.transform_version.clone(),
            before_hash: content_hash(content),
            after_hash: content_hash(&result.new_content),
            idempotent: result.idempotent,
            config_fingerprint: self.config_fingerprint(transform, action),
            applied_at: Utc::now(),
        };
        Ok((result, audit))
    }

    fn resolve(&self, action: ActionKind, artifact_type: ArtifactType) -> ConcordResult<&dyn Transform> {
        self.registry.resolve(action, artifact_type).ok_or_else(|| {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            ConcordError::UnsupportedTransform {
                action,
                artifact_type,
            }
        })
    }

    fn config_fingerprint(&self, transform: &dyn Transform, action: &ResolutionAction) -> String {
        fingerprint::compute(&[
            ("transform", format!("{}@{}", transform.id(), transform.version())),
            ("transform_config", transform.config_fingerprint()),
            ("engine_config", fingerprint::canonical_fingerprint(&self.config)),
            ("parameters", fingerprint::canonical_fingerprint(&action.parameters)),
        ])
        .hex
    }
}

fn classification_for(action: ActionKind) -> DiffClassification {
    match action {
        ActionKind::NormalizeNewlines
        | ActionKind::NormalizeWhitespace
        | ActionKind::NormalizeMarkdown => DiffClassification::Formatting,
        ActionKind::CanonicalizeJson => DiffClassification::Ordering,
        ActionKind::ReplaceContent | ActionKind::DeleteArtifact | ActionKind::Rollback => {
            DiffClassification::Textual
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flip;

    impl Transform for Flip {
        fn id(&self) -> &'static str {
            "flip"
        }
        fn version(&self) -> &'static str {
            "0.0.1"
        }
        fn action(&self) -> ActionKind {
            ActionKind::ReplaceContent
        }
        fn artifact_types(&self) -> Option<&'static [ArtifactType]> {
            None
        }
        fn apply(&self, content: &str, _artifact_type: ArtifactType) -> String {
            if content == "a" { "b".into() } else { "a".into() }
        }
    }

    fn action(kind: ActionKind) -> ResolutionAction {
        ResolutionAction::new(kind, "artifact-1")
    }

    #[test]
    fn resolves_most_specific_transform() {
        let reg = TransformRegistry::with_defaults();
        let code = reg
            .resolve(ActionKind::NormalizeWhitespace, ArtifactType::Code)
            .unwrap();
        assert_eq!(code.id(), "normalize_whitespace_code");
        let text = reg
            .resolve(ActionKind::NormalizeWhitespace, ArtifactType::Text)
            .unwrap();
        assert_eq!(text.id(), "normalize_whitespace");
        assert!(reg
            .resolve(ActionKind::CanonicalizeJson, ArtifactType::Text)
            .is_none());
        assert_eq!(
            reg.resolve(ActionKind::NormalizeNewlines, ArtifactType::Binary)
                .unwrap()
                .id(),
            "normalize_newlines"
        );
    }

    #[test]
    fn preview_reports_diff_and_counts() {
        let engine = TransformEngine::default();
        let r = engine
            .preview(
                &action(ActionKind::NormalizeWhitespace),
                "Hello,   world!\n  \n",
                ArtifactType::Text,
            )
            .unwrap();
        assert_eq!(r.new_content, "Hello, world!\n");
        assert!(r.changed && r.idempotent);
        assert!(r.diff.is_significant());

        let again = engine
            .preview(&action(ActionKind::NormalizeWhitespace), &r.new_content, ArtifactType::Text)
            .unwrap();
        assert!(!again.changed);
        assert_eq!(again.diff.total_changes(), 0);

        let stats = engine.stats();
        assert_eq!((stats.applied, stats.noop), (1, 1));
    }

    #[test]
    fn apply_emits_audit_record() {
        let engine = TransformEngine::default();
        let (result, audit) = engine
            .apply_action(
                &action(ActionKind::CanonicalizeJson),
                "{\"b\": 2, \"a\": 1}",
                ArtifactType::Json,
            )
            .unwrap();
        assert_eq!(result.new_content, "{\"a\":1,\"b\":2}");
        assert_eq!(audit.transform_id, "canonicalize_json");
        assert_eq!(audit.after_hash, content_hash("{\"a\":1,\"b\":2}"));
        assert_ne!(audit.before_hash, audit.after_hash);
        assert_eq!(audit.config_fingerprint.len(), 64);
    }

    #[test]
    fn markdown_heading_and_strong_runs_apply_cleanly() {
        let engine = TransformEngine::default();
        for input in ["# a # #\n", "#### x ## ##\n", "____a____ __b__\n"] {
            let (result, _) = engine
                .apply_action(&action(ActionKind::NormalizeMarkdown), input, ArtifactType::Text)
                .unwrap();
            assert!(result.idempotent, "input: {input:?}");
        }
        assert_eq!(engine.stats().idempotency_violations, 0);
    }

    #[test]
    fn unsupported_combination_is_a_request_error() {
        let engine = TransformEngine::default();
        let err = engine
            .preview(&action(ActionKind::DeleteArtifact), "x", ArtifactType::Text)
            .unwrap_err();
        assert!(matches!(err, ConcordError::UnsupportedTransform { .. }));
        assert_eq!(engine.stats().errors, 1);
    }

    #[test]
    fn non_idempotent_transform_is_caught() {
        let mut reg = TransformRegistry::new();
        reg.register(Box::new(Flip));
        let engine = TransformEngine::new(reg, TransformConfig::default());

        let preview = engine
            .preview(&action(ActionKind::ReplaceContent), "a", ArtifactType::Text)
            .unwrap();
        assert!(!preview.idempotent);

        let err = engine
            .apply_action(&action(ActionKind::ReplaceContent), "a", ArtifactType::Text)
            .unwrap_err();
        assert!(matches!(err, ConcordError::IdempotencyViolation { .. }));
        assert_eq!(engine.stats().idempotency_violations, 2);
    }
}
