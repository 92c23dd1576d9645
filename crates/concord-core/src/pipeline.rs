//! End-to-end mismatch handling for one artifact pair.
//!
//! detect → record mismatch → analyzing → either policy-gated
//! auto-resolution of the top benign detection, or judge + decision rule.
//! Data problems end in a terminal or re-analyzable status on the stored
//! mismatch; only request errors are returned as `Err`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, PipelineConfig};
use crate::decision::{DecisionEngine, Verdict};
use crate::detect::{DetectionReport, DetectorRegistry, DetectorResult, RunMode};
use crate::embeddings::EmbeddingCache;
use crate::errors::{ConcordError, ConcordResult};
use crate::fingerprint::{content_hash, sha256_hex};
use crate::guard::PromptGuard;
use crate::judge::EquivalenceJudge;
use crate::model::{
    Artifact, Diff, DiffClassification, Evaluation, EvaluationStatus, Mismatch, MismatchStatus,
    MismatchType, ResolutionAction, ResolutionPlan,
};
use crate::policy::PolicyProvider;
use crate::providers::llm::RateLimitedClient;
use crate::providers::{EmbeddingClient, ExecutionVerifier, ModelClient};
use crate::resolve::{line_diff, AuditRecord, LineDiffOptions, TransformEngine, TransformRegistry, TransformResult};
use crate::storage::MismatchStore;
use crate::telemetry::{NoopTelemetry, Telemetry};

/// Everything one [`MismatchPipeline::process`] call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// `None` when both contents were identical.
    pub mismatch: Option<Mismatch>,
    pub detection: Option<DetectionReport>,
    pub diff: Option<Diff>,
    pub plan: Option<ResolutionPlan>,
    pub transform: Option<TransformResult>,
    pub audit: Option<AuditRecord>,
    pub evaluation: Option<Evaluation>,
    pub verdict: Option<Verdict>,
}

impl PipelineOutcome {
    fn empty() -> Self {
        Self {
            mismatch: None,
            detection: None,
            diff: None,
            plan: None,
            transform: None,
            audit: None,
            evaluation: None,
            verdict: None,
        }
    }

    pub fn status(&self) -> Option<MismatchStatus> {
        self.mismatch.as_ref().map(Mismatch::status)
    }
}

pub struct MismatchPipeline {
    config: PipelineConfig,
    detector_mode: RunMode,
    detectors: DetectorRegistry,
    transforms: TransformEngine,
    judge: EquivalenceJudge,
    decision: DecisionEngine,
    store: Arc<dyn MismatchStore>,
    policy: Arc<dyn PolicyProvider>,
    telemetry: Arc<dyn Telemetry>,
    config_fingerprint: Option<String>,
}

/// Optional outbound collaborators for [`MismatchPipeline::from_config`].
#[derive(Default, Clone)]
pub struct Collaborators {
    pub model: Option<Arc<dyn ModelClient>>,
    pub embedder: Option<Arc<dyn EmbeddingClient>>,
    pub verifier: Option<Arc<dyn ExecutionVerifier>>,
    pub telemetry: Option<Arc<dyn Telemetry>>,
}

impl MismatchPipeline {
    pub fn new(
        detectors: DetectorRegistry,
        transforms: TransformEngine,
        judge: EquivalenceJudge,
        decision: DecisionEngine,
        store: Arc<dyn MismatchStore>,
        policy: Arc<dyn PolicyProvider>,
    ) -> Self {
        Self {
            config: PipelineConfig::default(),
            detector_mode: RunMode::default(),
            detectors,
            transforms,
            judge,
            decision,
            store,
            policy,
            telemetry: Arc::new(NoopTelemetry),
            config_fingerprint: None,
        }
    }

    /// Wires every component from one validated [`EngineConfig`].
    ///
    /// The model client is wrapped in a rate limiter when
    /// `judge.max_requests_per_second` is positive.
    pub async fn from_config(
        config: &EngineConfig,
        detectors: DetectorRegistry,
        store: Arc<dyn MismatchStore>,
        policy: Arc<dyn PolicyProvider>,
        collaborators: Collaborators,
    ) -> ConcordResult<Self> {
        config.validate()?;
        let cache = Arc::new(EmbeddingCache::from_config(&config.embedding_cache).await?);
        let mut judge = EquivalenceJudge::new(config.judge.clone(), config.budget.clone(), cache)
            .with_guard(PromptGuard::new(config.guard.clone()));
        if let Some(model) = collaborators.model {
            let rps = config.judge.max_requests_per_second;
            judge = if rps > 0.0 {
                judge.with_model(Arc::new(RateLimitedClient::per_second(model, rps)))
            } else {
                judge.with_model(model)
            };
        }
        if let Some(embedder) = collaborators.embedder {
            judge = judge.with_embedder(embedder);
        }
        if let Some(verifier) = collaborators.verifier {
            judge = judge.with_verifier(verifier);
        }

        let transforms = TransformEngine::new(TransformRegistry::with_defaults(), config.transforms.clone());
        let decision = DecisionEngine::new(config.decision.clone())?;
        let detectors =
            detectors.with_short_circuit_confidence(config.detectors.short_circuit_min_confidence);

        let mut pipeline = Self::new(detectors, transforms, judge, decision, store, policy)
            .with_config(config.pipeline.clone())
            .with_detector_mode(config.detectors.mode);
        pipeline.config_fingerprint = Some(config.fingerprint());
        if let Some(telemetry) = collaborators.telemetry {
            pipeline.telemetry = telemetry;
        }
        Ok(pipeline)
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_detector_mode(mut self, mode: RunMode) -> Self {
        self.detector_mode = mode;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn detectors(&self) -> &DetectorRegistry {
        &self.detectors
    }

    pub fn transforms(&self) -> &TransformEngine {
        &self.transforms
    }

    /// Mismatch id derived from the run and both contents, so a retried
    /// call finds the record created by the first attempt.
    pub fn mismatch_id(run_id: &str, source: &Artifact, target: &Artifact) -> String {
        let key = format!(
            "{run_id}\n{}\n{}\n{}\n{}",
            source.id,
            target.id,
            content_hash(&source.content),
            content_hash(&target.content)
        );
        format!("mm_{}", &sha256_hex(&key)[..24])
    }

    pub async fn process(
        &self,
        run_id: &str,
        source: &Artifact,
        target: &Artifact,
    ) -> ConcordResult<PipelineOutcome> {
        if source.artifact_type != target.artifact_type {
            return Err(ConcordError::invalid_record(format!(
                "artifact types differ: {} vs {}",
                source.artifact_type, target.artifact_type
            )));
        }
        let artifact_type = source.artifact_type;
        let type_label = artifact_type.as_str();

        if source.content == target.content {
            self.telemetry
                .counter("concord_pairs_total", 1, &[("outcome", "identical")]);
            return Ok(PipelineOutcome::empty());
        }

        let report = self.detectors.run(
            &source.content,
            &target.content,
            artifact_type,
            self.detector_mode,
        );
        for r in &report.results {
            self.telemetry.counter(
                "concord_detections_total",
                1,
                &[("detector", r.detector.as_str()), ("mismatch_type", r.mismatch_type.as_str())],
            );
        }
        let top = report.top().cloned();
        let mismatch_type = top.as_ref().map_or(MismatchType::Unknown, |r| r.mismatch_type);

        let diff = line_diff(
            &source.content,
            &target.content,
            &LineDiffOptions {
                source_artifact_id: &source.id,
                target_artifact_id: &target.id,
                artifact_type,
                classification: classification_for(mismatch_type),
                context_lines: 2,
            },
        )?;

        let mut candidate = Mismatch::new(
            run_id,
            &source.id,
            &target.id,
            mismatch_type,
            top.as_ref().map_or(0.0, |r| r.confidence),
        )
        .with_id(Self::mismatch_id(run_id, source, target));
        candidate.detectors = report.results.iter().map(|r| r.detector.clone()).collect();
        candidate.evidence.diff_id = Some(diff.id().to_string());
        candidate.provenance.detector_versions = self.detectors.detector_versions();
        candidate.provenance.model_versions = self.judge.model_versions();
        candidate.provenance.seeds = vec![self.judge.config().seed];
        candidate.provenance.config_fingerprint = self.config_fingerprint.clone();

        let mut mismatch = self.store.create_mismatch(candidate).await?;
        let mut outcome = PipelineOutcome::empty();
        outcome.detection = Some(report);
        outcome.diff = Some(diff);

        if mismatch.status().is_terminal() {
            debug!(mismatch_id = %mismatch.id, status = %mismatch.status(), "mismatch already settled");
            outcome.mismatch = Some(mismatch);
            return Ok(outcome);
        }
        if mismatch.status() != MismatchStatus::Analyzing {
            mismatch.transition(MismatchStatus::Analyzing)?;
            self.store.update_mismatch(&mismatch).await?;
        }

        let resolved = match top.as_ref() {
            Some(hit) => self.try_auto_resolve(&mut mismatch, hit, source, target, &mut outcome).await?,
            None => false,
        };
        if !resolved && mismatch.status() == MismatchStatus::Analyzing {
            self.judge_and_decide(&mut mismatch, source, target, &mut outcome)
                .await?;
        }

        self.store.update_mismatch(&mismatch).await?;
        info!(
            mismatch_id = %mismatch.id,
            mismatch_type = %mismatch.mismatch_type,
            status = %mismatch.status(),
            confidence = mismatch.confidence,
            "mismatch processed"
        );
        self.telemetry.counter(
            "concord_mismatches_total",
            1,
            &[
                ("artifact_type", type_label),
                ("mismatch_type", mismatch.mismatch_type.as_str()),
                ("status", mismatch.status().as_str()),
            ],
        );
        outcome.mismatch = Some(mismatch);
        Ok(outcome)
    }

    /// Applies the suggested transform when policy allows it unattended.
    ///
    /// Returns `true` when the mismatch reached `resolved`. The transform
    /// must bring both versions to the same content; otherwise the
    /// detection does not explain the difference and judging takes over.
    async fn try_auto_resolve(
        &self,
        mismatch: &mut Mismatch,
        hit: &DetectorResult,
        source: &Artifact,
        target: &Artifact,
        outcome: &mut PipelineOutcome,
    ) -> ConcordResult<bool> {
        let Some(action_kind) = hit.suggested_action else {
            return Ok(false);
        };
        if !hit.auto_resolvable || !hit.is_benign() {
            return Ok(false);
        }
        if hit.confidence < self.config.auto_resolve_min_confidence {
            debug!(
                mismatch_id = %mismatch.id,
                confidence = hit.confidence,
                "detection below auto-resolve floor"
            );
            return Ok(false);
        }

        let decision = self
            .policy
            .decide(action_kind, hit.mismatch_type, &self.config.environment);
        let action = ResolutionAction::new(action_kind, &target.id);
        let mut plan = ResolutionPlan::new(&mismatch.id, decision.safety_level)
            .with_action(action.clone())
            .require_evidence(format!("detector:{}", hit.detector));

        if !decision.permits_automatic(hit.confidence) {
            info!(
                mismatch_id = %mismatch.id,
                action = %action_kind,
                reason = %decision.reason,
                "auto-resolution needs approval"
            );
            plan = self.store.create_plan(plan).await?;
            outcome.plan = Some(plan);
            self.telemetry
                .counter("concord_resolutions_total", 1, &[("outcome", "needs_approval")]);
            mismatch.transition(MismatchStatus::Inconclusive)?;
            return Ok(false);
        }

        let artifact_type = target.artifact_type;
        let applied = self
            .transforms
            .preview(&action, &source.content, artifact_type)
            .and_then(|src| {
                self.transforms
                    .apply_action(&action, &target.content, artifact_type)
                    .map(|(tgt, audit)| (src, tgt, audit))
            });
        let (src_result, tgt_result, audit) = match applied {
            Ok(parts) => parts,
            Err(e) => {
                warn!(mismatch_id = %mismatch.id, action = %action_kind, error = %e, "transform failed");
                self.telemetry
                    .counter("concord_resolutions_total", 1, &[("outcome", "transform_error")]);
                mismatch.transition(MismatchStatus::Error)?;
                return Ok(false);
            }
        };

        if src_result.new_content != tgt_result.new_content {
            debug!(
                mismatch_id = %mismatch.id,
                action = %action_kind,
                "transform does not reconcile the versions"
            );
            self.telemetry
                .counter("concord_resolutions_total", 1, &[("outcome", "not_reconciled")]);
            return Ok(false);
        }

        plan = self.store.create_plan(plan).await?;
        self.store.record_audit(audit.clone()).await?;
        mismatch.confidence = hit.confidence;
        mismatch.transition(MismatchStatus::Resolved)?;
        self.telemetry.counter(
            "concord_resolutions_total",
            1,
            &[("outcome", "applied"), ("action", action_kind.as_str())],
        );
        outcome.plan = Some(plan);
        outcome.transform = Some(tgt_result);
        outcome.audit = Some(audit);
        Ok(true)
    }

    async fn judge_and_decide(
        &self,
        mismatch: &mut Mismatch,
        source: &Artifact,
        target: &Artifact,
        outcome: &mut PipelineOutcome,
    ) -> ConcordResult<()> {
        let methods = self.config.methods_for(source.artifact_type);
        let diff_id = mismatch.evidence.diff_id.clone();
        let evaluation = self.judge.evaluate(source, target, methods, diff_id).await?;
        self.store.save_evaluation(&evaluation).await?;

        mismatch.evidence.evaluation_ids.push(evaluation.id().to_string());
        mismatch.evidence.cost_estimate_usd += evaluation.total_cost_usd();
        mismatch.evidence.latency_ms += evaluation.total_latency_ms();
        for r in evaluation.results().iter().filter(|r| !r.is_failed()) {
            mismatch
                .evidence
                .similarity_scores
                .insert(r.method.as_str().to_string(), r.similarity_score);
        }

        let status_label = match evaluation.status() {
            EvaluationStatus::Failed => "failed",
            _ => "completed",
        };
        self.telemetry.counter(
            "concord_evaluations_total",
            1,
            &[("artifact_type", source.artifact_type.as_str()), ("status", status_label)],
        );
        self.telemetry.histogram(
            "concord_evaluation_cost_usd",
            evaluation.total_cost_usd(),
            &[("artifact_type", source.artifact_type.as_str())],
        );
        if evaluation.budget_exceeded() {
            self.telemetry
                .counter("concord_budget_exceeded_total", 1, &[]);
        }

        if evaluation.status() == EvaluationStatus::Failed {
            warn!(
                mismatch_id = %mismatch.id,
                error = evaluation.error().unwrap_or("unknown"),
                "every judge method failed"
            );
            mismatch.transition(MismatchStatus::Error)?;
            outcome.evaluation = Some(evaluation);
            return Ok(());
        }

        let verdict = self.decision.decide(&evaluation)?;
        mismatch.confidence = verdict.confidence;
        if verdict.equivalent {
            mismatch.transition(MismatchStatus::Resolved)?;
        } else {
            if mismatch.mismatch_type == MismatchType::Unknown {
                mismatch.mismatch_type = MismatchType::Semantic;
            }
            mismatch.transition(MismatchStatus::Inconclusive)?;
        }
        outcome.evaluation = Some(evaluation);
        outcome.verdict = Some(verdict);
        Ok(())
    }

    /// Re-runs a stored `failed`/`inconclusive` mismatch through the judge.
    pub async fn reanalyze(
        &self,
        mismatch_id: &str,
        source: &Artifact,
        target: &Artifact,
    ) -> ConcordResult<PipelineOutcome> {
        let mut mismatch = self
            .store
            .get_mismatch(mismatch_id)
            .await?
            .ok_or_else(|| ConcordError::store(format!("mismatch {mismatch_id} not found")))?;
        mismatch.transition(MismatchStatus::Analyzing)?;
        let mut outcome = PipelineOutcome::empty();
        self.judge_and_decide(&mut mismatch, source, target, &mut outcome)
            .await?;
        self.store.update_mismatch(&mismatch).await?;
        outcome.mismatch = Some(mismatch);
        Ok(outcome)
    }

    /// Marks a mismatch as intentionally ignored.
    pub async fn skip(&self, mismatch_id: &str, operator: &str) -> ConcordResult<Mismatch> {
        let mut mismatch = self
            .store
            .get_mismatch(mismatch_id)
            .await?
            .ok_or_else(|| ConcordError::store(format!("mismatch {mismatch_id} not found")))?;
        mismatch.transition(MismatchStatus::Skipped)?;
        mismatch.provenance.operator = Some(operator.to_string());
        self.store.update_mismatch(&mismatch).await?;
        self.telemetry
            .counter("concord_mismatches_skipped_total", 1, &[]);
        Ok(mismatch)
    }
}

fn classification_for(mismatch_type: MismatchType) -> DiffClassification {
    match mismatch_type {
        MismatchType::Whitespace | MismatchType::MarkdownFormatting => DiffClassification::Formatting,
        MismatchType::JsonOrdering => DiffClassification::Ordering,
        MismatchType::NumericEpsilon => DiffClassification::Numeric,
        MismatchType::Nondeterminism => DiffClassification::Temporal,
        MismatchType::Semantic => DiffClassification::Semantic,
        MismatchType::Unknown => DiffClassification::Textual,
    }
}
