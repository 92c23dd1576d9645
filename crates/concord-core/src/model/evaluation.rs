use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_id, ArtifactType, Metadata};
use crate::errors::{ConcordError, ConcordResult, ProviderErrorKind};

/// One algorithm for judging semantic sameness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMethod {
    Exact,
    CosineSimilarity,
    LlmRubricJudge,
    AstNormalized,
    CanonicalJson,
    TestExecution,
}

impl EvaluationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CosineSimilarity => "cosine_similarity",
            Self::LlmRubricJudge => "llm_rubric_judge",
            Self::AstNormalized => "ast_normalized",
            Self::CanonicalJson => "canonical_json",
            Self::TestExecution => "test_execution",
        }
    }

    /// Deterministic methods never call out and never cost anything.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Exact | Self::AstNormalized | Self::CanonicalJson)
    }

    pub fn supports(&self, artifact_type: ArtifactType) -> bool {
        match self {
            Self::Exact => true,
            Self::CanonicalJson => artifact_type == ArtifactType::Json,
            Self::AstNormalized => artifact_type == ArtifactType::Code,
            Self::TestExecution => artifact_type == ArtifactType::Code,
            Self::CosineSimilarity | Self::LlmRubricJudge => artifact_type != ArtifactType::Binary,
        }
    }
}

impl std::fmt::Display for EvaluationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One method's judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub method: EvaluationMethod,
    pub equivalent: bool,
    pub confidence: f64,
    pub similarity_score: f64,
    pub reasoning: String,
    pub cost_usd: f64,
    pub latency_ms: u64,
    #[serde(default)]
    pub metadata: Metadata,
    /// Set when the method itself failed (provider outage, timeout, budget).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationResult {
    pub fn new(
        method: EvaluationMethod,
        equivalent: bool,
        confidence: f64,
        similarity_score: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            method,
            equivalent,
            confidence: confidence.clamp(0.0, 1.0),
            similarity_score: similarity_score.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            cost_usd: 0.0,
            latency_ms: 0,
            metadata: Metadata::new(),
            error: None,
        }
    }

    /// A negative, zero-confidence verdict that records why the method failed.
    pub fn failed(
        method: EvaluationMethod,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let mut r = Self::new(method, false, 0.0, 0.0, format!("method failed: {message}"));
        r.error = Some(message);
        r.metadata
            .insert("error_kind".into(), serde_json::json!(kind.as_str()));
        r
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd.max(0.0);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_violation(mut self, tag: &str) -> Self {
        let entry = self
            .metadata
            .entry("violations".to_string())
            .or_insert_with(|| serde_json::json!([]));
        if let Some(arr) = entry.as_array_mut() {
            if !arr.iter().any(|v| v.as_str() == Some(tag)) {
                arr.push(serde_json::json!(tag));
            }
        }
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Violation tags attached by the method (e.g. `parse_error`, `unit_change`).
    pub fn violations(&self) -> Vec<String> {
        self.metadata
            .get("violations")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl EvaluationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Confidence-weighted majority over all results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub equivalent: bool,
    pub confidence: f64,
    pub weight_equivalent: f64,
    pub weight_not_equivalent: f64,
}

/// Aggregate of one or more method results for one diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    id: String,
    diff_id: Option<String>,
    source_artifact_id: String,
    target_artifact_id: String,
    artifact_type: ArtifactType,
    status: EvaluationStatus,
    results: Vec<EvaluationResult>,
    total_cost_usd: f64,
    total_latency_ms: u64,
    #[serde(default)]
    metadata: Metadata,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl Evaluation {
    pub fn new(
        diff_id: Option<String>,
        source_artifact_id: impl Into<String>,
        target_artifact_id: impl Into<String>,
        artifact_type: ArtifactType,
    ) -> Self {
        Self {
            id: new_id("eval"),
            diff_id,
            source_artifact_id: source_artifact_id.into(),
            target_artifact_id: target_artifact_id.into(),
            artifact_type,
            status: EvaluationStatus::Pending,
            results: Vec::new(),
            total_cost_usd: 0.0,
            total_latency_ms: 0,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn diff_id(&self) -> Option<&str> {
        self.diff_id.as_deref()
    }

    pub fn source_artifact_id(&self) -> &str {
        &self.source_artifact_id
    }

    pub fn target_artifact_id(&self) -> &str {
        &self.target_artifact_id
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    pub fn status(&self) -> EvaluationStatus {
        self.status
    }

    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    pub fn result_for(&self, method: EvaluationMethod) -> Option<&EvaluationResult> {
        self.results.iter().find(|r| r.method == method)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    pub fn total_latency_ms(&self) -> u64 {
        self.total_latency_ms
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn budget_exceeded(&self) -> bool {
        self.metadata
            .get("budget_exceeded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn ensure_open(&self) -> ConcordResult<()> {
        if self.status.is_terminal() {
            return Err(ConcordError::invalid_record(format!(
                "evaluation {} is already {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn start(&mut self) -> ConcordResult<()> {
        self.ensure_open()?;
        if self.status == EvaluationStatus::Pending {
            self.status = EvaluationStatus::Running;
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn add_result(&mut self, result: EvaluationResult) -> ConcordResult<()> {
        self.ensure_open()?;
        self.total_cost_usd += result.cost_usd;
        self.total_latency_ms += result.latency_ms;
        self.results.push(result);
        Ok(())
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) -> ConcordResult<()> {
        self.ensure_open()?;
        self.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Freezes the evaluation.
    ///
    /// Ends `failed` when no method produced a usable result, `completed`
    /// otherwise. Idempotent on an already-terminal evaluation.
    pub fn complete(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let usable = self.results.iter().any(|r| !r.is_failed());
        if usable {
            self.status = EvaluationStatus::Completed;
        } else {
            self.status = EvaluationStatus::Failed;
            if self.error.is_none() {
                self.error = Some(if self.results.is_empty() {
                    "no method produced a result".to_string()
                } else {
                    "all methods failed".to_string()
                });
            }
        }
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = EvaluationStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = EvaluationStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Confidence-weighted majority vote over all results; ties favor
    /// "not equivalent".
    pub fn consensus(&self) -> Consensus {
        let mut yes = 0.0;
        let mut no = 0.0;
        for r in &self.results {
            if r.equivalent {
                yes += r.confidence;
            } else {
                no += r.confidence;
            }
        }
        let total = yes + no;
        let equivalent = yes > no;
        let confidence = if total > 0.0 {
            if equivalent {
                yes / total
            } else {
                no / total
            }
        } else {
            0.0
        };
        Consensus {
            equivalent,
            confidence,
            weight_equivalent: yes,
            weight_not_equivalent: no,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval() -> Evaluation {
        Evaluation::new(Some("diff_1".into()), "a", "b", ArtifactType::Text)
    }

    #[test]
    fn consensus_is_confidence_weighted() {
        let mut e = eval();
        e.add_result(EvaluationResult::new(EvaluationMethod::Exact, false, 0.2, 0.0, ""))
            .unwrap();
        e.add_result(EvaluationResult::new(
            EvaluationMethod::CosineSimilarity,
            true,
            0.9,
            0.97,
            "",
        ))
        .unwrap();
        let c = e.consensus();
        assert!(c.equivalent);
        assert!((c.confidence - 0.9 / 1.1).abs() < 1e-9);
    }

    #[test]
    fn consensus_tie_is_not_equivalent() {
        let mut e = eval();
        e.add_result(EvaluationResult::new(EvaluationMethod::Exact, true, 0.5, 1.0, ""))
            .unwrap();
        e.add_result(EvaluationResult::new(
            EvaluationMethod::CosineSimilarity,
            false,
            0.5,
            0.3,
            "",
        ))
        .unwrap();
        assert!(!e.consensus().equivalent);
        assert!(!eval().consensus().equivalent);
    }

    #[test]
    fn complete_freezes_totals() {
        let mut e = eval();
        e.start().unwrap();
        e.add_result(
            EvaluationResult::new(EvaluationMethod::LlmRubricJudge, true, 0.8, 0.8, "")
                .with_cost(0.01)
                .with_latency(120),
        )
        .unwrap();
        e.complete();
        assert_eq!(e.status(), EvaluationStatus::Completed);
        assert_eq!(e.total_latency_ms(), 120);

        let late = EvaluationResult::new(EvaluationMethod::Exact, true, 1.0, 1.0, "").with_cost(5.0);
        assert!(e.add_result(late).is_err());
        assert!((e.total_cost_usd() - 0.01).abs() < 1e-12);
        assert!(e.set_metadata("x", serde_json::json!(1)).is_err());
    }

    #[test]
    fn all_failed_results_end_failed() {
        let mut e = eval();
        e.add_result(EvaluationResult::failed(
            EvaluationMethod::LlmRubricJudge,
            ProviderErrorKind::Timeout,
            "timed out",
        ))
        .unwrap();
        e.complete();
        assert_eq!(e.status(), EvaluationStatus::Failed);
        assert_eq!(e.error(), Some("all methods failed"));
    }

    #[test]
    fn violations_are_deduplicated() {
        let r = EvaluationResult::new(EvaluationMethod::LlmRubricJudge, false, 0.0, 0.0, "")
            .with_violation("parse_error")
            .with_violation("parse_error");
        assert_eq!(r.violations(), vec!["parse_error".to_string()]);
    }

    #[test]
    fn method_support_matrix() {
        assert!(EvaluationMethod::CanonicalJson.supports(ArtifactType::Json));
        assert!(!EvaluationMethod::CanonicalJson.supports(ArtifactType::Text));
        assert!(!EvaluationMethod::LlmRubricJudge.supports(ArtifactType::Binary));
        assert!(EvaluationMethod::Exact.supports(ArtifactType::Binary));
    }
}
