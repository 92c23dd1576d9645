//! Reduces an evaluation's method results to one verdict.
//!
//! Order: an equivalent exact match wins outright, then a deterministic
//! structural method above its threshold, then the blocklist veto, then
//! the conjunctive conditions. One failing condition or one blocklisted
//! violation tag forces "not equivalent"; there is no averaging across
//! disagreeing signals.

pub mod rules;

pub use rules::{default_blocklist, Condition, DecisionConfig, DecisionRule, StructuralShortCircuit};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ConcordError, ConcordResult};
use crate::model::{ArtifactType, Evaluation, EvaluationMethod, EvaluationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    ExactMatch,
    Structural,
    Conjunctive,
    Veto,
    ConditionFailed,
    NoEvidence,
}

impl DecisionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::Structural => "structural",
            Self::Conjunctive => "conjunctive",
            Self::Veto => "veto",
            Self::ConditionFailed => "condition_failed",
            Self::NoEvidence => "no_evidence",
        }
    }
}

impl std::fmt::Display for DecisionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub equivalent: bool,
    pub confidence: f64,
    /// `name@version` of the rule applied.
    pub rule: String,
    pub path: DecisionPath,
    #[serde(default)]
    pub failed_conditions: Vec<String>,
    #[serde(default)]
    pub blocked_violations: Vec<String>,
    #[serde(default)]
    pub contributing: Vec<EvaluationMethod>,
}

impl Verdict {
    fn new(rule: &DecisionRule, path: DecisionPath, equivalent: bool, confidence: f64) -> Self {
        Self {
            equivalent,
            confidence: confidence.clamp(0.0, 1.0),
            rule: rule.label(),
            path,
            failed_conditions: Vec::new(),
            blocked_violations: Vec::new(),
            contributing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> ConcordResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn rule_for(&self, artifact_type: ArtifactType) -> ConcordResult<&DecisionRule> {
        self.config.rule_for(artifact_type).ok_or_else(|| {
            ConcordError::config(format!("no decision rule for artifact type '{artifact_type}'"))
        })
    }

    /// Applies the rule for the evaluation's artifact type.
    ///
    /// The evaluation must be terminal; deciding on a running evaluation is
    /// a request error.
    pub fn decide(&self, evaluation: &Evaluation) -> ConcordResult<Verdict> {
        if !evaluation.status().is_terminal() {
            return Err(ConcordError::invalid_record(format!(
                "evaluation {} is not complete",
                evaluation.id()
            )));
        }
        let rule = self.rule_for(evaluation.artifact_type())?;
        let verdict = apply_rule(rule, evaluation.results());
        debug!(
            evaluation_id = evaluation.id(),
            rule = %verdict.rule,
            path = %verdict.path,
            equivalent = verdict.equivalent,
            confidence = verdict.confidence,
            "decision"
        );
        Ok(verdict)
    }
}

/// Latest usable (non-failed) result per method.
fn usable(results: &[EvaluationResult], method: EvaluationMethod) -> Option<&EvaluationResult> {
    results
        .iter()
        .rev()
        .find(|r| r.method == method && !r.is_failed())
}

pub fn apply_rule(rule: &DecisionRule, results: &[EvaluationResult]) -> Verdict {
    if let Some(exact) = usable(results, EvaluationMethod::Exact) {
        if exact.equivalent {
            let mut v = Verdict::new(rule, DecisionPath::ExactMatch, true, 1.0);
            v.contributing.push(EvaluationMethod::Exact);
            return v;
        }
    }

    if let Some(s) = &rule.structural {
        if let Some(r) = usable(results, s.method) {
            if r.equivalent && r.confidence >= s.min_confidence {
                let mut v = Verdict::new(rule, DecisionPath::Structural, true, r.confidence);
                v.contributing.push(s.method);
                return v;
            }
        }
    }

    let mut blocked: Vec<String> = results
        .iter()
        .flat_map(EvaluationResult::violations)
        .filter(|tag| rule.blocklist.contains(tag))
        .collect();
    blocked.sort();
    blocked.dedup();
    if !blocked.is_empty() {
        let mut v = Verdict::new(rule, DecisionPath::Veto, false, rule.veto_confidence);
        v.blocked_violations = blocked;
        return v;
    }

    if rule.conditions.is_empty() {
        return Verdict::new(rule, DecisionPath::NoEvidence, false, 0.0);
    }

    let mut failed = Vec::new();
    let mut contributing: Vec<EvaluationMethod> = Vec::new();
    for condition in &rule.conditions {
        let method = condition.method();
        let holds = match (condition, usable(results, method)) {
            (_, None) => {
                failed.push(format!("{}: no usable result", condition.describe()));
                continue;
            }
            (Condition::MinSimilarity { threshold, .. }, Some(r)) => {
                r.similarity_score >= *threshold
            }
            (Condition::Equivalent { min_confidence, .. }, Some(r)) => {
                r.equivalent && r.confidence >= *min_confidence
            }
        };
        if holds {
            if !contributing.contains(&method) {
                contributing.push(method);
            }
        } else {
            failed.push(condition.describe());
        }
    }

    if !failed.is_empty() {
        let mut v = Verdict::new(rule, DecisionPath::ConditionFailed, false, rule.veto_confidence);
        v.failed_conditions = failed;
        v.contributing = contributing;
        return v;
    }

    let (mut weighted, mut total) = (0.0, 0.0);
    for &method in &contributing {
        if let Some(r) = usable(results, method) {
            let w = rule.weight(method);
            weighted += w * r.confidence;
            total += w;
        }
    }
    let confidence = if total > 0.0 { weighted / total } else { 0.0 };
    let mut v = Verdict::new(
        rule,
        DecisionPath::Conjunctive,
        true,
        confidence.min(rule.confidence_cap),
    );
    v.contributing = contributing;
    v
}
