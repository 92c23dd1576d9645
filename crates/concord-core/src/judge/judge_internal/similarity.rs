use std::time::Duration;

use serde_json::json;

use crate::judge::{BudgetEnforcer, EquivalenceJudge};
use crate::model::{EvaluationMethod, EvaluationResult};

/// Maps cosine similarity to `(equivalent, confidence)`.
///
/// At or above `threshold` the verdict is equivalent and confidence rises
/// linearly from 0.7 to `cap`; below it the verdict is not equivalent and
/// confidence rises from 0.5 toward `cap` as similarity falls to zero.
pub(crate) fn calibrate(similarity: f64, threshold: f64, cap: f64) -> (bool, f64) {
    let s = similarity.clamp(0.0, 1.0);
    let cap = cap.clamp(0.0, 1.0);
    if s >= threshold {
        let span = (1.0 - threshold).max(f64::EPSILON);
        let confidence = 0.7 + (s - threshold) / span * (cap - 0.7);
        (true, confidence.min(cap))
    } else {
        let span = threshold.max(f64::EPSILON);
        let confidence = 0.5 + (threshold - s) / span * (cap - 0.5);
        (false, confidence.min(cap))
    }
}

pub(crate) async fn cosine_impl(
    judge: &EquivalenceJudge,
    a: &str,
    b: &str,
    budget: &BudgetEnforcer,
) -> EvaluationResult {
    let method = EvaluationMethod::CosineSimilarity;
    let Some(embedder) = judge.embedder.as_deref() else {
        return EvaluationResult::failed(
            method,
            crate::errors::ProviderErrorKind::Other,
            "embedding client not configured",
        );
    };
    if let Err(violation) = budget.check_request(0) {
        return super::run::budget_refusal(method, violation);
    }

    let timeout_ms = judge.config.embedding_timeout_ms;
    let outcome = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        judge.cache.similarity(embedder, a, b),
    )
    .await;

    match outcome {
        Err(_) => super::run::timeout_failure(method, embedder.name(), timeout_ms),
        Ok(Err(e)) => super::run::provider_failure(method, &e),
        Ok(Ok(sim)) => {
            let (equivalent, confidence) = calibrate(
                sim.similarity,
                judge.config.similarity_threshold,
                judge.config.confidence_cap,
            );
            EvaluationResult::new(
                method,
                equivalent,
                confidence,
                sim.similarity,
                format!(
                    "cosine similarity {:.4} against threshold {:.2}",
                    sim.similarity, judge.config.similarity_threshold
                ),
            )
            .with_cost(sim.cost_usd)
            .with_latency(sim.latency_ms)
            .with_meta("model", json!(sim.model))
            .with_meta("cache_hits", json!(sim.cache_hits))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_slopes_and_cap() {
        let (eq, c) = calibrate(0.85, 0.85, 0.95);
        assert!(eq);
        assert!((c - 0.7).abs() < 1e-9);

        let (eq, c) = calibrate(1.0, 0.85, 0.95);
        assert!(eq);
        assert!((c - 0.95).abs() < 1e-9);

        let (eq, c) = calibrate(0.0, 0.85, 0.95);
        assert!(!eq);
        assert!((c - 0.95).abs() < 1e-9);

        let (eq, c) = calibrate(0.8, 0.85, 0.95);
        assert!(!eq);
        assert!(c > 0.5 && c < 0.6);
    }

    #[test]
    fn negative_similarity_is_clamped() {
        assert_eq!(calibrate(-0.5, 0.85, 0.95), calibrate(0.0, 0.85, 0.95));
    }
}
