use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};

use crate::errors::{ConcordError, ConcordResult};
use crate::judge::{BudgetEnforcer, EquivalenceJudge};
use crate::model::{Artifact, Evaluation, EvaluationMethod, EvaluationResult};

pub(crate) async fn evaluate_impl(
    judge: &EquivalenceJudge,
    source: &Artifact,
    target: &Artifact,
    methods: &[EvaluationMethod],
    diff_id: Option<String>,
) -> ConcordResult<Evaluation> {
    validate_request(judge, source, target, methods)?;

    let artifact_type = source.artifact_type;
    let mut evaluation = Evaluation::new(diff_id, &source.id, &target.id, artifact_type);
    evaluation.start()?;
    let mut budget = BudgetEnforcer::new(judge.budget.clone());

    for (idx, method) in methods.iter().copied().enumerate() {
        if budget.is_budget_exceeded() {
            let skipped: Vec<&str> = methods[idx..].iter().map(|m| m.as_str()).collect();
            info!(
                evaluation_id = evaluation.id(),
                skipped = ?skipped,
                "budget exceeded, halting remaining methods"
            );
            evaluation.set_metadata("skipped_methods", json!(skipped))?;
            break;
        }

        let started = Instant::now();
        let mut result = run_method(judge, method, source, target, &budget).await;
        let measured_ms = started.elapsed().as_millis() as u64;
        if result.latency_ms < measured_ms {
            result.latency_ms = measured_ms;
        }

        debug!(
            evaluation_id = evaluation.id(),
            method = %method,
            equivalent = result.equivalent,
            confidence = result.confidence,
            failed = result.is_failed(),
            "method finished"
        );
        budget.record(
            result.cost_usd,
            result.latency_ms,
            !method.is_deterministic(),
        );
        evaluation.add_result(result)?;
    }

    if budget.is_budget_exceeded() {
        evaluation.set_metadata("budget_exceeded", json!(true))?;
    }
    evaluation.set_metadata("budget", json!(budget.snapshot()))?;
    evaluation.set_metadata(
        "judge_config_version",
        json!(judge.config.system_prompt_version),
    )?;
    evaluation.complete();
    Ok(evaluation)
}

fn validate_request(
    judge: &EquivalenceJudge,
    source: &Artifact,
    target: &Artifact,
    methods: &[EvaluationMethod],
) -> ConcordResult<()> {
    if source.artifact_type != target.artifact_type {
        return Err(ConcordError::invalid_record(format!(
            "artifact types differ: {} vs {}",
            source.artifact_type, target.artifact_type
        )));
    }
    let artifact_type = source.artifact_type;
    for &method in methods {
        if !method.supports(artifact_type) {
            return Err(ConcordError::UnsupportedMethod {
                method,
                artifact_type,
            });
        }
        let missing = match method {
            EvaluationMethod::LlmRubricJudge if judge.model.is_none() => Some("no model client"),
            EvaluationMethod::CosineSimilarity if judge.embedder.is_none() => {
                Some("no embedding client")
            }
            EvaluationMethod::TestExecution if judge.verifier.is_none() => {
                Some("no execution verifier")
            }
            _ => None,
        };
        if let Some(reason) = missing {
            return Err(ConcordError::MethodNotConfigured {
                method,
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

async fn run_method(
    judge: &EquivalenceJudge,
    method: EvaluationMethod,
    source: &Artifact,
    target: &Artifact,
    budget: &BudgetEnforcer,
) -> EvaluationResult {
    let (a, b) = (source.content.as_str(), target.content.as_str());
    match method {
        EvaluationMethod::Exact => super::structural::exact_impl(a, b),
        EvaluationMethod::CanonicalJson => super::structural::canonical_json_impl(a, b),
        EvaluationMethod::AstNormalized => super::structural::ast_normalized_impl(a, b),
        EvaluationMethod::CosineSimilarity => {
            super::similarity::cosine_impl(judge, a, b, budget).await
        }
        EvaluationMethod::LlmRubricJudge => {
            super::client::llm_judge_impl(judge, a, b, source.artifact_type, budget).await
        }
        EvaluationMethod::TestExecution => {
            super::execution::test_execution_impl(judge, a, b, source.artifact_type, budget).await
        }
    }
}

/// Negative result for a method that was refused by the budget.
pub(crate) fn budget_refusal(
    method: EvaluationMethod,
    violation: crate::judge::BudgetViolation,
) -> EvaluationResult {
    let mut result = EvaluationResult::new(
        method,
        false,
        0.0,
        0.0,
        format!("skipped: {}", violation.as_str()),
    )
    .with_violation(violation.as_str());
    result.error = Some(violation.as_str().to_string());
    result
}

/// Failed result for a provider error, classified for the `error_kind` tag.
pub(crate) fn provider_failure(method: EvaluationMethod, err: &anyhow::Error) -> EvaluationResult {
    let classified = crate::errors::ProviderError::from_anyhow(err);
    tracing::warn!(
        method = %method,
        error_kind = %classified.kind,
        provider = classified.provider.as_deref().unwrap_or("unknown"),
        "provider call failed"
    );
    EvaluationResult::failed(method, classified.kind, classified.message)
}

pub(crate) fn timeout_failure(
    method: EvaluationMethod,
    provider: &str,
    after_ms: u64,
) -> EvaluationResult {
    let err = crate::errors::ProviderError::timeout(Some(provider.to_string()), after_ms);
    tracing::warn!(method = %method, provider, after_ms, "provider call timed out");
    EvaluationResult::failed(method, err.kind, err.message)
        .with_meta("provider", json!(provider))
        .with_latency(after_ms)
}
