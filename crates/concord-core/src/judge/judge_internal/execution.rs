use std::time::Duration;

use serde_json::json;

use crate::judge::{BudgetEnforcer, EquivalenceJudge};
use crate::model::{ArtifactType, EvaluationMethod, EvaluationResult};

const METHOD: EvaluationMethod = EvaluationMethod::TestExecution;

pub(crate) async fn test_execution_impl(
    judge: &EquivalenceJudge,
    a: &str,
    b: &str,
    artifact_type: ArtifactType,
    budget: &BudgetEnforcer,
) -> EvaluationResult {
    let Some(verifier) = judge.verifier.as_deref() else {
        return EvaluationResult::failed(
            METHOD,
            crate::errors::ProviderErrorKind::Other,
            "execution verifier not configured",
        );
    };
    if let Err(violation) = budget.check_request(0) {
        return super::run::budget_refusal(METHOD, violation);
    }

    let timeout_ms = judge.config.verifier_timeout_ms;
    let call = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        verifier.verify(a, b, artifact_type),
    )
    .await;
    let report = match call {
        Err(_) => return super::run::timeout_failure(METHOD, verifier.name(), timeout_ms),
        Ok(Err(e)) => return super::run::provider_failure(METHOD, &e),
        Ok(Ok(report)) => report,
    };

    let passed = report.tests_run.saturating_sub(report.tests_failed);
    let similarity = if report.tests_run == 0 {
        if report.equivalent {
            1.0
        } else {
            0.0
        }
    } else {
        f64::from(passed) / f64::from(report.tests_run)
    };
    // Without tests the verifier only compared outputs.
    let confidence = if report.tests_run > 0 { 0.95 } else { 0.5 };

    EvaluationResult::new(
        METHOD,
        report.equivalent,
        confidence,
        similarity,
        report.details.clone(),
    )
    .with_cost(report.cost_usd)
    .with_meta("verifier", json!(verifier.name()))
    .with_meta("tests_run", json!(report.tests_run))
    .with_meta("tests_failed", json!(report.tests_failed))
}
