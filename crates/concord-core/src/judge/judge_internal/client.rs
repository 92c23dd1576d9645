use std::time::Duration;

use serde_json::{json, Value};
use tracing::Instrument;

use crate::fingerprint::sha256_hex;
use crate::judge::{BudgetEnforcer, EquivalenceJudge};
use crate::model::{ArtifactType, EvaluationMethod, EvaluationResult};

const METHOD: EvaluationMethod = EvaluationMethod::LlmRubricJudge;

/// Verdict fields accepted from model output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModelVerdict {
    pub equivalent: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub violations: Vec<String>,
}

pub(crate) async fn llm_judge_impl(
    judge: &EquivalenceJudge,
    a: &str,
    b: &str,
    artifact_type: ArtifactType,
    budget: &BudgetEnforcer,
) -> EvaluationResult {
    let Some(client) = judge.model.as_deref() else {
        return EvaluationResult::failed(
            METHOD,
            crate::errors::ProviderErrorKind::Other,
            "model client not configured",
        );
    };

    let scan_a = judge.guard.scan(a);
    let scan_b = judge.guard.scan(b);
    if !scan_a.safe || !scan_b.safe {
        let mut result = EvaluationResult::new(
            METHOD,
            false,
            0.0,
            0.0,
            "content failed the prompt-injection scan; model not called",
        )
        .with_violation("prompt_injection");
        for tag in scan_a.violation_tags().into_iter().chain(scan_b.violation_tags()) {
            result = result.with_violation(tag);
        }
        return result;
    }

    let request = super::prompt::build_messages_impl(
        &judge.config,
        &scan_a.sanitized,
        &scan_b.sanitized,
        artifact_type,
    );
    if let Err(violation) = budget.check_request(request.estimated_tokens()) {
        return super::run::budget_refusal(METHOD, violation);
    }

    let prompt_text: String = request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let prompt_hash = sha256_hex(&prompt_text);
    let span = tracing::info_span!(
        "concord.judge.llm",
        provider = client.provider_name(),
        model = %client.model_id(),
        seed = judge.config.seed,
        prompt_hash = &prompt_hash[..16],
        prompt_chars = prompt_text.len(),
    );

    let timeout_ms = judge.config.llm_timeout_ms;
    let call = tokio::time::timeout(Duration::from_millis(timeout_ms), client.chat(&request))
        .instrument(span)
        .await;
    let response = match call {
        Err(_) => return super::run::timeout_failure(METHOD, client.provider_name(), timeout_ms),
        Ok(Err(e)) => return super::run::provider_failure(METHOD, &e),
        Ok(Ok(response)) => response,
    };

    let base = |r: EvaluationResult| {
        r.with_cost(response.cost_usd)
            .with_latency(response.latency_ms)
            .with_meta("provider", json!(response.provider))
            .with_meta("model", json!(response.model))
            .with_meta("token_usage", json!(response.token_usage))
            .with_meta("prompt_hash", json!(prompt_hash))
    };

    match parse_verdict_impl(&response.text) {
        Ok(verdict) => {
            let similarity = if verdict.equivalent {
                verdict.confidence
            } else {
                1.0 - verdict.confidence
            };
            let mut result = base(EvaluationResult::new(
                METHOD,
                verdict.equivalent,
                verdict.confidence,
                similarity,
                verdict.reasoning,
            ));
            for tag in &verdict.violations {
                result = result.with_violation(tag);
            }
            result
        }
        Err(e) => {
            tracing::warn!(
                provider = %response.provider,
                response_chars = response.text.len(),
                "model output rejected: {e}"
            );
            base(
                EvaluationResult::new(
                    METHOD,
                    false,
                    0.0,
                    0.0,
                    format!("unparseable model output: {e}"),
                )
                .with_violation("parse_error"),
            )
        }
    }
}

/// Extracts the first JSON object anywhere in `text` and validates it.
///
/// `equivalent` must be a bool and `confidence` a number in `[0, 1]`;
/// `reasoning` and `violations` are optional.
pub(crate) fn parse_verdict_impl(text: &str) -> anyhow::Result<ModelVerdict> {
    let object = text
        .match_indices('{')
        .find_map(|(idx, _)| {
            serde_json::Deserializer::from_str(&text[idx..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
                .filter(Value::is_object)
        })
        .ok_or_else(|| anyhow::anyhow!("no JSON object found in model output"))?;

    let equivalent = object
        .get("equivalent")
        .and_then(Value::as_bool)
        .ok_or_else(|| anyhow::anyhow!("'equivalent' missing or not a bool"))?;
    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("'confidence' missing or not a number"))?;
    if !(0.0..=1.0).contains(&confidence) {
        anyhow::bail!("'confidence' {confidence} outside [0, 1]");
    }
    let reasoning = match object.get("reasoning") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => anyhow::bail!("'reasoning' is not a string"),
    };
    let violations = match object.get("violations") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("'violations' entries must be strings"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        Some(_) => anyhow::bail!("'violations' is not an array"),
    };

    Ok(ModelVerdict {
        equivalent,
        confidence,
        reasoning,
        violations,
    })
}
