mod judge_internal;
pub mod budget;

pub use budget::{BudgetConfig, BudgetEnforcer, BudgetSnapshot, BudgetViolation};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingCache;
use crate::errors::ConcordResult;
use crate::guard::PromptGuard;
use crate::model::{Artifact, Evaluation, EvaluationMethod};
use crate::providers::{EmbeddingClient, ExecutionVerifier, ModelClient};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Each version is cut to this many characters inside the prompt.
    pub max_prompt_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub seed: u64,
    pub llm_timeout_ms: u64,
    pub embedding_timeout_ms: u64,
    pub verifier_timeout_ms: u64,
    /// Upper bound for model calls; `0` disables the limiter.
    pub max_requests_per_second: f64,
    /// Cosine similarity at which the calibrated verdict flips to equivalent.
    pub similarity_threshold: f64,
    /// Ceiling for calibrated similarity confidence.
    pub confidence_cap: f64,
    pub system_prompt_version: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 6_000,
            max_tokens: 512,
            temperature: 0.0,
            seed: 42,
            llm_timeout_ms: 30_000,
            embedding_timeout_ms: 10_000,
            verifier_timeout_ms: 120_000,
            max_requests_per_second: 2.0,
            similarity_threshold: 0.85,
            confidence_cap: 0.95,
            system_prompt_version: "v1".to_string(),
        }
    }
}

/// Runs equivalence methods against one artifact pair.
///
/// Collaborators are optional; requesting a method whose collaborator is
/// missing is a request error, raised before anything runs.
#[derive(Clone)]
pub struct EquivalenceJudge {
    config: JudgeConfig,
    budget: BudgetConfig,
    guard: PromptGuard,
    cache: Arc<EmbeddingCache>,
    model: Option<Arc<dyn ModelClient>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    verifier: Option<Arc<dyn ExecutionVerifier>>,
}

impl EquivalenceJudge {
    pub fn new(config: JudgeConfig, budget: BudgetConfig, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            config,
            budget,
            guard: PromptGuard::default(),
            cache,
            model: None,
            embedder: None,
            verifier: None,
        }
    }

    pub fn with_guard(mut self, guard: PromptGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_model(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.model = Some(client);
        self
    }

    pub fn with_embedder(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(client);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ExecutionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn budget_config(&self) -> &BudgetConfig {
        &self.budget
    }

    /// Model identifiers of the wired collaborators, for provenance.
    pub fn model_versions(&self) -> std::collections::BTreeMap<String, String> {
        let mut out = std::collections::BTreeMap::new();
        if let Some(m) = &self.model {
            out.insert(
                EvaluationMethod::LlmRubricJudge.as_str().to_string(),
                format!("{}/{}", m.provider_name(), m.model_id()),
            );
        }
        if let Some(e) = &self.embedder {
            out.insert(
                EvaluationMethod::CosineSimilarity.as_str().to_string(),
                format!("{}/{}", e.name(), e.model_id()),
            );
        }
        out
    }

    /// Runs `methods` in order and returns a terminal [`Evaluation`].
    ///
    /// Method failures become failed results; only request errors (an
    /// unsupported or unconfigured method) are returned as `Err`.
    pub async fn evaluate(
        &self,
        source: &Artifact,
        target: &Artifact,
        methods: &[EvaluationMethod],
        diff_id: Option<String>,
    ) -> ConcordResult<Evaluation> {
        judge_internal::run::evaluate_impl(self, source, target, methods, diff_id).await
    }
}
