//! Engine configuration.
//!
//! Every section is `#[serde(default)]`, so a partial YAML document only
//! overrides what it names. `validate()` runs once at load; components
//! trust their config afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decision::DecisionConfig;
use crate::detect::RunMode;
use crate::embeddings::EmbeddingCacheConfig;
use crate::errors::{ConcordError, ConcordResult};
use crate::guard::GuardConfig;
use crate::judge::{BudgetConfig, JudgeConfig};
use crate::model::{ArtifactType, EvaluationMethod};
use crate::resolve::TransformConfig;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub mode: RunMode,
    /// Short-circuit mode stops at a benign hit at or above this confidence.
    pub short_circuit_min_confidence: f64,
    pub numeric_abs_tol: f64,
    pub numeric_rel_tol: f64,
    /// Largest bit distance between two doubles still treated as jitter.
    pub max_ulps: u64,
    /// Below this magnitude the ULP detector compares with the epsilon
    /// tolerances instead.
    pub ulp_min_magnitude: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::ShortCircuit,
            short_circuit_min_confidence: 0.7,
            numeric_abs_tol: 1e-6,
            numeric_rel_tol: 1e-6,
            max_ulps: 4,
            ulp_min_magnitude: 1e-300,
        }
    }
}

/// End-to-end pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Environment name passed to the policy collaborator.
    pub environment: String,
    /// Floor for auto-resolution, applied on top of the policy's own floor.
    pub auto_resolve_min_confidence: f64,
    /// Judge methods per artifact type, in run order.
    pub methods: BTreeMap<ArtifactType, Vec<EvaluationMethod>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        use EvaluationMethod::*;
        let mut methods = BTreeMap::new();
        methods.insert(ArtifactType::Text, vec![Exact, CosineSimilarity, LlmRubricJudge]);
        methods.insert(ArtifactType::Json, vec![Exact, CanonicalJson, LlmRubricJudge]);
        methods.insert(ArtifactType::Code, vec![Exact, AstNormalized, LlmRubricJudge]);
        methods.insert(ArtifactType::Binary, vec![Exact]);
        Self {
            environment: "default".to_string(),
            auto_resolve_min_confidence: 0.9,
            methods,
        }
    }
}

impl PipelineConfig {
    pub fn methods_for(&self, artifact_type: ArtifactType) -> &[EvaluationMethod] {
        self.methods
            .get(&artifact_type)
            .map(Vec::as_slice)
            .unwrap_or(&[EvaluationMethod::Exact])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub version: u32,
    pub detectors: DetectorConfig,
    pub transforms: TransformConfig,
    pub guard: GuardConfig,
    pub embedding_cache: EmbeddingCacheConfig,
    pub judge: JudgeConfig,
    pub budget: BudgetConfig,
    pub decision: DecisionConfig,
    pub pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            detectors: DetectorConfig::default(),
            transforms: TransformConfig::default(),
            guard: GuardConfig::default(),
            embedding_cache: EmbeddingCacheConfig::default(),
            judge: JudgeConfig::default(),
            budget: BudgetConfig::default(),
            decision: DecisionConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn unit_interval(name: &str, v: f64) -> ConcordResult<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ConcordError::config(format!("{name} must be in [0, 1], got {v}")))
    }
}

fn non_negative(name: &str, v: f64) -> ConcordResult<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ConcordError::config(format!("{name} must be a non-negative number, got {v}")))
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> ConcordResult<Self> {
        let cfg: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ConcordError::config(format!("failed to parse YAML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ConcordResult<()> {
        if self.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConcordError::config(format!(
                "unsupported config version {} (supported: {})",
                self.version, SUPPORTED_CONFIG_VERSION
            )));
        }

        let d = &self.detectors;
        unit_interval("detectors.short_circuit_min_confidence", d.short_circuit_min_confidence)?;
        non_negative("detectors.numeric_abs_tol", d.numeric_abs_tol)?;
        non_negative("detectors.numeric_rel_tol", d.numeric_rel_tol)?;
        non_negative("detectors.ulp_min_magnitude", d.ulp_min_magnitude)?;
        if d.max_ulps == 0 {
            return Err(ConcordError::config("detectors.max_ulps must be at least 1"));
        }

        let g = &self.guard;
        if g.max_content_chars == 0 {
            return Err(ConcordError::config("guard.max_content_chars must be positive"));
        }
        unit_interval("guard.max_token_share", g.max_token_share)?;
        unit_interval("guard.max_unicode_escape_density", g.max_unicode_escape_density)?;

        if self.embedding_cache.disk_dir.is_some() && self.embedding_cache.disk_max_bytes == 0 {
            return Err(ConcordError::config(
                "embedding_cache.disk_max_bytes must be positive when disk_dir is set",
            ));
        }

        let j = &self.judge;
        if j.max_prompt_chars == 0 {
            return Err(ConcordError::config("judge.max_prompt_chars must be positive"));
        }
        if j.llm_timeout_ms == 0 || j.embedding_timeout_ms == 0 || j.verifier_timeout_ms == 0 {
            return Err(ConcordError::config("judge timeouts must be positive"));
        }
        non_negative("judge.max_requests_per_second", j.max_requests_per_second)?;
        if !(j.similarity_threshold > 0.0 && j.similarity_threshold < 1.0) {
            return Err(ConcordError::config(format!(
                "judge.similarity_threshold must be in (0, 1), got {}",
                j.similarity_threshold
            )));
        }
        if !(j.confidence_cap >= 0.7 && j.confidence_cap <= 1.0) {
            return Err(ConcordError::config(format!(
                "judge.confidence_cap must be in [0.7, 1], got {}",
                j.confidence_cap
            )));
        }
        if j.temperature != 0.0 {
            return Err(ConcordError::config(format!(
                "judge.temperature must be 0 for deterministic sampling, got {}",
                j.temperature
            )));
        }

        non_negative("budget.max_cost_usd", self.budget.max_cost_usd)?;

        self.decision.validate()?;

        let p = &self.pipeline;
        unit_interval("pipeline.auto_resolve_min_confidence", p.auto_resolve_min_confidence)?;
        for (artifact_type, methods) in &p.methods {
            if let Some(m) = methods.iter().find(|m| !m.supports(*artifact_type)) {
                return Err(ConcordError::config(format!(
                    "pipeline.methods: '{m}' does not support artifact type '{artifact_type}'"
                )));
            }
        }
        Ok(())
    }

    /// Stable hash of every result-affecting setting.
    pub fn fingerprint(&self) -> String {
        crate::fingerprint::canonical_fingerprint(self)
    }
}

pub fn load_config(path: &Path) -> ConcordResult<EngineConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConcordError::config(format!("failed to read config {}: {}", path.display(), e))
    })?;
    EngineConfig::from_yaml_str(&raw)
}
