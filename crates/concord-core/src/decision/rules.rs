use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{ConcordError, ConcordResult};
use crate::model::{ArtifactType, EvaluationMethod};

/// A deterministic method whose positive result settles the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralShortCircuit {
    pub method: EvaluationMethod,
    pub min_confidence: f64,
}

/// One semantic signal that must hold for an "equivalent" verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    MinSimilarity {
        method: EvaluationMethod,
        threshold: f64,
    },
    Equivalent {
        method: EvaluationMethod,
        min_confidence: f64,
    },
}

impl Condition {
    pub fn method(&self) -> EvaluationMethod {
        match self {
            Self::MinSimilarity { method, .. } | Self::Equivalent { method, .. } => *method,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::MinSimilarity { method, threshold } => {
                format!("{method} similarity >= {threshold}")
            }
            Self::Equivalent {
                method,
                min_confidence,
            } => format!("{method} equivalent at confidence >= {min_confidence}"),
        }
    }

    fn threshold(&self) -> f64 {
        match self {
            Self::MinSimilarity { threshold, .. } => *threshold,
            Self::Equivalent { min_confidence, .. } => *min_confidence,
        }
    }
}

fn default_confidence_cap() -> f64 {
    0.95
}

fn default_veto_confidence() -> f64 {
    0.2
}

/// Named, versioned conjunctive rule for one artifact type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub name: String,
    pub version: String,
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub structural: Option<StructuralShortCircuit>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Violation tags that veto equivalence outright.
    #[serde(default)]
    pub blocklist: BTreeSet<String>,
    /// Per-method weights for the passing confidence; unlisted methods weigh 1.
    #[serde(default)]
    pub weights: BTreeMap<EvaluationMethod, f64>,
    #[serde(default = "default_confidence_cap")]
    pub confidence_cap: f64,
    /// Confidence reported on a veto or failed condition.
    #[serde(default = "default_veto_confidence")]
    pub veto_confidence: f64,
}

impl DecisionRule {
    pub fn new(name: &str, version: &str, artifact_type: ArtifactType) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            artifact_type,
            structural: None,
            conditions: Vec::new(),
            blocklist: default_blocklist(),
            weights: BTreeMap::new(),
            confidence_cap: default_confidence_cap(),
            veto_confidence: default_veto_confidence(),
        }
    }

    pub fn with_structural(mut self, method: EvaluationMethod, min_confidence: f64) -> Self {
        self.structural = Some(StructuralShortCircuit {
            method,
            min_confidence,
        });
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_weight(mut self, method: EvaluationMethod, weight: f64) -> Self {
        self.weights.insert(method, weight);
        self
    }

    /// `name@version`, as recorded on verdicts.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn weight(&self, method: EvaluationMethod) -> f64 {
        self.weights.get(&method).copied().unwrap_or(1.0)
    }

    pub fn validate(&self) -> ConcordResult<()> {
        let unit = |v: f64| (0.0..=1.0).contains(&v);
        let label = self.label();
        if self.name.trim().is_empty() {
            return Err(ConcordError::config("decision rule name is empty"));
        }
        if !unit(self.confidence_cap) || self.confidence_cap == 0.0 {
            return Err(ConcordError::config(format!(
                "rule {label}: confidence_cap must be in (0, 1]"
            )));
        }
        if !unit(self.veto_confidence) {
            return Err(ConcordError::config(format!(
                "rule {label}: veto_confidence must be in [0, 1]"
            )));
        }
        if let Some(s) = &self.structural {
            if !s.method.is_deterministic() {
                return Err(ConcordError::config(format!(
                    "rule {label}: structural method '{}' is not deterministic",
                    s.method
                )));
            }
            if !unit(s.min_confidence) {
                return Err(ConcordError::config(format!(
                    "rule {label}: structural min_confidence must be in [0, 1]"
                )));
            }
        }
        for c in &self.conditions {
            if !unit(c.threshold()) {
                return Err(ConcordError::config(format!(
                    "rule {label}: threshold out of range in '{}'",
                    c.describe()
                )));
            }
            if !c.method().supports(self.artifact_type) {
                return Err(ConcordError::config(format!(
                    "rule {label}: method '{}' does not support {}",
                    c.method(),
                    self.artifact_type
                )));
            }
        }
        if let Some((m, w)) = self.weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(ConcordError::config(format!(
                "rule {label}: weight for '{m}' must be a non-negative number, got {w}"
            )));
        }
        Ok(())
    }
}

pub fn default_blocklist() -> BTreeSet<String> {
    [
        "unit_change",
        "sign_flip",
        "numeric_change",
        "negation",
        "missing_content",
        "prompt_injection",
        "parse_error",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Rules per artifact type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub rules: Vec<DecisionRule>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                DecisionRule::new("text_semantic", "1", ArtifactType::Text)
                    .with_condition(Condition::MinSimilarity {
                        method: EvaluationMethod::CosineSimilarity,
                        threshold: 0.85,
                    })
                    .with_condition(Condition::Equivalent {
                        method: EvaluationMethod::LlmRubricJudge,
                        min_confidence: 0.7,
                    })
                    .with_weight(EvaluationMethod::CosineSimilarity, 0.4)
                    .with_weight(EvaluationMethod::LlmRubricJudge, 0.6),
                DecisionRule::new("json_structural", "1", ArtifactType::Json)
                    .with_structural(EvaluationMethod::CanonicalJson, 0.99)
                    .with_condition(Condition::Equivalent {
                        method: EvaluationMethod::LlmRubricJudge,
                        min_confidence: 0.8,
                    }),
                DecisionRule::new("code_structural", "1", ArtifactType::Code)
                    .with_structural(EvaluationMethod::AstNormalized, 0.99)
                    .with_condition(Condition::Equivalent {
                        method: EvaluationMethod::LlmRubricJudge,
                        min_confidence: 0.8,
                    }),
                DecisionRule::new("binary_exact", "1", ArtifactType::Binary),
            ],
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> ConcordResult<()> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.artifact_type) {
                return Err(ConcordError::config(format!(
                    "more than one decision rule for artifact type '{}'",
                    rule.artifact_type
                )));
            }
        }
        Ok(())
    }

    pub fn rule_for(&self, artifact_type: ArtifactType) -> Option<&DecisionRule> {
        self.rules.iter().find(|r| r.artifact_type == artifact_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_type_and_validate() {
        let config = DecisionConfig::default();
        config.validate().unwrap();
        for t in ArtifactType::ALL {
            assert!(config.rule_for(t).is_some(), "missing rule for {t}");
        }
    }

    #[test]
    fn rules_load_from_yaml() {
        let yaml = r#"
rules:
  - name: strict_text
    version: "2"
    artifact_type: text
    conditions:
      - kind: min_similarity
        method: cosine_similarity
        threshold: 0.9
    blocklist: [unit_change]
    weights:
      cosine_similarity: 1.0
"#;
        let config: DecisionConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let rule = config.rule_for(ArtifactType::Text).unwrap();
        assert_eq!(rule.label(), "strict_text@2");
        assert_eq!(rule.confidence_cap, 0.95);
        assert_eq!(rule.conditions.len(), 1);
        assert!(config.rule_for(ArtifactType::Json).is_none());
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let rule = DecisionRule::new("r", "1", ArtifactType::Text)
            .with_structural(EvaluationMethod::LlmRubricJudge, 0.9);
        assert!(rule.validate().is_err());

        let rule = DecisionRule::new("r", "1", ArtifactType::Text).with_condition(
            Condition::MinSimilarity {
                method: EvaluationMethod::CosineSimilarity,
                threshold: 1.5,
            },
        );
        assert!(rule.validate().is_err());

        let dup = DecisionConfig {
            rules: vec![
                DecisionRule::new("a", "1", ArtifactType::Text),
                DecisionRule::new("b", "1", ArtifactType::Text),
            ],
        };
        assert!(dup.validate().is_err());
    }
}
