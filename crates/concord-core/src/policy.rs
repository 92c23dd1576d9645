//! Policy collaborator.
//!
//! The engine never decides organizational policy; it asks. A missing
//! policy entry means "not allowed, approval required".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ActionKind, MismatchType, SafetyLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub safety_level: SafetyLevel,
    /// Minimum detector confidence before the action may run.
    pub min_confidence: f64,
    pub reason: String,
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            safety_level: SafetyLevel::Experimental,
            min_confidence: 1.0,
            reason: reason.into(),
        }
    }

    /// Whether an action at `confidence` may run without human approval.
    pub fn permits_automatic(&self, confidence: f64) -> bool {
        self.allowed
            && self.safety_level == SafetyLevel::Automatic
            && confidence >= self.min_confidence
    }
}

pub trait PolicyProvider: Send + Sync {
    fn decide(
        &self,
        action: ActionKind,
        mismatch_type: MismatchType,
        environment: &str,
    ) -> PolicyDecision;
}

/// One entry of a [`StaticPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub action: ActionKind,
    pub mismatch_type: MismatchType,
    /// `None` applies to every environment not matched more specifically.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default = "default_safety_level")]
    pub safety_level: SafetyLevel,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_safety_level() -> SafetyLevel {
    SafetyLevel::Automatic
}

fn default_min_confidence() -> f64 {
    0.9
}

/// Table-driven policy, loadable from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticPolicy {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, action: ActionKind, mismatch_type: MismatchType, min_confidence: f64) -> Self {
        self.rules.push(PolicyRule {
            action,
            mismatch_type,
            environment: None,
            safety_level: SafetyLevel::Automatic,
            min_confidence,
        });
        self
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Auto-resolution of every benign, auto-resolvable type in every
    /// environment, at confidence 0.9 or more.
    pub fn benign_defaults() -> Self {
        let mut policy = Self::new();
        for t in [
            MismatchType::Whitespace,
            MismatchType::JsonOrdering,
            MismatchType::MarkdownFormatting,
        ] {
            if let Some(action) = t.default_action() {
                policy = policy.allow(action, t, default_min_confidence());
            }
        }
        policy
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        serde_yaml::from_str(yaml).context("failed to parse policy YAML")
    }

    /// Summary of rule counts per action, for logging.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for r in &self.rules {
            *out.entry(r.action.to_string()).or_insert(0) += 1;
        }
        out
    }
}

impl PolicyProvider for StaticPolicy {
    fn decide(
        &self,
        action: ActionKind,
        mismatch_type: MismatchType,
        environment: &str,
    ) -> PolicyDecision {
        let candidates = self
            .rules
            .iter()
            .filter(|r| r.action == action && r.mismatch_type == mismatch_type);
        let mut fallback = None;
        for rule in candidates {
            match rule.environment.as_deref() {
                Some(env) if env == environment => return decision_from(rule, environment),
                None if fallback.is_none() => fallback = Some(rule),
                _ => {}
            }
        }
        match fallback {
            Some(rule) => decision_from(rule, environment),
            None => PolicyDecision::deny(format!(
                "no policy for {action} on {mismatch_type} in '{environment}'"
            )),
        }
    }
}

fn decision_from(rule: &PolicyRule, environment: &str) -> PolicyDecision {
    PolicyDecision {
        allowed: true,
        safety_level: rule.safety_level,
        min_confidence: rule.min_confidence,
        reason: format!(
            "{} allowed for {} in '{}'",
            rule.action, rule.mismatch_type, environment
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_policy_fails_closed() {
        let d = StaticPolicy::new().decide(
            ActionKind::NormalizeWhitespace,
            MismatchType::Whitespace,
            "prod",
        );
        assert!(!d.allowed);
        assert!(!d.permits_automatic(1.0));
        assert_eq!(d.safety_level.approvals_required(), 2);
    }

    #[test]
    fn environment_specific_rule_wins() {
        let policy = StaticPolicy::new()
            .allow(ActionKind::CanonicalizeJson, MismatchType::JsonOrdering, 0.9)
            .with_rule(PolicyRule {
                action: ActionKind::CanonicalizeJson,
                mismatch_type: MismatchType::JsonOrdering,
                environment: Some("prod".into()),
                safety_level: SafetyLevel::Advisory,
                min_confidence: 0.99,
            });
        let prod = policy.decide(ActionKind::CanonicalizeJson, MismatchType::JsonOrdering, "prod");
        assert_eq!(prod.safety_level, SafetyLevel::Advisory);
        assert!(!prod.permits_automatic(1.0));

        let dev = policy.decide(ActionKind::CanonicalizeJson, MismatchType::JsonOrdering, "dev");
        assert!(dev.permits_automatic(0.95));
        assert!(!dev.permits_automatic(0.5));
    }

    #[test]
    fn loads_from_yaml() {
        let policy = StaticPolicy::from_yaml_str(
            "rules:\n  - action: normalize_whitespace\n    mismatch_type: whitespace\n",
        )
        .unwrap();
        let d = policy.decide(ActionKind::NormalizeWhitespace, MismatchType::Whitespace, "ci");
        assert!(d.allowed);
        assert_eq!(d.min_confidence, 0.9);
        assert_eq!(policy.summary()["normalize_whitespace"], 1);
    }
}
