use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::new_id;
use crate::errors::{ConcordError, ConcordResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    NormalizeNewlines,
    NormalizeWhitespace,
    CanonicalizeJson,
    NormalizeMarkdown,
    ReplaceContent,
    DeleteArtifact,
    Rollback,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NormalizeNewlines => "normalize_newlines",
            Self::NormalizeWhitespace => "normalize_whitespace",
            Self::CanonicalizeJson => "canonicalize_json",
            Self::NormalizeMarkdown => "normalize_markdown",
            Self::ReplaceContent => "replace_content",
            Self::DeleteArtifact => "delete_artifact",
            Self::Rollback => "rollback",
        }
    }

    /// Actions that lose information if applied wrongly.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::ReplaceContent | Self::DeleteArtifact)
    }

    /// Id of the idempotent transform implementing this action, if any.
    pub fn transform_id(&self) -> Option<&'static str> {
        match self {
            Self::NormalizeNewlines
            | Self::NormalizeWhitespace
            | Self::CanonicalizeJson
            | Self::NormalizeMarkdown => Some(self.as_str()),
            Self::ReplaceContent | Self::DeleteArtifact | Self::Rollback => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much human sign-off a plan needs. Ordered from least to most strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Automatic,
    Advisory,
    Experimental,
}

impl SafetyLevel {
    pub fn approvals_required(&self) -> usize {
        match self {
            Self::Automatic => 0,
            Self::Advisory => 1,
            Self::Experimental => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResolutionActionRecord")]
pub struct ResolutionAction {
    pub action: ActionKind,
    pub target_artifact_id: String,
    pub transformation_id: Option<String>,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub reversible: bool,
    destructive: bool,
}

#[derive(Deserialize)]
struct ResolutionActionRecord {
    action: ActionKind,
    target_artifact_id: String,
    transformation_id: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_reversible")]
    reversible: bool,
}

fn default_reversible() -> bool {
    true
}

impl From<ResolutionActionRecord> for ResolutionAction {
    fn from(r: ResolutionActionRecord) -> Self {
        let mut action = Self::new(r.action, r.target_artifact_id);
        if r.transformation_id.is_some() {
            action.transformation_id = r.transformation_id;
        }
        action.parameters = r.parameters;
        action.reversible = r.reversible;
        action
    }
}

impl ResolutionAction {
    pub fn new(action: ActionKind, target_artifact_id: impl Into<String>) -> Self {
        Self {
            action,
            target_artifact_id: target_artifact_id.into(),
            transformation_id: action.transform_id().map(str::to_string),
            parameters: BTreeMap::new(),
            reversible: true,
            destructive: action.is_destructive(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub user: String,
    pub approved_at: DateTime<Utc>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub id: String,
    pub mismatch_id: String,
    pub actions: Vec<ResolutionAction>,
    safety_level: SafetyLevel,
    pub required_evidence: Vec<String>,
    approvals: Vec<Approval>,
    pub created_at: DateTime<Utc>,
}

impl ResolutionPlan {
    pub fn new(mismatch_id: impl Into<String>, safety_level: SafetyLevel) -> Self {
        Self {
            id: new_id("plan"),
            mismatch_id: mismatch_id.into(),
            actions: Vec::new(),
            safety_level,
            required_evidence: Vec::new(),
            approvals: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: ResolutionAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn require_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.required_evidence.push(evidence.into());
        self
    }

    pub fn safety_level(&self) -> SafetyLevel {
        self.safety_level
    }

    pub fn approvals(&self) -> &[Approval] {
        &self.approvals
    }

    pub fn approvals_required(&self) -> usize {
        self.safety_level.approvals_required()
    }

    /// Changes the safety level. Raising it invalidates prior approvals.
    pub fn set_safety_level(&mut self, level: SafetyLevel) {
        if level > self.safety_level {
            self.approvals.clear();
        }
        self.safety_level = level;
    }

    pub fn approve(&mut self, user: impl Into<String>, comment: Option<String>) -> ConcordResult<()> {
        let user = user.into();
        if self.approvals.iter().any(|a| a.user == user) {
            return Err(ConcordError::DuplicateApproval { user });
        }
        self.approvals.push(Approval {
            user,
            approved_at: Utc::now(),
            comment,
        });
        Ok(())
    }

    pub fn is_approved(&self) -> bool {
        self.approvals.len() >= self.approvals_required()
    }

    pub fn has_destructive_actions(&self) -> bool {
        self.actions.iter().any(ResolutionAction::is_destructive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approvals_follow_safety_level() {
        assert!(ResolutionPlan::new("m", SafetyLevel::Automatic).is_approved());

        let mut plan = ResolutionPlan::new("m", SafetyLevel::Advisory);
        assert!(!plan.is_approved());
        plan.approve("alice", None).unwrap();
        assert!(plan.is_approved());
    }

    #[test]
    fn raising_safety_level_clears_approvals() {
        let mut plan = ResolutionPlan::new("m", SafetyLevel::Advisory);
        plan.approve("alice", None).unwrap();
        plan.set_safety_level(SafetyLevel::Experimental);
        assert!(plan.approvals().is_empty());
        assert_eq!(plan.approvals_required(), 2);

        plan.approve("alice", None).unwrap();
        plan.set_safety_level(SafetyLevel::Advisory);
        assert_eq!(plan.approvals().len(), 1);
        assert!(plan.is_approved());
    }

    #[test]
    fn double_approval_is_rejected() {
        let mut plan = ResolutionPlan::new("m", SafetyLevel::Experimental);
        plan.approve("alice", None).unwrap();
        let err = plan.approve("alice", Some("again".into())).unwrap_err();
        assert!(matches!(err, ConcordError::DuplicateApproval { .. }));
        assert!(!plan.is_approved());
    }

    #[test]
    fn destructive_flag_is_derived_from_action() {
        let json = serde_json::json!({
            "action": "delete_artifact",
            "target_artifact_id": "a1",
            "transformation_id": null,
            "destructive": false
        });
        let action: ResolutionAction = serde_json::from_value(json).unwrap();
        assert!(action.is_destructive());
        assert!(!ResolutionAction::new(ActionKind::CanonicalizeJson, "a1").is_destructive());
        assert_eq!(
            ResolutionAction::new(ActionKind::CanonicalizeJson, "a1").transformation_id.as_deref(),
            Some("canonicalize_json")
        );
    }
}
