//! Code-execution verification collaborator.
//!
//! Running test suites, linters or type checkers lives outside the engine.
//! The `test_execution` method only asks an injected verifier whether both
//! versions behave the same.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ArtifactType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Both versions produced the same observable outcome.
    pub equivalent: bool,
    pub tests_run: u32,
    pub tests_failed: u32,
    pub details: String,
    pub cost_usd: f64,
}

#[async_trait]
pub trait ExecutionVerifier: Send + Sync {
    async fn verify(
        &self,
        source: &str,
        target: &str,
        artifact_type: ArtifactType,
    ) -> anyhow::Result<VerificationReport>;

    fn name(&self) -> &'static str;
}

/// Returns one fixed report; for tests and dry runs.
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    report: VerificationReport,
}

impl StaticVerifier {
    pub fn new(report: VerificationReport) -> Self {
        Self { report }
    }

    pub fn passing(tests_run: u32) -> Self {
        Self::new(VerificationReport {
            equivalent: true,
            tests_run,
            tests_failed: 0,
            details: "all tests passed on both versions".to_string(),
            cost_usd: 0.0,
        })
    }
}

#[async_trait]
impl ExecutionVerifier for StaticVerifier {
    async fn verify(
        &self,
        _source: &str,
        _target: &str,
        _artifact_type: ArtifactType,
    ) -> anyhow::Result<VerificationReport> {
        Ok(self.report.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
