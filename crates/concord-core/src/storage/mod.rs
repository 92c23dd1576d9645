//! Persistence collaborator.
//!
//! The engine only needs create/get/update/list for mismatches, plans,
//! evaluations and apply audits. Creation is idempotent: creating a record
//! whose id already exists returns the stored record unchanged, so retried
//! pipeline runs converge instead of failing.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{ConcordError, ConcordResult};
use crate::model::{Evaluation, Mismatch, ResolutionPlan};
use crate::resolve::AuditRecord;

#[async_trait]
pub trait MismatchStore: Send + Sync {
    /// Stores `mismatch`, or returns the existing record with the same id.
    async fn create_mismatch(&self, mismatch: Mismatch) -> ConcordResult<Mismatch>;

    async fn get_mismatch(&self, id: &str) -> ConcordResult<Option<Mismatch>>;

    /// Replaces an existing record. Unknown ids are a store error.
    async fn update_mismatch(&self, mismatch: &Mismatch) -> ConcordResult<()>;

    async fn list_mismatches(&self, run_id: Option<&str>) -> ConcordResult<Vec<Mismatch>>;

    async fn create_plan(&self, plan: ResolutionPlan) -> ConcordResult<ResolutionPlan>;

    async fn get_plan(&self, id: &str) -> ConcordResult<Option<ResolutionPlan>>;

    async fn update_plan(&self, plan: &ResolutionPlan) -> ConcordResult<()>;

    async fn list_plans(&self, mismatch_id: &str) -> ConcordResult<Vec<ResolutionPlan>>;

    async fn save_evaluation(&self, evaluation: &Evaluation) -> ConcordResult<()>;

    async fn get_evaluation(&self, id: &str) -> ConcordResult<Option<Evaluation>>;

    async fn record_audit(&self, record: AuditRecord) -> ConcordResult<()>;

    /// Audit trail for one artifact, oldest first.
    async fn audit_trail(&self, target_artifact_id: &str) -> ConcordResult<Vec<AuditRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    mismatches: Mutex<BTreeMap<String, Mismatch>>,
    plans: Mutex<BTreeMap<String, ResolutionPlan>>,
    evaluations: Mutex<BTreeMap<String, Evaluation>>,
    audits: Mutex<Vec<AuditRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl MismatchStore for InMemoryStore {
    async fn create_mismatch(&self, mismatch: Mismatch) -> ConcordResult<Mismatch> {
        let mut map = lock(&self.mismatches);
        Ok(map
            .entry(mismatch.id.clone())
            .or_insert(mismatch)
            .clone())
    }

    async fn get_mismatch(&self, id: &str) -> ConcordResult<Option<Mismatch>> {
        Ok(lock(&self.mismatches).get(id).cloned())
    }

    async fn update_mismatch(&self, mismatch: &Mismatch) -> ConcordResult<()> {
        let mut map = lock(&self.mismatches);
        match map.get_mut(&mismatch.id) {
            Some(slot) => {
                *slot = mismatch.clone();
                Ok(())
            }
            None => Err(ConcordError::store(format!(
                "mismatch {} not found",
                mismatch.id
            ))),
        }
    }

    async fn list_mismatches(&self, run_id: Option<&str>) -> ConcordResult<Vec<Mismatch>> {
        Ok(lock(&self.mismatches)
            .values()
            .filter(|m| run_id.map_or(true, |r| m.run_id == r))
            .cloned()
            .collect())
    }

    async fn create_plan(&self, plan: ResolutionPlan) -> ConcordResult<ResolutionPlan> {
        let mut map = lock(&self.plans);
        Ok(map.entry(plan.id.clone()).or_insert(plan).clone())
    }

    async fn get_plan(&self, id: &str) -> ConcordResult<Option<ResolutionPlan>> {
        Ok(lock(&self.plans).get(id).cloned())
    }

    async fn update_plan(&self, plan: &ResolutionPlan) -> ConcordResult<()> {
        let mut map = lock(&self.plans);
        match map.get_mut(&plan.id) {
            Some(slot) => {
                *slot = plan.clone();
                Ok(())
            }
            None => Err(ConcordError::store(format!("plan {} not found", plan.id))),
        }
    }

    async fn list_plans(&self, mismatch_id: &str) -> ConcordResult<Vec<ResolutionPlan>> {
        Ok(lock(&self.plans)
            .values()
            .filter(|p| p.mismatch_id == mismatch_id)
            .cloned()
            .collect())
    }

    async fn save_evaluation(&self, evaluation: &Evaluation) -> ConcordResult<()> {
        lock(&self.evaluations).insert(evaluation.id().to_string(), evaluation.clone());
        Ok(())
    }

    async fn get_evaluation(&self, id: &str) -> ConcordResult<Option<Evaluation>> {
        Ok(lock(&self.evaluations).get(id).cloned())
    }

    async fn record_audit(&self, record: AuditRecord) -> ConcordResult<()> {
        lock(&self.audits).push(record);
        Ok(())
    }

    async fn audit_trail(&self, target_artifact_id: &str) -> ConcordResult<Vec<AuditRecord>> {
        Ok(lock(&self.audits)
            .iter()
            .filter(|a| a.target_artifact_id == target_artifact_id)
            .cloned()
            .collect())
    }
}
