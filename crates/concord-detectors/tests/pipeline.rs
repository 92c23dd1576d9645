use std::sync::Arc;

use concord_core::config::EngineConfig;
use concord_core::model::{
    ActionKind, Artifact, EvaluationMethod, Mismatch, MismatchStatus, MismatchType, SafetyLevel,
};
use concord_core::pipeline::{Collaborators, MismatchPipeline};
use concord_core::policy::StaticPolicy;
use concord_core::providers::embedder::FakeEmbedder;
use concord_core::providers::llm::FakeModelClient;
use concord_core::storage::{InMemoryStore, MismatchStore};
use concord_core::telemetry::{InMemoryTelemetry, Telemetry};
use concord_detectors::default_registry;

const NOT_EQUIVALENT: &str =
    r#"{"equivalent": false, "confidence": 0.85, "reasoning": "different facts", "violations": []}"#;

struct Harness {
    pipeline: MismatchPipeline,
    store: Arc<InMemoryStore>,
    telemetry: Arc<InMemoryTelemetry>,
    model: FakeModelClient,
    embedder: FakeEmbedder,
}

async fn harness(policy: StaticPolicy, embedder: FakeEmbedder) -> Harness {
    let mut config = EngineConfig::default();
    config.judge.max_requests_per_second = 0.0;
    let store = Arc::new(InMemoryStore::new());
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let model = FakeModelClient::new("fake-judge");
    let collaborators = Collaborators {
        model: Some(Arc::new(model.clone())),
        embedder: Some(Arc::new(embedder.clone())),
        verifier: None,
        telemetry: Some(telemetry.clone() as Arc<dyn Telemetry>),
    };
    let pipeline = MismatchPipeline::from_config(
        &config,
        default_registry(&config.detectors),
        store.clone(),
        Arc::new(policy),
        collaborators,
    )
    .await
    .unwrap();
    Harness {
        pipeline,
        store,
        telemetry,
        model,
        embedder,
    }
}

#[tokio::test]
async fn json_reordering_is_resolved_automatically() {
    let h = harness(StaticPolicy::benign_defaults(), FakeEmbedder::new("fake-embed")).await;
    let source = Artifact::json("cfg-a", r#"{"b": 2, "a": 1}"#);
    let target = Artifact::json("cfg-b", "{\n  \"a\": 1,\n  \"b\": 2\n}");

    let outcome = h.pipeline.process("run-1", &source, &target).await.unwrap();
    assert_eq!(outcome.status(), Some(MismatchStatus::Resolved));
    let mismatch = outcome.mismatch.as_ref().unwrap();
    assert_eq!(mismatch.mismatch_type, MismatchType::JsonOrdering);
    assert_eq!(mismatch.detectors, vec!["json_structure".to_string()]);
    assert!(mismatch.evidence.diff_id.is_some());
    assert!(mismatch.provenance.detector_versions.contains_key("ulp"));

    let transform = outcome.transform.as_ref().unwrap();
    assert_eq!(transform.new_content, r#"{"a":1,"b":2}"#);
    assert!(outcome.evaluation.is_none());
    assert_eq!(h.model.calls(), 0);

    let trail = h.store.audit_trail("cfg-b").await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(
        h.telemetry
            .counter_value("concord_resolutions_total{action=canonicalize_json,outcome=applied}"),
        1
    );
    assert!(h.telemetry.rejected().is_empty());
}

#[tokio::test]
async fn reprocessing_a_settled_pair_is_a_no_op() {
    let h = harness(StaticPolicy::benign_defaults(), FakeEmbedder::new("fake-embed")).await;
    let source = Artifact::json("cfg-a", r#"{"b": 2, "a": 1}"#);
    let target = Artifact::json("cfg-b", r#"{"a":1,"b":2}"#);

    let first = h.pipeline.process("run-1", &source, &target).await.unwrap();
    let second = h.pipeline.process("run-1", &source, &target).await.unwrap();
    let id = first.mismatch.as_ref().unwrap().id.clone();

    assert_eq!(second.mismatch.as_ref().unwrap().id, id);
    assert_eq!(second.status(), Some(MismatchStatus::Resolved));
    assert!(second.plan.is_none());
    assert_eq!(h.store.list_plans(&id).await.unwrap().len(), 1);
    assert_eq!(h.store.audit_trail("cfg-b").await.unwrap().len(), 1);
    assert_eq!(h.store.list_mismatches(Some("run-1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn identical_contents_produce_no_mismatch() {
    let h = harness(StaticPolicy::benign_defaults(), FakeEmbedder::new("fake-embed")).await;
    let a = Artifact::text("a", "same");
    let b = Artifact::text("b", "same");
    let outcome = h.pipeline.process("run-1", &a, &b).await.unwrap();
    assert!(outcome.mismatch.is_none());
    assert_eq!(h.telemetry.counter_value("concord_pairs_total{outcome=identical}"), 1);
    assert!(h.store.list_mismatches(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn unpermitted_action_leaves_a_plan_for_approval() {
    let h = harness(StaticPolicy::benign_defaults(), FakeEmbedder::new("fake-embed")).await;
    let source = Artifact::text("notes-a", "line one\r\nline two\r\n");
    let target = Artifact::text("notes-b", "line one\nline two\n");

    let outcome = h.pipeline.process("run-1", &source, &target).await.unwrap();
    assert_eq!(outcome.status(), Some(MismatchStatus::Inconclusive));
    let plan = outcome.plan.as_ref().unwrap();
    assert_eq!(plan.actions[0].action, ActionKind::NormalizeNewlines);
    assert_eq!(plan.safety_level(), SafetyLevel::Experimental);
    assert!(!plan.is_approved());
    assert!(outcome.transform.is_none());
    assert!(h.store.audit_trail("notes-b").await.unwrap().is_empty());
}

#[tokio::test]
async fn permitted_newline_fix_is_applied() {
    let policy = StaticPolicy::benign_defaults().allow(
        ActionKind::NormalizeNewlines,
        MismatchType::Whitespace,
        0.9,
    );
    let h = harness(policy, FakeEmbedder::new("fake-embed")).await;
    let source = Artifact::code("main-a", "fn main() {}\r\n");
    let target = Artifact::code("main-b", "fn main() {}\n");

    let outcome = h.pipeline.process("run-1", &source, &target).await.unwrap();
    assert_eq!(outcome.status(), Some(MismatchStatus::Resolved));
    assert_eq!(outcome.transform.unwrap().new_content, "fn main() {}\n");
}

#[tokio::test]
async fn semantic_change_is_judged_inconclusive() {
    let h = harness(StaticPolicy::benign_defaults(), FakeEmbedder::new("fake-embed")).await;
    h.model.push_response(NOT_EQUIVALENT);
    let source = Artifact::text("s-a", "The deployment finished without errors.");
    let target = Artifact::text("s-b", "Rollback started after the canary failed.");

    let outcome = h.pipeline.process("run-1", &source, &target).await.unwrap();
    assert_eq!(outcome.status(), Some(MismatchStatus::Inconclusive));
    let mismatch = outcome.mismatch.as_ref().unwrap();
    assert_eq!(mismatch.mismatch_type, MismatchType::Semantic);
    assert_eq!(mismatch.evidence.evaluation_ids.len(), 1);
    assert!(mismatch.evidence.similarity_scores.contains_key("llm_rubric_judge"));

    let verdict = outcome.verdict.as_ref().unwrap();
    assert!(!verdict.equivalent);
    assert_eq!(verdict.rule, "text_semantic@1");
    assert_eq!(h.model.calls(), 1);

    let eval_id = &mismatch.evidence.evaluation_ids[0];
    let stored = h.store.get_evaluation(eval_id).await.unwrap().unwrap();
    assert!(stored.result_for(EvaluationMethod::Exact).is_some());
}

#[tokio::test]
async fn reanalysis_can_resolve_an_inconclusive_mismatch() {
    let source_text = "Use the staging bucket for uploads.";
    let target_text = "Uploads go to the staging bucket.";
    let embedder = FakeEmbedder::new("fake-embed")
        .with_vector(source_text, vec![1.0, 0.0, 0.0])
        .with_vector(target_text, vec![1.0, 0.0, 0.0]);
    let h = harness(StaticPolicy::benign_defaults(), embedder).await;
    h.model.push_response(NOT_EQUIVALENT);
    let source = Artifact::text("doc-a", source_text);
    let target = Artifact::text("doc-b", target_text);

    let first = h.pipeline.process("run-1", &source, &target).await.unwrap();
    assert_eq!(first.status(), Some(MismatchStatus::Inconclusive));
    let id = first.mismatch.unwrap().id;

    let second = h.pipeline.reanalyze(&id, &source, &target).await.unwrap();
    assert_eq!(second.status(), Some(MismatchStatus::Resolved));
    assert!(second.verdict.unwrap().equivalent);
    assert_eq!(h.embedder.calls(), 1);

    let stored = h.store.get_mismatch(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), MismatchStatus::Resolved);
    assert_eq!(stored.evidence.evaluation_ids.len(), 2);
}

#[tokio::test]
async fn skip_records_the_operator() {
    let h = harness(StaticPolicy::benign_defaults(), FakeEmbedder::new("fake-embed")).await;
    let mismatch = h
        .store
        .create_mismatch(Mismatch::new("run-9", "a", "b", MismatchType::Unknown, 0.0))
        .await
        .unwrap();

    let skipped = h.pipeline.skip(&mismatch.id, "ops@example.com").await.unwrap();
    assert_eq!(skipped.status(), MismatchStatus::Skipped);
    assert_eq!(skipped.provenance.operator.as_deref(), Some("ops@example.com"));
    assert!(h.pipeline.skip(&mismatch.id, "again").await.is_err());
}
