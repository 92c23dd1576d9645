#![no_main]

use concord_core::model::{ActionKind, ArtifactType, ResolutionAction};
use concord_core::resolve::{TransformConfig, TransformEngine, TransformRegistry};
use libfuzzer_sys::fuzz_target;

const CASES: &[(ActionKind, ArtifactType)] = &[
    (ActionKind::NormalizeNewlines, ArtifactType::Text),
    (ActionKind::NormalizeWhitespace, ArtifactType::Text),
    (ActionKind::NormalizeWhitespace, ArtifactType::Code),
    (ActionKind::CanonicalizeJson, ArtifactType::Json),
    (ActionKind::NormalizeMarkdown, ArtifactType::Text),
];

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let engine = TransformEngine::new(TransformRegistry::with_defaults(), TransformConfig::default());
    for &(kind, artifact_type) in CASES {
        let action = ResolutionAction::new(kind, "fuzz");
        let Ok(once) = engine.preview(&action, s, artifact_type) else {
            continue;
        };
        assert!(once.idempotent, "{kind} is not a fixed point");
        let twice = engine
            .preview(&action, &once.new_content, artifact_type)
            .expect("second pass");
        assert_eq!(once.new_content, twice.new_content);
    }
});
