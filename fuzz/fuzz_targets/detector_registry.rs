#![no_main]

use concord_core::config::DetectorConfig;
use concord_core::detect::RunMode;
use concord_core::model::ArtifactType;
use concord_detectors::default_registry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let (a, b) = s.split_at(s.char_indices().nth(s.chars().count() / 2).map_or(0, |(i, _)| i));
    let registry = default_registry(&DetectorConfig::default());
    for t in [ArtifactType::Text, ArtifactType::Json, ArtifactType::Code] {
        let report = registry.run(a, b, t, RunMode::FullEvidence);
        for r in &report.results {
            assert!((0.0..=1.0).contains(&r.confidence));
            assert!(!r.auto_resolvable || r.suggested_action.is_some());
        }
    }
});
