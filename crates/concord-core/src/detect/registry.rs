use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Detector, DetectorResult};
use crate::fingerprint;
use crate::model::ArtifactType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Stop at the first confident benign hit.
    #[default]
    ShortCircuit,
    /// Run every detector and tag results with provenance.
    FullEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectorStats {
    pub calls: u64,
    pub detections: u64,
    pub errors: u64,
    pub total_latency_us: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub mode: RunMode,
    /// Sorted by confidence (descending), then precedence (ascending).
    pub results: Vec<DetectorResult>,
    pub registry_fingerprint: String,
    pub short_circuited_by: Option<String>,
}

impl DetectionReport {
    pub fn top(&self) -> Option<&DetectorResult> {
        self.results.first()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.results.iter().map(|r| r.detector.clone()).collect()
    }
}

/// Ordered set of detectors plus per-detector counters.
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
    stats: Mutex<BTreeMap<String, DetectorStats>>,
    short_circuit_min_confidence: f64,
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            stats: Mutex::new(BTreeMap::new()),
            short_circuit_min_confidence: 0.7,
        }
    }

    pub fn with_short_circuit_confidence(mut self, min_confidence: f64) -> Self {
        self.short_circuit_min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    /// Inserts keeping precedence order; equal precedence keeps insertion order.
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        let pos = self
            .detectors
            .iter()
            .position(|d| d.precedence() > detector.precedence())
            .unwrap_or(self.detectors.len());
        self.detectors.insert(pos, detector);
    }

    pub fn with(mut self, detector: Box<dyn Detector>) -> Self {
        self.register(detector);
        self
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn detector_versions(&self) -> BTreeMap<String, String> {
        self.detectors
            .iter()
            .map(|d| (d.name().to_string(), d.version().to_string()))
            .collect()
    }

    /// Hash over the ordered detector set and each detector's configuration.
    pub fn fingerprint(&self) -> String {
        let ordered: Vec<String> = self
            .detectors
            .iter()
            .map(|d| {
                format!(
                    "{}@{}#{}:{}",
                    d.name(),
                    d.version(),
                    d.precedence(),
                    d.config_fingerprint()
                )
            })
            .collect();
        fingerprint::compute(&[
            ("detectors", ordered.join(",")),
            (
                "short_circuit_min_confidence",
                format!("{}", self.short_circuit_min_confidence),
            ),
        ])
        .hex
    }

    pub fn stats(&self) -> BTreeMap<String, DetectorStats> {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn run(
        &self,
        source: &str,
        target: &str,
        artifact_type: ArtifactType,
        mode: RunMode,
    ) -> DetectionReport {
        let registry_fingerprint = self.fingerprint();
        let mut report = DetectionReport {
            mode,
            results: Vec::new(),
            registry_fingerprint: registry_fingerprint.clone(),
            short_circuited_by: None,
        };
        if source == target {
            return report;
        }

        let runtime = fingerprint::runtime_descriptor();
        let mut hits: Vec<(u32, DetectorResult)> = Vec::new();

        for detector in self.detectors.iter().filter(|d| d.supports(artifact_type)) {
            let started = Instant::now();
            let outcome = detector.detect(source, target, artifact_type);
            let elapsed_us = started.elapsed().as_micros() as u64;

            let mut hit = None;
            {
                let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                let entry = stats.entry(detector.name().to_string()).or_default();
                entry.calls += 1;
                entry.total_latency_us += elapsed_us;
                match outcome {
                    Ok(Some(result)) => {
                        entry.detections += 1;
                        hit = Some(result);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        entry.errors += 1;
                        warn!(detector = detector.name(), error = %e, "detector failed");
                    }
                }
            }

            let Some(mut result) = hit else {
                debug!(detector = detector.name(), %artifact_type, "no detection");
                continue;
            };
            debug!(
                detector = detector.name(),
                mismatch_type = %result.mismatch_type,
                confidence = result.confidence,
                "detection"
            );

            if mode == RunMode::FullEvidence {
                result.metadata.insert(
                    "registry_fingerprint".to_string(),
                    serde_json::json!(registry_fingerprint),
                );
                result
                    .metadata
                    .insert("runtime".to_string(), runtime.clone());
            }

            let stop = mode == RunMode::ShortCircuit
                && result.is_benign()
                && result.confidence >= self.short_circuit_min_confidence;
            if stop {
                report.short_circuited_by = Some(result.detector.clone());
            }
            hits.push((detector.precedence(), result));
            if stop {
                break;
            }
        }

        hits.sort_by(|(pa, a), (pb, b)| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| pa.cmp(pb))
        });
        report.results = hits.into_iter().map(|(_, r)| r).collect();
        report
    }
}
