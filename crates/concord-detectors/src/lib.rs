//! Built-in mismatch detectors.
//!
//! Each detector recognises one class of benign or explainable noise.
//! [`default_registry`] wires them up in precedence order: line endings,
//! whitespace, unicode, JSON structure, numeric drift, markdown and finally
//! run-specific values.

mod json_structure;
mod markdown;
mod newline;
mod nondeterminism;
mod numbers;
mod numeric_epsilon;
mod ulp;
mod unicode;
mod whitespace;

pub use json_structure::JsonStructureDetector;
pub use markdown::MarkdownDetector;
pub use newline::NewlineDetector;
pub use nondeterminism::NondeterminismDetector;
pub use numeric_epsilon::NumericEpsilonDetector;
pub use ulp::UlpDetector;
pub use unicode::UnicodeDetector;
pub use whitespace::WhitespaceDetector;

use concord_core::config::DetectorConfig;
use concord_core::detect::{Detector, DetectorRegistry};

pub fn default_detectors(config: &DetectorConfig) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(NewlineDetector),
        Box::new(WhitespaceDetector),
        Box::new(UnicodeDetector),
        Box::new(JsonStructureDetector),
        Box::new(NumericEpsilonDetector::new(
            config.numeric_abs_tol,
            config.numeric_rel_tol,
        )),
        Box::new(UlpDetector::from_config(config)),
        Box::new(MarkdownDetector),
        Box::new(NondeterminismDetector),
    ]
}

pub fn default_registry(config: &DetectorConfig) -> DetectorRegistry {
    let mut registry =
        DetectorRegistry::new().with_short_circuit_confidence(config.short_circuit_min_confidence);
    for detector in default_detectors(config) {
        registry.register(detector);
    }
    registry
}
