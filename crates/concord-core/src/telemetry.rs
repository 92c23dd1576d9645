//! Telemetry collaborator: counters and histograms, purely observational.
//!
//! Labels that carry record identifiers would explode metric cardinality,
//! so a metric using one is dropped (and logged) instead of emitted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use lazy_static::lazy_static;

lazy_static! {
    static ref FORBIDDEN_LABELS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("artifact_id");
        s.insert("diff_id");
        s.insert("mismatch_id");
        s.insert("run_id");
        s.insert("evaluation_id");
        s
    };
}

pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Rejects label sets that include an identifier label.
pub fn check_labels(labels: Labels<'_>) -> Result<(), String> {
    match labels.iter().find(|(k, _)| FORBIDDEN_LABELS.contains(*k)) {
        Some((k, _)) => Err(format!("forbidden metric label '{k}'")),
        None => Ok(()),
    }
}

pub trait Telemetry: Send + Sync {
    fn counter(&self, name: &str, value: u64, labels: Labels<'_>);

    fn histogram(&self, name: &str, value: f64, labels: Labels<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn counter(&self, _name: &str, _value: u64, _labels: Labels<'_>) {}

    fn histogram(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}
}

/// Emits every metric as a `tracing` event on the `concord.metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn counter(&self, name: &str, value: u64, labels: Labels<'_>) {
        if let Err(e) = check_labels(labels) {
            tracing::warn!(metric = name, "dropping metric: {e}");
            return;
        }
        tracing::debug!(target: "concord.metrics", metric = name, value, labels = ?labels, "counter");
    }

    fn histogram(&self, name: &str, value: f64, labels: Labels<'_>) {
        if let Err(e) = check_labels(labels) {
            tracing::warn!(metric = name, "dropping metric: {e}");
            return;
        }
        tracing::debug!(target: "concord.metrics", metric = name, value, labels = ?labels, "histogram");
    }
}

fn series_key(name: &str, labels: Labels<'_>) -> String {
    let mut sorted: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    sorted.sort();
    if sorted.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", sorted.join(","))
    }
}

/// Keeps metrics in memory for assertions.
///
/// Series are keyed `name{k=v,...}` with labels sorted.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    counters: Mutex<BTreeMap<String, u64>>,
    histograms: Mutex<BTreeMap<String, Vec<f64>>>,
    rejected: Mutex<Vec<String>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, series: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(series)
            .copied()
            .unwrap_or(0)
    }

    /// Sum of a counter across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{name}{{");
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(k, _)| k.as_str() == name || k.starts_with(&prefix))
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn histogram_values(&self, series: &str) -> Vec<f64> {
        self.histograms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(series)
            .cloned()
            .unwrap_or_default()
    }

    pub fn series(&self) -> Vec<String> {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Metric names dropped for carrying a forbidden label.
    pub fn rejected(&self) -> Vec<String> {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn admit(&self, name: &str, labels: Labels<'_>) -> bool {
        if check_labels(labels).is_err() {
            self.rejected
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(name.to_string());
            return false;
        }
        true
    }
}

impl Telemetry for InMemoryTelemetry {
    fn counter(&self, name: &str, value: u64, labels: Labels<'_>) {
        if !self.admit(name, labels) {
            return;
        }
        *self
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(series_key(name, labels))
            .or_insert(0) += value;
    }

    fn histogram(&self, name: &str, value: f64, labels: Labels<'_>) {
        if !self.admit(name, labels) {
            return;
        }
        self.histograms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(series_key(name, labels))
            .or_default()
            .push(value);
    }
}
