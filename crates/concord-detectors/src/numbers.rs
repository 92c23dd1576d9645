//! Positional numeric literal extraction shared by the numeric detectors.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMBER: Regex = Regex::new(
        r"(?i)\b(?:nan|inf(?:inity)?)\b|-?(?:\d+\.?\d*|\.\d+)(?:e[+-]?\d+)?"
    )
    .unwrap();
}

const PLACEHOLDER: &str = "\u{E010}";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Extracted {
    /// Input with every literal replaced by one placeholder character.
    pub skeleton: String,
    pub values: Vec<f64>,
}

pub(crate) fn extract(s: &str) -> Extracted {
    let mut values = Vec::new();
    let mut skeleton = String::with_capacity(s.len());
    let mut last = 0;
    for m in NUMBER.find_iter(s) {
        let Some(value) = parse(m.as_str()) else {
            continue;
        };
        skeleton.push_str(&s[last..m.start()]);
        skeleton.push_str(PLACEHOLDER);
        values.push(value);
        last = m.end();
    }
    skeleton.push_str(&s[last..]);
    Extracted { skeleton, values }
}

fn parse(raw: &str) -> Option<f64> {
    let lower = raw.to_ascii_lowercase();
    match lower.trim_start_matches('-') {
        "nan" => Some(f64::NAN),
        "inf" | "infinity" => Some(if lower.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }),
        _ => raw.parse().ok(),
    }
}

/// Number pairs of two texts whose non-numeric skeletons are identical.
///
/// `None` when the skeletons or literal counts differ, i.e. the texts differ
/// in more than their numbers.
pub(crate) fn aligned_pairs(source: &str, target: &str) -> Option<Vec<(f64, f64)>> {
    let a = extract(source);
    let b = extract(target);
    if a.skeleton != b.skeleton || a.values.len() != b.values.len() || a.values.is_empty() {
        return None;
    }
    Some(a.values.into_iter().zip(b.values).collect())
}

/// Bitwise-equal, or both NaN.
pub(crate) fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Absolute or relative difference within tolerance. Non-finite values
/// are only ever "within" when identical.
pub(crate) fn within_epsilon(a: f64, b: f64, abs_tol: f64, rel_tol: f64) -> bool {
    if same(a, b) {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= abs_tol || diff <= rel_tol * a.abs().max(b.abs())
}

/// Distance between two doubles in units in the last place.
///
/// `None` for NaN or infinite inputs. `+0.0` and `-0.0` are zero apart.
pub(crate) fn ulp_distance(a: f64, b: f64) -> Option<u64> {
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    let ordered = |x: f64| -> i128 {
        let bits = x.to_bits() as i64;
        if bits < 0 {
            i128::from(i64::MIN) - i128::from(bits)
        } else {
            i128::from(bits)
        }
    };
    let d = (ordered(a) - ordered(b)).unsigned_abs();
    Some(u64::try_from(d).unwrap_or(u64::MAX))
}
