use serde_json::json;
use similar::TextDiff;

use super::lexer;
use crate::canonical;
use crate::model::{EvaluationMethod, EvaluationResult};

pub(crate) fn exact_impl(a: &str, b: &str) -> EvaluationResult {
    if a == b {
        EvaluationResult::new(EvaluationMethod::Exact, true, 1.0, 1.0, "byte-identical")
    } else {
        EvaluationResult::new(EvaluationMethod::Exact, false, 0.0, 0.0, "contents differ")
    }
}

pub(crate) fn canonical_json_impl(a: &str, b: &str) -> EvaluationResult {
    let method = EvaluationMethod::CanonicalJson;
    let ca = match canonical::try_canonicalize_str(a) {
        Ok(c) => c,
        Err(e) => return parse_failure(method, "source", &e),
    };
    let cb = match canonical::try_canonicalize_str(b) {
        Ok(c) => c,
        Err(e) => return parse_failure(method, "target", &e),
    };
    compare_normalized(method, &ca, &cb, "canonical JSON")
}

pub(crate) fn ast_normalized_impl(a: &str, b: &str) -> EvaluationResult {
    let method = EvaluationMethod::AstNormalized;
    let ta = match lexer::tokenize(a) {
        Ok(t) => t,
        Err(e) => return parse_failure(method, "source", &e),
    };
    let tb = match lexer::tokenize(b) {
        Ok(t) => t,
        Err(e) => return parse_failure(method, "target", &e),
    };
    if ta == tb {
        return EvaluationResult::new(method, true, 1.0, 1.0, "normalized token streams match")
            .with_meta("tokens", json!(ta.len()));
    }
    let sa: Vec<&str> = ta.iter().map(String::as_str).collect();
    let sb: Vec<&str> = tb.iter().map(String::as_str).collect();
    let ratio = f64::from(TextDiff::from_slices(&sa, &sb).ratio());
    EvaluationResult::new(
        method,
        false,
        1.0,
        ratio.min(1.0 - f64::EPSILON),
        "normalized token streams differ",
    )
    .with_meta("tokens", json!([ta.len(), tb.len()]))
}

fn compare_normalized(method: EvaluationMethod, a: &str, b: &str, label: &str) -> EvaluationResult {
    if a == b {
        return EvaluationResult::new(method, true, 1.0, 1.0, format!("{label} forms match"));
    }
    let ratio = f64::from(TextDiff::from_chars(a, b).ratio());
    EvaluationResult::new(
        method,
        false,
        1.0,
        ratio.min(1.0 - f64::EPSILON),
        format!("{label} forms differ"),
    )
}

fn parse_failure(method: EvaluationMethod, side: &str, err: &anyhow::Error) -> EvaluationResult {
    EvaluationResult::new(
        method,
        false,
        0.0,
        0.0,
        format!("{side} could not be parsed: {err:#}"),
    )
    .with_violation("parse_error")
    .with_meta("parse_error_side", json!(side))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_is_all_or_nothing() {
        let same = exact_impl("a", "a");
        assert!(same.equivalent);
        assert_eq!(same.confidence, 1.0);
        let diff = exact_impl("a", "a ");
        assert!(!diff.equivalent);
        assert_eq!(diff.confidence, 0.0);
    }

    #[test]
    fn canonical_json_ignores_order_and_layout() {
        let r = canonical_json_impl(r#"{"b": 2, "a": 1}"#, "{\n \"a\": 1,\n \"b\": 2\n}");
        assert!(r.equivalent);
        let r = canonical_json_impl(r#"{"a": 1}"#, r#"{"a": 2}"#);
        assert!(!r.equivalent);
        assert!(r.similarity_score < 1.0);
    }

    #[test]
    fn parse_failure_names_the_error() {
        let r = canonical_json_impl("{broken", "{}");
        assert!(!r.equivalent);
        assert_eq!(r.confidence, 0.0);
        assert!(r.reasoning.contains("source could not be parsed"));
        assert_eq!(r.violations(), vec!["parse_error".to_string()]);
        assert!(!r.is_failed());
    }

    #[test]
    fn normalized_code_ignores_comments() {
        let r = ast_normalized_impl("let x = 1; // one", "let x=1;");
        assert!(r.equivalent);
        let r = ast_normalized_impl("let x = 1;", "let x = 2;");
        assert!(!r.equivalent);
        let r = ast_normalized_impl("f(", "f()");
        assert_eq!(r.violations(), vec!["parse_error".to_string()]);
    }
}
