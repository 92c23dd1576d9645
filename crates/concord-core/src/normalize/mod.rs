//! Text normalization primitives shared by detectors and transforms.
//!
//! Detectors compare normalized forms; transforms write them back. Keeping
//! one implementation guarantees that whatever a detector calls "noise" is
//! exactly what the matching transform removes.

pub mod markdown;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

pub use markdown::{normalize_markdown, protect_code_spans, strip_markdown, ProtectedText};

/// Zero-width characters that render as nothing.
pub const ZERO_WIDTH_CHARS: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Non-breaking spaces that render like a plain space.
pub const NBSP_CHARS: [char; 3] = ['\u{00A0}', '\u{202F}', '\u{2007}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EolStyle {
    None,
    Lf,
    Crlf,
    Cr,
    Mixed,
}

impl EolStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lf => "lf",
            Self::Crlf => "crlf",
            Self::Cr => "cr",
            Self::Mixed => "mixed",
        }
    }
}

/// Detects which line-ending convention `s` uses.
pub fn eol_style(s: &str) -> EolStyle {
    let bytes = s.as_bytes();
    let (mut lf, mut crlf, mut cr) = (0usize, 0usize, 0usize);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                crlf += 1;
                i += 1;
            }
            b'\r' => cr += 1,
            b'\n' => lf += 1,
            _ => {}
        }
        i += 1;
    }
    match (lf > 0, crlf > 0, cr > 0) {
        (false, false, false) => EolStyle::None,
        (true, false, false) => EolStyle::Lf,
        (false, true, false) => EolStyle::Crlf,
        (false, false, true) => EolStyle::Cr,
        _ => EolStyle::Mixed,
    }
}

/// CRLF and lone CR become LF.
pub fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Newlines normalized and exactly one trailing newline (none for empty input).
pub fn normalize_newlines_with_trailing(s: &str) -> String {
    let mut out = normalize_newlines(s);
    let trimmed_len = out.trim_end_matches('\n').len();
    out.truncate(trimmed_len);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Collapses horizontal whitespace runs, strips trailing spaces, collapses
/// blank-line runs and trims the whole text.
pub fn collapse_whitespace(s: &str) -> String {
    let normalized = normalize_newlines(s);
    let mut lines: Vec<String> = Vec::new();
    let mut prev_blank = false;
    for line in normalized.split('\n') {
        let collapsed = collapse_horizontal(line);
        let blank = collapsed.is_empty();
        if blank && prev_blank {
            continue;
        }
        prev_blank = blank;
        lines.push(collapsed);
    }
    lines.join("\n").trim().to_string()
}

/// [`collapse_whitespace`] with a single trailing newline; a fixed point.
pub fn collapse_whitespace_with_trailing(s: &str) -> String {
    let mut out = collapse_whitespace(s);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn collapse_horizontal(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if is_horizontal_space(c) {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out.truncate(out.trim_end().len());
    out
}

fn is_horizontal_space(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\u{000B}' || c == '\u{000C}'
}

/// Canonical composition (NFC).
pub fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// NFC, zero-width characters dropped, non-breaking spaces made plain.
pub fn normalize_unicode(s: &str) -> String {
    s.nfc()
        .filter(|c| !ZERO_WIDTH_CHARS.contains(c))
        .map(|c| if NBSP_CHARS.contains(&c) { ' ' } else { c })
        .collect()
}

pub fn count_zero_width(s: &str) -> usize {
    s.chars().filter(|c| ZERO_WIDTH_CHARS.contains(c)).count()
}

pub fn count_nbsp(s: &str) -> usize {
    s.chars().filter(|c| NBSP_CHARS.contains(c)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eol_styles() {
        assert_eq!(eol_style("a"), EolStyle::None);
        assert_eq!(eol_style("a\nb\n"), EolStyle::Lf);
        assert_eq!(eol_style("a\r\nb\r\n"), EolStyle::Crlf);
        assert_eq!(eol_style("a\rb"), EolStyle::Cr);
        assert_eq!(eol_style("a\r\nb\n"), EolStyle::Mixed);
    }

    #[test]
    fn newline_normalization() {
        assert_eq!(normalize_newlines("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(normalize_newlines_with_trailing("a\r\n\r\n\r\n"), "a\n");
        assert_eq!(normalize_newlines_with_trailing("a"), "a\n");
        assert_eq!(normalize_newlines_with_trailing(""), "");
    }

    #[test]
    fn whitespace_collapse_matches_reference_pair() {
        assert_eq!(
            collapse_whitespace("Hello,   world!\n  \n"),
            collapse_whitespace("Hello, world!\n")
        );
        assert_eq!(collapse_whitespace("a\t\tb  \n\n\n\nc"), "a b\n\nc");
    }

    #[test]
    fn whitespace_collapse_is_a_fixed_point() {
        let inputs = ["  x  y \r\n\r\n\r\n z\t", "", "\n\n", "a"];
        for input in inputs {
            let once = collapse_whitespace_with_trailing(input);
            assert_eq!(collapse_whitespace_with_trailing(&once), once);
        }
    }

    #[test]
    fn unicode_normalization_composes_and_strips_invisibles() {
        let decomposed = "e\u{0301}";
        assert_eq!(nfc(decomposed), "\u{00E9}");
        assert_eq!(normalize_unicode("a\u{200B}b\u{00A0}c"), "ab c");
        assert_eq!(count_zero_width("a\u{200B}\u{FEFF}"), 2);
        assert_eq!(count_nbsp("\u{00A0}\u{202F}"), 2);
    }
}
