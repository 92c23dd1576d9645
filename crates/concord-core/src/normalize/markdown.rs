//! Markdown normalization with code protection.
//!
//! Fenced blocks and inline code spans are swapped for content-hash
//! placeholders before any structural rewrite, so a change inside code can
//! never be hidden by formatting normalization.

use lazy_static::lazy_static;
use regex::Regex;

use super::collapse_whitespace;
use crate::fingerprint::sha256_hex;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

lazy_static! {
    static ref INLINE_CODE: Regex = Regex::new(r"``[^`\n](?:[^\n]*?[^`\n])?``|`[^`\n]+`").unwrap();
    static ref ATX_HEADING: Regex = Regex::new(r"^(#{1,6})[ \t]+(.*?)(?:[ \t]+#+)*[ \t]*$").unwrap();
    static ref BULLET: Regex = Regex::new(r"^(\s*)[*+][ \t]+").unwrap();
    static ref STRONG_UNDERSCORE: Regex = Regex::new(r"\b__([^_\n]+)__\b").unwrap();
    static ref HEADING_MARKER: Regex = Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").unwrap();
    static ref HEADING_TRAILER: Regex = Regex::new(r"(?m)(?:[ \t]+#+)+[ \t]*$").unwrap();
    static ref BLOCKQUOTE: Regex = Regex::new(r"(?m)^[ \t]*>[ \t]?").unwrap();
    static ref LIST_MARKER: Regex = Regex::new(r"(?m)^([ \t]*)[-*+][ \t]+").unwrap();
    static ref LINK: Regex = Regex::new(r"!?\[([^\]\n]*)\]\(([^)\s]*)(?:\s+[^)]*)?\)").unwrap();
    static ref STRONG: Regex = Regex::new(r"(\*\*|__)([^\n]+?)(\*\*|__)").unwrap();
    static ref EMPHASIS_STAR: Regex = Regex::new(r"\*([^*\n]+)\*").unwrap();
    static ref EMPHASIS_UNDERSCORE: Regex = Regex::new(r"(^|[^\w])_([^_\n]+)_([^\w]|$)").unwrap();
    static ref STRIKE: Regex = Regex::new(r"~~([^~\n]+)~~").unwrap();
}

/// Text with code replaced by placeholders, plus what to put back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedText {
    pub text: String,
    spans: Vec<(String, String)>,
}

impl ProtectedText {
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Swaps placeholders in `text` back for the original code.
    pub fn restore(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (placeholder, original) in &self.spans {
            out = out.replacen(placeholder.as_str(), original, 1);
        }
        out
    }
}

fn placeholder(idx: usize, code: &str) -> String {
    let hash = sha256_hex(code);
    format!("{PLACEHOLDER_OPEN}{idx}:{}{PLACEHOLDER_CLOSE}", &hash[..12])
}

fn fence_marker(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let first = trimmed.chars().next()?;
    if first != '`' && first != '~' {
        return None;
    }
    let run: String = trimmed.chars().take_while(|c| *c == first).collect();
    (run.len() >= 3).then_some(run)
}

fn closes_fence(line: &str, marker: &str) -> bool {
    let t = line.trim();
    let Some(first) = marker.chars().next() else {
        return false;
    };
    t.len() >= marker.len() && t.chars().all(|c| c == first)
}

/// Replaces fenced blocks and inline code spans with placeholders.
///
/// An unclosed fence protects everything up to the end of the input.
pub fn protect_code_spans(input: &str) -> ProtectedText {
    let mut spans: Vec<(String, String)> = Vec::new();
    let mut out = String::with_capacity(input.len());
    let mut fence: Option<(String, String)> = None;

    let push_block = |buf: &str, out: &mut String, spans: &mut Vec<(String, String)>| {
        let (body, tail) = match buf.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (buf, ""),
        };
        let ph = placeholder(spans.len(), body);
        out.push_str(&ph);
        out.push_str(tail);
        spans.push((ph, body.to_string()));
    };

    for line in input.split_inclusive('\n') {
        match fence.as_mut() {
            Some((marker, buf)) => {
                buf.push_str(line);
                if closes_fence(line, marker) {
                    let block = std::mem::take(buf);
                    fence = None;
                    push_block(&block, &mut out, &mut spans);
                }
            }
            None => {
                if let Some(marker) = fence_marker(line) {
                    fence = Some((marker, line.to_string()));
                } else {
                    protect_inline(line, &mut out, &mut spans);
                }
            }
        }
    }
    if let Some((_, buf)) = fence {
        push_block(&buf, &mut out, &mut spans);
    }

    ProtectedText { text: out, spans }
}

fn protect_inline(line: &str, out: &mut String, spans: &mut Vec<(String, String)>) {
    let mut last = 0;
    for m in INLINE_CODE.find_iter(line) {
        out.push_str(&line[last..m.start()]);
        let ph = placeholder(spans.len(), m.as_str());
        out.push_str(&ph);
        spans.push((ph, m.as_str().to_string()));
        last = m.end();
    }
    out.push_str(&line[last..]);
}

/// Removes heading, emphasis, list, quote and link syntax for comparison.
///
/// Code stays as hash placeholders (never restored), so two documents only
/// compare equal when their code is byte-identical.
pub fn strip_markdown(input: &str) -> String {
    let protected = protect_code_spans(&super::normalize_newlines(input));
    let mut s = protected.text;
    s = HEADING_MARKER.replace_all(&s, "").into_owned();
    s = HEADING_TRAILER.replace_all(&s, "").into_owned();
    s = BLOCKQUOTE.replace_all(&s, "").into_owned();
    s = LIST_MARKER.replace_all(&s, "${1}- ").into_owned();
    s = LINK.replace_all(&s, "$1 ($2)").into_owned();
    s = STRONG.replace_all(&s, "$2").into_owned();
    s = EMPHASIS_STAR.replace_all(&s, "$1").into_owned();
    s = EMPHASIS_UNDERSCORE.replace_all(&s, "$1$2$3").into_owned();
    s = STRIKE.replace_all(&s, "$1").into_owned();
    collapse_whitespace(&s)
}

/// Rewrites markdown into one canonical spelling. A fixed point.
///
/// ATX headings get a single space and no closing hashes, `*`/`+` bullets
/// become `-`, `__strong__` becomes `**strong**`, trailing spaces and
/// blank-line runs are collapsed, and the file ends with one newline.
pub fn normalize_markdown(input: &str) -> String {
    let protected = protect_code_spans(&super::normalize_newlines(input));
    let mut lines: Vec<String> = Vec::new();
    let mut prev_blank = false;

    for raw in protected.text.split('\n') {
        let mut line = raw.trim_end().to_string();
        if let Some(caps) = ATX_HEADING.captures(&line) {
            line = format!("{} {}", &caps[1], caps[2].trim());
            line.truncate(line.trim_end().len());
        }
        line = BULLET.replace(&line, "${1}- ").into_owned();
        line = STRONG_UNDERSCORE.replace_all(&line, "**$1**").into_owned();

        let blank = line.is_empty();
        if blank && prev_blank {
            continue;
        }
        prev_blank = blank;
        lines.push(line);
    }

    let mut body = lines.join("\n");
    let kept = body.trim_matches('\n').len();
    let leading = body.len() - body.trim_start_matches('\n').len();
    body = body[leading..leading + kept].to_string();
    if !body.is_empty() {
        body.push('\n');
    }
    protected.restore(&body)
}
