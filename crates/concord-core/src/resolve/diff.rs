//! Line-level structural diff used by transform previews.

use similar::{DiffTag, TextDiff};

use crate::errors::ConcordResult;
use crate::model::{ArtifactType, Diff, DiffClassification, Hunk, HunkOp, Span};

/// Inputs for [`line_diff`] that are not the contents themselves.
#[derive(Debug, Clone)]
pub struct LineDiffOptions<'a> {
    pub source_artifact_id: &'a str,
    pub target_artifact_id: &'a str,
    pub artifact_type: ArtifactType,
    pub classification: DiffClassification,
    pub context_lines: usize,
}

/// Aligns `before` and `after` line by line.
///
/// Each non-equal op becomes one hunk carrying up to `context_lines` of
/// surrounding source text as anchors. A deleted block that reappears
/// verbatim as an inserted block elsewhere is folded into a single move.
pub fn line_diff(before: &str, after: &str, opts: &LineDiffOptions<'_>) -> ConcordResult<Diff> {
    let text_diff = TextDiff::from_lines(before, after);
    let old_lines = text_diff.old_slices();
    let new_lines = text_diff.new_slices();

    let mut hunks = Vec::new();
    let mut equal_lines = 0usize;

    for op in text_diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        let hunk_op = match tag {
            DiffTag::Equal => {
                equal_lines += old_range.len();
                continue;
            }
            DiffTag::Delete => HunkOp::Delete,
            DiffTag::Insert => HunkOp::Insert,
            DiffTag::Replace => HunkOp::Replace,
        };

        let ctx_start = old_range.start.saturating_sub(opts.context_lines);
        let ctx_end = (old_range.end + opts.context_lines).min(old_lines.len());
        let before_ctx = old_lines[ctx_start..old_range.start].concat();
        let after_ctx = old_lines[old_range.end..ctx_end].concat();

        hunks.push(
            Hunk::new(
                hunk_op,
                Span::new(old_range.start, old_range.len()),
                Span::new(new_range.start, new_range.len()),
            )
            .with_content(
                old_lines[old_range.clone()].concat(),
                new_lines[new_range.clone()].concat(),
            )
            .with_context(non_empty(before_ctx), non_empty(after_ctx)),
        );
    }

    let hunks = fold_moves(hunks);
    let total_lines = old_lines.len() + new_lines.len();
    let builder = Diff::builder(
        opts.source_artifact_id,
        opts.target_artifact_id,
        opts.artifact_type,
    )
    .classification(opts.classification);

    if hunks.is_empty() {
        return builder.build();
    }
    let similarity = if total_lines == 0 {
        0.0
    } else {
        (2 * equal_lines) as f64 / total_lines as f64
    };
    builder
        .hunks(hunks)
        .similarity(similarity.min(1.0 - f64::EPSILON))
        .build()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Pairs each delete with the first later-unclaimed insert of identical text.
fn fold_moves(hunks: Vec<Hunk>) -> Vec<Hunk> {
    let mut claimed = vec![false; hunks.len()];
    let mut moves: Vec<(usize, Hunk)> = Vec::new();

    for (di, del) in hunks.iter().enumerate() {
        if del.op != HunkOp::Delete || del.source_content.trim().is_empty() || claimed[di] {
            continue;
        }
        let partner = hunks.iter().enumerate().position(|(ii, ins)| {
            !claimed[ii] && ins.op == HunkOp::Insert && ins.target_content == del.source_content
        });
        if let Some(ii) = partner {
            claimed[di] = true;
            claimed[ii] = true;
            let ins = &hunks[ii];
            let mv = Hunk::new(HunkOp::Move, del.source_span, ins.target_span)
                .with_content(del.source_content.clone(), ins.target_content.clone())
                .with_context(del.context_before.clone(), del.context_after.clone());
            moves.push((di.min(ii), mv));
        }
    }

    let mut out: Vec<Hunk> = Vec::with_capacity(hunks.len());
    for (idx, hunk) in hunks.into_iter().enumerate() {
        if let Some(pos) = moves.iter().position(|(at, _)| *at == idx) {
            out.push(moves.remove(pos).1);
        }
        if !claimed[idx] {
            out.push(hunk);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> LineDiffOptions<'static> {
        LineDiffOptions {
            source_artifact_id: "a",
            target_artifact_id: "b",
            artifact_type: ArtifactType::Text,
            classification: DiffClassification::Formatting,
            context_lines: 1,
        }
    }

    #[test]
    fn identical_text_has_no_hunks() {
        let d = line_diff("x\ny\n", "x\ny\n", &opts()).unwrap();
        assert_eq!(d.total_changes(), 0);
        assert_eq!(d.similarity_score(), 1.0);
        assert!(!d.is_significant());
    }

    #[test]
    fn replace_carries_context_anchors() {
        let d = line_diff("one\ntwo\nthree\n", "one\n2\nthree\n", &opts()).unwrap();
        assert_eq!(d.hunks().len(), 1);
        let h = &d.hunks()[0];
        assert_eq!(h.op, HunkOp::Replace);
        assert_eq!(h.source_content, "two\n");
        assert_eq!(h.target_content, "2\n");
        assert_eq!(h.context_before.as_deref(), Some("one\n"));
        assert_eq!(h.context_after.as_deref(), Some("three\n"));
        assert!(d.similarity_score() < 1.0);
        assert!(d.is_significant());
    }

    #[test]
    fn relocated_block_is_one_move() {
        let before = "alpha\nbeta\ngamma\ndelta\n";
        let after = "beta\ngamma\ndelta\nalpha\n";
        let d = line_diff(before, after, &opts()).unwrap();
        assert_eq!(d.changes().moves, 1);
        assert_eq!(d.changes().insertions + d.changes().deletions, 0);
        let mv = &d.hunks()[0];
        assert_eq!(mv.source_content, "alpha\n");
        assert_eq!(mv.target_span.start, 3);
    }

    #[test]
    fn trailing_newline_difference_is_a_change() {
        let d = line_diff("a", "a\n", &opts()).unwrap();
        assert!(d.total_changes() > 0);
    }
}
