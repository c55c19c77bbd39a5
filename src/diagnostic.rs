//! Near-miss hints for rules that did not match.
//!
//! When a required literal rule fails, the usual cause is drift: the target
//! file was regenerated and the fragment changed slightly. Pointing at the
//! closest line in the document makes that visible.

use crate::rule::Matcher;

/// Lines scoring below this are not worth showing.
const MIN_SIMILARITY: f64 = 0.6;

/// The document line most similar to the first line of a matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMiss {
    /// 1-based line number in the document
    pub line: usize,
    /// Normalized Levenshtein similarity in `[0, 1]`
    pub similarity: f64,
    pub text: String,
}

/// Find the line in `document` closest to the first non-blank line of a
/// literal matcher. Pattern matchers have no meaningful text to compare and
/// yield `None`.
pub fn near_miss(document: &str, matcher: &Matcher) -> Option<NearMiss> {
    let Matcher::Literal(search) = matcher else {
        return None;
    };
    let needle = search.lines().map(str::trim).find(|l| !l.is_empty())?;

    document
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| NearMiss {
            line: idx + 1,
            similarity: strsim::normalized_levenshtein(needle, line.trim()),
            text: line.trim().to_string(),
        })
        .filter(|candidate| candidate.similarity >= MIN_SIMILARITY)
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
}
