use std::collections::HashSet;

use crate::config::ThresholdConfig;
use crate::model::{FieldType, NormalizedValue};

/// Outcome of comparing two normalized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// Fuzzy-equal but not exactly equal.
    Approx,
    NoMatch,
}

/// Exact equality of normalized values. Canonical-empty never matches,
/// not even another canonical-empty value.
pub fn equal(field_type: FieldType, a: &NormalizedValue, b: &NormalizedValue) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    match field_type {
        FieldType::KeywordList => keyword_set(a) == keyword_set(b),
        _ => a == b,
    }
}

/// Fuzzy equality. Only `title` and `author_list` use similarity; every other
/// type degrades to [`equal`].
pub fn fuzzy_equal(
    field_type: FieldType,
    a: &NormalizedValue,
    b: &NormalizedValue,
    thresholds: &ThresholdConfig,
) -> bool {
    if equal(field_type, a, b) {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    match field_type {
        FieldType::Title => similarity(a.as_str(), b.as_str()) >= thresholds.title,
        FieldType::AuthorList => similarity(a.as_str(), b.as_str()) >= thresholds.author_list,
        _ => false,
    }
}

/// Classify a pair as exact, approximate, or no match.
pub fn compare(
    field_type: FieldType,
    a: &NormalizedValue,
    b: &NormalizedValue,
    thresholds: &ThresholdConfig,
) -> MatchKind {
    if equal(field_type, a, b) {
        MatchKind::Exact
    } else if fuzzy_equal(field_type, a, b, thresholds) {
        MatchKind::Approx
    } else {
        MatchKind::NoMatch
    }
}

fn keyword_set(v: &NormalizedValue) -> HashSet<String> {
    v.as_str()
        .split(';')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Ratcliff/Obershelp similarity `2·M / (|a| + |b|)` over the lower-cased
/// alphanumeric characters of both strings. Returns 0.0 when either side has
/// no alphanumeric characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = comparable_chars(a);
    let b = comparable_chars(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = matching_chars(&a, &b);
    (2 * matches) as f64 / (a.len() + b.len()) as f64
}

fn comparable_chars(s: &str) -> Vec<char> {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Total length of matching blocks: longest common substring, then recurse
/// on the unmatched pieces to its left and right.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, alo, ahi, b, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    total
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`, earliest in `a`
/// then earliest in `b` on ties. Returns `(start_a, start_b, len)`.
fn longest_match(
    a: &[char],
    alo: usize,
    ahi: usize,
    b: &[char],
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            curr[col] = if a[i] == b[j] { prev[col - 1] + 1 } else { 0 };
            let k = curr[col];
            if k > best_k {
                best_i = i + 1 - k;
                best_j = j + 1 - k;
                best_k = k;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    (best_i, best_j, best_k)
}
