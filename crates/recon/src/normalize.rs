//! Field normalization: raw extracted values to canonical comparable forms.
//!
//! `normalize` is total. Absent, literal-null and malformed input all map to
//! the canonical-empty value, and every output is a fixed point
//! (`normalize(t, normalize(t, x)) == normalize(t, x)`).

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::model::{FieldType, NormalizedValue, RawValue, VoteMap};

static DOI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(dx\.)?doi\.org/").expect("static regex"));
static KEYWORD_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;,/|]").expect("static regex"));
static AUTHOR_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";|,|&|\band\b").expect("static regex"));
static AUTHOR_ITEM_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";|&|\band\b").expect("static regex"));
static NON_ALPHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{Alphabetic} ]+").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Literal strings extractors emit in place of "no value".
const NULL_LITERALS: &[&str] = &["null", "none", "nan", "[missing]"];

/// ISO 3166 alpha-2 codes (plus the common `uk`) seen in nursing literature.
const COUNTRY_CODES: &[(&str, &str)] = &[
    ("au", "Australia"),
    ("ca", "Canada"),
    ("cn", "China"),
    ("de", "Germany"),
    ("fr", "France"),
    ("gb", "United Kingdom"),
    ("ie", "Ireland"),
    ("in", "India"),
    ("jp", "Japan"),
    ("nl", "Netherlands"),
    ("nz", "New Zealand"),
    ("se", "Sweden"),
    ("sg", "Singapore"),
    ("uk", "United Kingdom"),
    ("us", "United States"),
    ("za", "South Africa"),
];

const LIST_JOIN: &str = "; ";

/// Canonicalize a raw value for a field type.
pub fn normalize(field_type: FieldType, raw: &RawValue) -> NormalizedValue {
    let pieces: Vec<&str> = match raw {
        RawValue::Absent => return NormalizedValue::empty(),
        RawValue::Malformed(shape) => {
            warn!(%field_type, value = %shape, "normalization anomaly: unexpected value shape");
            return NormalizedValue::empty();
        }
        RawValue::Text(s) => vec![s.as_str()],
        RawValue::List(items) => items.iter().map(String::as_str).collect(),
    };

    if pieces.iter().all(|p| is_null_literal(p)) {
        return NormalizedValue::empty();
    }

    let out = match field_type {
        FieldType::Doi => normalize_doi(&pieces.join(LIST_JOIN)),
        FieldType::KeywordList => normalize_keywords(&pieces),
        FieldType::AuthorList => match raw {
            RawValue::List(_) => normalize_authors(&pieces, &AUTHOR_ITEM_SPLIT),
            _ => normalize_authors(&pieces, &AUTHOR_SPLIT),
        },
        FieldType::CountryList => normalize_countries(&pieces),
        FieldType::Title | FieldType::Year | FieldType::SourceJournal | FieldType::StudyType => {
            normalize_scalar(&pieces.join(LIST_JOIN))
        }
    };
    NormalizedValue::new(out)
}

/// Normalize every vote of a field. Methods with canonical-empty values are kept
/// so callers can tell "voted nothing useful" from "did not vote".
pub fn normalize_votes(field_type: FieldType, votes: &VoteMap) -> BTreeMap<String, NormalizedValue> {
    votes
        .iter()
        .map(|(method, raw)| (method.clone(), normalize(field_type, raw)))
        .collect()
}

fn is_null_literal(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || NULL_LITERALS.iter().any(|lit| t.eq_ignore_ascii_case(lit))
}

fn normalize_scalar(s: &str) -> String {
    let t = s.trim();
    if is_null_literal(t) {
        String::new()
    } else {
        t.to_string()
    }
}

fn normalize_doi(s: &str) -> String {
    let mut doi: String = s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
    // Doubled prefixes ("https://doi.org/https://doi.org/...") occur in registry output.
    while let Some(m) = DOI_PREFIX.find(&doi) {
        doi = doi[m.end()..].to_string();
    }
    if is_null_literal(&doi) {
        String::new()
    } else {
        doi
    }
}

fn normalize_keywords(pieces: &[&str]) -> String {
    let tokens = pieces
        .iter()
        .flat_map(|p| KEYWORD_SPLIT.split(p))
        .map(str::trim)
        .filter(|t| !is_null_literal(t));
    let mut uniq = dedupe_case_insensitive(tokens);
    uniq.sort_by_key(|k| k.to_lowercase());
    uniq.join(LIST_JOIN)
}

fn normalize_authors(pieces: &[&str], split: &Regex) -> String {
    let names = pieces
        .iter()
        .flat_map(|p| split.split(p))
        .map(|name| {
            let no_commas = name.replace(',', " ");
            WHITESPACE.replace_all(&no_commas, " ").trim().to_string()
        })
        .filter(|name| !is_null_literal(name));
    dedupe_case_insensitive(names).join(LIST_JOIN)
}

fn normalize_countries(pieces: &[&str]) -> String {
    let names = pieces.iter().flat_map(|p| p.split(';')).filter_map(|token| {
        let letters = NON_ALPHA.replace_all(token, "");
        let cleaned = WHITESPACE.replace_all(&letters, " ").trim().to_string();
        if is_null_literal(&cleaned) {
            return None;
        }
        let lower = cleaned.to_lowercase();
        let mapped = COUNTRY_CODES
            .iter()
            .find(|(code, _)| *code == lower)
            .map(|(_, name)| (*name).to_string());
        Some(mapped.unwrap_or(cleaned))
    });
    dedupe_case_insensitive(names).join(LIST_JOIN)
}

/// Keep the first casing seen for each case-insensitive token, in input order.
fn dedupe_case_insensitive<I, S>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokens {
        let token = token.into();
        if seen.insert(token.to_lowercase()) {
            out.push(token);
        }
    }
    out
}
