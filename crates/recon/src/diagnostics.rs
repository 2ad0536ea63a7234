//! Corpus-level diagnostics over the raw vote maps: how often each method
//! came back empty, and how often it agreed with the anchor.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use serde::Serialize;

use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::matcher::{compare, MatchKind};
use crate::model::{RawValue, RecordVotes};
use crate::normalize::normalize;

/// `method × field -> count` table. Every (method, field) cell is present,
/// zero-filled, so serialized tables are rectangular.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Matrix {
    pub methods: Vec<String>,
    pub fields: Vec<String>,
    pub counts: BTreeMap<String, BTreeMap<String, usize>>,
}

impl Matrix {
    fn zeroed(methods: &BTreeSet<String>, fields: &[String]) -> Self {
        let counts = methods
            .iter()
            .map(|m| (m.clone(), fields.iter().map(|f| (f.clone(), 0)).collect()))
            .collect();
        Self {
            methods: methods.iter().cloned().collect(),
            fields: fields.to_vec(),
            counts,
        }
    }

    fn bump(&mut self, method: &str, field: &str) {
        if let Some(cell) = self.counts.get_mut(method).and_then(|row| row.get_mut(field)) {
            *cell += 1;
        }
    }

    pub fn get(&self, method: &str, field: &str) -> usize {
        self.counts
            .get(method)
            .and_then(|row| row.get(field))
            .copied()
            .unwrap_or(0)
    }

    /// Write as CSV: header `method,<field>...`, one row per method.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), ReconError> {
        let mut wtr = csv::Writer::from_writer(out);
        let mut header = vec!["method".to_string()];
        header.extend(self.fields.iter().cloned());
        wtr.write_record(&header)?;
        for method in &self.methods {
            let mut row = vec![method.clone()];
            row.extend(self.fields.iter().map(|f| self.get(method, f).to_string()));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Exact and approximate agreement with the anchor method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchCounts {
    pub exact: Matrix,
    pub approx: Matrix,
}

/// All three diagnostic tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub records: usize,
    pub null_rate: Matrix,
    pub exact: Matrix,
    pub approx: Matrix,
}

fn methods_seen(records: &[RecordVotes]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|r| r.votes.values())
        .flat_map(|votes| votes.keys().cloned())
        .collect()
}

fn field_names(config: &ReconConfig) -> Vec<String> {
    config.fields.keys().cloned().collect()
}

/// Count canonical-empty votes per (method, field). A method that voted in
/// the corpus but not for a given record/field counts as null there.
pub fn null_rate_matrix(records: &[RecordVotes], config: &ReconConfig) -> Matrix {
    let methods = methods_seen(records);
    let fields = field_names(config);
    let mut matrix = Matrix::zeroed(&methods, &fields);
    let absent = RawValue::Absent;

    for record in records {
        for (field, &field_type) in &config.fields {
            let votes = record.field_votes(field);
            for method in &methods {
                let raw = votes.and_then(|v| v.get(method)).unwrap_or(&absent);
                if normalize(field_type, raw).is_empty() {
                    matrix.bump(method, field);
                }
            }
        }
    }
    matrix
}

/// Per (method, field): records where the method's value equals the anchor's
/// (exact) or only fuzzy-matches it (approx). Records where either side is
/// empty are skipped. The anchor itself is not a row.
pub fn match_counts(records: &[RecordVotes], anchor: &str, config: &ReconConfig) -> MatchCounts {
    let mut methods = methods_seen(records);
    methods.remove(anchor);
    let fields = field_names(config);
    let mut exact = Matrix::zeroed(&methods, &fields);
    let mut approx = Matrix::zeroed(&methods, &fields);

    for record in records {
        for (field, &field_type) in &config.fields {
            let Some(votes) = record.field_votes(field) else {
                continue;
            };
            let Some(anchor_raw) = votes.get(anchor) else {
                continue;
            };
            let anchor_value = normalize(field_type, anchor_raw);
            if anchor_value.is_empty() {
                continue;
            }
            for (method, raw) in votes {
                if method == anchor {
                    continue;
                }
                let value = normalize(field_type, raw);
                match compare(field_type, &value, &anchor_value, &config.thresholds) {
                    MatchKind::Exact => exact.bump(method, field),
                    MatchKind::Approx => approx.bump(method, field),
                    MatchKind::NoMatch => {}
                }
            }
        }
    }
    MatchCounts { exact, approx }
}

/// Build every diagnostic table for a corpus.
pub fn report(records: &[RecordVotes], config: &ReconConfig) -> Diagnostics {
    let MatchCounts { exact, approx } = match_counts(records, &config.policy.anchor, config);
    Diagnostics {
        records: records.len(),
        null_rate: null_rate_matrix(records, config),
        exact,
        approx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordId;

    fn corpus() -> Vec<RecordVotes> {
        vec![
            RecordVotes::new(RecordId::from("r1"))
                .with_vote("doi", "llm", "10.1/AAA")
                .with_vote("doi", "crossref", "https://doi.org/10.1/aaa")
                .with_vote("doi", "grobid", "")
                .with_vote("title", "llm", "Nurse staffing and patient outcomes")
                .with_vote("title", "grobid", "Nurse staffing and patient outcome")
                .with_vote("title", "crossref", "Something else"),
            RecordVotes::new(RecordId::from("r2"))
                .with_vote("doi", "llm", "10.2/bbb")
                .with_vote("doi", "crossref", "10.2/bbb")
                .with_vote("doi", "grobid", "null")
                .with_vote("title", "llm", ""),
        ]
    }

    #[test]
    fn null_rate_counts_empty_and_missing_votes() {
        let m = null_rate_matrix(&corpus(), &ReconConfig::default());
        assert_eq!(m.methods, vec!["crossref", "grobid", "llm"]);
        assert_eq!(m.get("grobid", "doi"), 2);
        assert_eq!(m.get("crossref", "doi"), 0);
        // r2 has no crossref title vote at all, and llm's is empty.
        assert_eq!(m.get("crossref", "title"), 1);
        assert_eq!(m.get("llm", "title"), 1);
        // Fields nobody voted on are null for every method.
        assert_eq!(m.get("llm", "year"), 2);
    }

    #[test]
    fn match_counts_split_exact_and_approx() {
        let counts = match_counts(&corpus(), "llm", &ReconConfig::default());
        assert!(!counts.exact.methods.contains(&"llm".to_string()));
        assert_eq!(counts.exact.get("crossref", "doi"), 2);
        assert_eq!(counts.exact.get("grobid", "doi"), 0);
        assert_eq!(counts.approx.get("grobid", "title"), 1);
        assert_eq!(counts.exact.get("grobid", "title"), 0);
        assert_eq!(counts.approx.get("crossref", "title"), 0);
    }

    #[test]
    fn matrix_csv_is_rectangular() {
        let m = null_rate_matrix(&corpus(), &ReconConfig::default());
        let mut buf = Vec::new();
        m.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + m.methods.len());
        assert!(lines[0].starts_with("method,"));
        let width = lines[0].split(',').count();
        assert!(lines.iter().all(|l| l.split(',').count() == width));
    }

    #[test]
    fn report_serializes_to_json() {
        let d = report(&corpus(), &ReconConfig::default());
        assert_eq!(d.records, 2);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["exact"]["counts"]["crossref"]["doi"], 2);
        assert_eq!(json["null_rate"]["counts"]["grobid"]["doi"], 2);
    }
}
