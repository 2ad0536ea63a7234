use std::collections::{BTreeMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReconConfig;
use crate::consensus::{resolve, Resolution};
use crate::error::ReconError;
use crate::ledger::ProvenanceLedger;
use crate::model::{Actor, Confidence, RawValue, RecordId, RecordVotes, VoteMap};
use crate::output::{rows_from_decisions, OutputRow, TableFormat};
use crate::review::{ReviewChoice, ReviewQueue, TranscriptEntry};

pub const LEDGER_FILE: &str = "ledger.jsonl";
pub const QUEUE_FILE: &str = "review_queue.json";
pub const TRANSCRIPT_FILE: &str = "review_transcript.jsonl";
pub const OUTPUT_STEM: &str = "reconciled";

// ============================================================================
// Run context
// ============================================================================

/// Config plus the artifact directory, built once by the caller and passed
/// down explicitly.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: ReconConfig,
    pub out_dir: PathBuf,
}

impl RunContext {
    pub fn new(config: ReconConfig, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            out_dir: out_dir.into(),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.out_dir.join(LEDGER_FILE)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.out_dir.join(QUEUE_FILE)
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.out_dir.join(TRANSCRIPT_FILE)
    }

    pub fn output_path(&self, format: TableFormat) -> PathBuf {
        self.out_dir.join(format!("{OUTPUT_STEM}.{}", format.extension()))
    }

    /// Reconciled field names in column order.
    pub fn field_names(&self) -> Vec<String> {
        self.config.fields.keys().cloned().collect()
    }
}

// ============================================================================
// Vote input
// ============================================================================

#[derive(Deserialize)]
struct VoteLine {
    #[serde(default)]
    record_id: Option<RecordId>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    votes: BTreeMap<String, serde_json::Value>,
}

/// A field's votes must be a `{method: value}` object. Any other shape is
/// logged and leaves the field with no votes, so it still gets decided.
fn field_vote_map(value: serde_json::Value, field: &str, line: usize) -> VoteMap {
    match value {
        serde_json::Value::Object(methods) => methods
            .into_iter()
            .map(|(method, raw)| (method, RawValue::from(raw)))
            .collect(),
        serde_json::Value::Null => VoteMap::new(),
        other => {
            warn!(field, line, value = %other, "vote map is not an object; field treated as having no votes");
            VoteMap::new()
        }
    }
}

/// Read JSON-lines vote input. Every configured field gets a vote map (empty
/// when the line had none); fields the config does not know are dropped.
pub fn load_vote_records<R: BufRead>(input: R, config: &ReconConfig) -> Result<Vec<RecordVotes>, ReconError> {
    let mut records = Vec::new();
    let mut seen: HashSet<RecordId> = HashSet::new();
    let mut unknown: HashSet<String> = HashSet::new();

    for (i, line) in input.lines().enumerate() {
        let line_no = i + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: VoteLine = serde_json::from_str(&line).map_err(|e| ReconError::InputParse {
            line: line_no,
            message: e.to_string(),
        })?;

        let record_id = match (parsed.record_id, &parsed.source) {
            (Some(id), _) => id,
            (None, Some(source)) => RecordId::from_path(source),
            (None, None) => {
                return Err(ReconError::InputParse {
                    line: line_no,
                    message: "record needs a record_id or a source path".into(),
                })
            }
        };
        if !seen.insert(record_id.clone()) {
            return Err(ReconError::InputParse {
                line: line_no,
                message: format!("duplicate record_id '{record_id}'"),
            });
        }

        let mut record = RecordVotes::new(record_id);
        record.source = parsed.source;
        for (field, votes) in parsed.votes {
            if config.fields.contains_key(&field) {
                let votes = field_vote_map(votes, &field, line_no);
                record.votes.insert(field, votes);
            } else if unknown.insert(field.clone()) {
                warn!(field = %field, line = line_no, "ignoring votes for unknown field");
            }
        }
        for field in config.fields.keys() {
            record.votes.entry(field.clone()).or_default();
        }
        records.push(record);
    }
    Ok(records)
}

pub fn load_vote_file(path: &Path, config: &ReconConfig) -> Result<Vec<RecordVotes>, ReconError> {
    let file = std::fs::File::open(path)?;
    load_vote_records(std::io::BufReader::new(file), config)
}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub records: usize,
    pub fields: usize,
    pub auto_consensus: usize,
    pub single_source: usize,
    pub human_resolved: usize,
    pub unresolved: usize,
    /// Ledger entries written by this run.
    pub ledger_appended: usize,
    /// Human decisions replaced because their votes changed.
    pub superseded: usize,
    /// field -> source method -> count of current decisions.
    pub sources: BTreeMap<String, BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub meta: RunMeta,
    pub summary: RunSummary,
    #[serde(skip)]
    pub rows: Vec<OutputRow>,
}

/// Resolve every field of every record, record the outcome in the ledger and
/// queue what needs a human.
///
/// Records are resolved in parallel; ledger writes happen afterwards in input
/// order so the chain is reproducible. A human decision is kept across
/// re-runs until the underlying votes change. An auto decision is kept only
/// while the same votes still resolve to it under the current config.
pub fn run(
    ctx: &RunContext,
    records: &[RecordVotes],
    ledger: &ProvenanceLedger,
    queue: &mut ReviewQueue,
) -> Result<RunResult, ReconError> {
    let config = &ctx.config;
    let run_at = Utc::now();
    let empty = VoteMap::new();

    let resolved: Vec<Vec<Resolution>> = records
        .par_iter()
        .map(|record| {
            config
                .fields
                .iter()
                .map(|(field, &field_type)| {
                    let votes = record.field_votes(field).unwrap_or(&empty);
                    resolve(&record.record_id, field, field_type, votes, config)
                })
                .collect()
        })
        .collect();

    let mut summary = RunSummary::default();
    let mut current = Vec::with_capacity(records.len() * config.fields.len());

    for resolution in resolved.into_iter().flatten() {
        let Resolution {
            decision,
            review,
            vote_fingerprint,
        } = resolution;
        let prior = ledger.current_entry(&decision.record_id, &decision.field);

        // Same votes: a human answer stands, and an auto decision stands only
        // if the active policy still reaches it.
        let unchanged = prior.as_ref().is_some_and(|p| {
            p.vote_fingerprint.as_deref() == Some(vote_fingerprint.as_str())
                && (p.decision.confidence == Confidence::HumanResolved || p.decision == decision)
        });
        if let (true, Some(prior)) = (unchanged, &prior) {
            if prior.decision.confidence == Confidence::HumanResolved {
                queue.withdraw(&prior.decision.record_id, &prior.decision.field);
            } else if let Some(item) = review {
                queue.enqueue(item);
            }
            current.push(prior.decision.clone());
            continue;
        }

        if let Some(prior) = prior.filter(|p| p.decision.confidence == Confidence::HumanResolved) {
            info!(
                record_id = %prior.decision.record_id,
                field = %prior.decision.field,
                "votes changed; human decision superseded"
            );
            summary.superseded += 1;
        }

        ledger.append_with_fingerprint(decision.clone(), run_at, Actor::Auto, Some(vote_fingerprint))?;
        summary.ledger_appended += 1;
        match review {
            Some(item) => queue.enqueue(item),
            None => {
                if queue.withdraw(&decision.record_id, &decision.field).is_some() {
                    debug!(record_id = %decision.record_id, field = %decision.field, "stale review item withdrawn");
                }
            }
        }
        current.push(decision);
    }

    summary.records = records.len();
    summary.fields = config.fields.len();
    for d in &current {
        match d.confidence {
            Confidence::AutoConsensus => summary.auto_consensus += 1,
            Confidence::SingleSource => summary.single_source += 1,
            Confidence::HumanResolved => summary.human_resolved += 1,
            Confidence::Unresolved => summary.unresolved += 1,
        }
        if let Some(source) = &d.source_method {
            *summary
                .sources
                .entry(d.field.clone())
                .or_default()
                .entry(source.clone())
                .or_insert(0) += 1;
        }
    }

    info!(
        records = summary.records,
        auto_consensus = summary.auto_consensus,
        single_source = summary.single_source,
        human_resolved = summary.human_resolved,
        unresolved = summary.unresolved,
        appended = summary.ledger_appended,
        "reconciliation run complete"
    );

    Ok(RunResult {
        meta: RunMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: run_at.to_rfc3339(),
        },
        summary,
        rows: rows_from_decisions(&current),
    })
}

// ============================================================================
// Review
// ============================================================================

/// A reviewer's answer for one pending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSubmission {
    pub record_id: RecordId,
    pub field: String,
    pub choice: ReviewChoice,
    pub reviewer: String,
}

/// Submit a review to the queue and record it in the ledger. The human entry
/// inherits the vote fingerprint of the decision it answers, so a later run
/// on the same votes keeps it.
pub fn apply_review(
    queue: &mut ReviewQueue,
    ledger: &ProvenanceLedger,
    submission: &ReviewSubmission,
) -> Result<TranscriptEntry, ReconError> {
    apply_review_at(queue, ledger, submission, Utc::now())
}

pub fn apply_review_at(
    queue: &mut ReviewQueue,
    ledger: &ProvenanceLedger,
    submission: &ReviewSubmission,
    timestamp: DateTime<Utc>,
) -> Result<TranscriptEntry, ReconError> {
    if ledger.is_halted() {
        return Err(ReconError::LedgerHalted);
    }
    let prior = ledger.current_entry(&submission.record_id, &submission.field);
    if prior
        .as_ref()
        .is_some_and(|p| p.decision.confidence == Confidence::HumanResolved)
    {
        // A queue saved before an earlier answer reached disk still lists it.
        if queue.withdraw(&submission.record_id, &submission.field).is_some() {
            warn!(record_id = %submission.record_id, field = %submission.field, "stale review item dropped; already answered");
        }
        return Err(ReconError::UnknownReviewItem {
            record_id: submission.record_id.to_string(),
            field: submission.field.clone(),
        });
    }
    let receipt = queue.submit_choice(
        &submission.record_id,
        &submission.field,
        &submission.choice,
        &submission.reviewer,
    )?;
    let fingerprint = prior.and_then(|e| e.vote_fingerprint);
    let reviewer = submission.reviewer.trim().to_string();
    ledger.append_with_fingerprint(
        receipt.decision.clone(),
        timestamp,
        Actor::Reviewer(reviewer.clone()),
        fingerprint,
    )?;
    Ok(TranscriptEntry::new(&receipt, &reviewer, timestamp))
}

/// Current decisions from the ledger as output rows.
pub fn export_rows(ledger: &ProvenanceLedger) -> Vec<OutputRow> {
    rows_from_decisions(&ledger.current_decisions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawValue;

    fn ctx() -> RunContext {
        let mut config = ReconConfig::default();
        config.fields = [
            ("doi".to_string(), crate::model::FieldType::Doi),
            ("title".to_string(), crate::model::FieldType::Title),
        ]
        .into_iter()
        .collect();
        RunContext::new(config, "out")
    }

    fn records(title_b: &str) -> Vec<RecordVotes> {
        vec![
            RecordVotes::new(RecordId::from("r1"))
                .with_vote("doi", "llm", "10.1/AAA")
                .with_vote("doi", "crossref", "https://doi.org/10.1/aaa")
                .with_vote("title", "llm", "Effects of Nursing"),
            RecordVotes::new(RecordId::from("r2"))
                .with_vote("title", "llm", "A")
                .with_vote("title", "grobid", title_b)
                .with_vote("title", "fitz", "C"),
        ]
    }

    #[test]
    fn run_records_every_field() {
        let ctx = ctx();
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        let result = run(&ctx, &records("B"), &ledger, &mut queue).unwrap();

        assert_eq!(result.summary.records, 2);
        assert_eq!(result.summary.ledger_appended, 4);
        assert_eq!(result.summary.auto_consensus, 1);
        assert_eq!(result.summary.single_source, 1);
        assert_eq!(result.summary.unresolved, 2);
        assert_eq!(result.summary.sources["doi"]["crossref"], 1);
        assert_eq!(ledger.len(), 4);
        // r2 has no doi votes at all and a three-way title split.
        assert!(queue.is_pending(&"r2".into(), "doi"));
        assert!(queue.is_pending(&"r2".into(), "title"));
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].fields.len(), 2);
    }

    #[test]
    fn rerun_on_same_votes_is_idempotent() {
        let ctx = ctx();
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        let again = run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        assert_eq!(again.summary.ledger_appended, 0);
        assert_eq!(ledger.len(), 4);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn human_decision_survives_rerun_until_votes_change() {
        let ctx = ctx();
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        run(&ctx, &records("B"), &ledger, &mut queue).unwrap();

        let submission = ReviewSubmission {
            record_id: "r2".into(),
            field: "title".into(),
            choice: ReviewChoice::Method("grobid".into()),
            reviewer: "Dana".into(),
        };
        let line = apply_review(&mut queue, &ledger, &submission).unwrap();
        assert_eq!(line.chosen_value.as_deref(), Some("B"));
        assert_eq!(line.candidates_shown.len(), 3);
        assert!(!queue.is_pending(&"r2".into(), "title"));

        let rerun = run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        assert_eq!(rerun.summary.human_resolved, 1);
        assert_eq!(rerun.summary.superseded, 0);
        assert!(!queue.is_pending(&"r2".into(), "title"));
        let current = ledger.current(&"r2".into(), "title").unwrap();
        assert_eq!(current.confidence, Confidence::HumanResolved);

        // grobid now says something else: the human answer no longer applies.
        let changed = run(&ctx, &records("D"), &ledger, &mut queue).unwrap();
        assert_eq!(changed.summary.superseded, 1);
        assert!(queue.is_pending(&"r2".into(), "title"));
        assert_eq!(
            ledger.current(&"r2".into(), "title").unwrap().confidence,
            Confidence::Unresolved
        );
        assert_eq!(ledger.history(&"r2".into(), "title").len(), 3);
    }

    #[test]
    fn config_change_re_decides_auto_fields() {
        let mut ctx = ctx();
        ctx.config.fields.insert("year".into(), crate::model::FieldType::Year);
        let votes = vec![RecordVotes::new(RecordId::from("r1"))
            .with_vote("year", "llm", "2019")
            .with_vote("year", "filename", "2019")
            .with_vote("year", "fitz", "2018")];
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();

        run(&ctx, &votes, &ledger, &mut queue).unwrap();
        assert_eq!(ledger.current(&"r1".into(), "year").unwrap().confidence, Confidence::Unresolved);
        assert!(queue.is_pending(&"r1".into(), "year"));

        ctx.config.policy.low_trust_corroborates = true;
        let flipped = run(&ctx, &votes, &ledger, &mut queue).unwrap();
        let current = ledger.current(&"r1".into(), "year").unwrap();
        assert_eq!(current.confidence, Confidence::AutoConsensus);
        assert_eq!(current.chosen_value.as_deref(), Some("2019"));
        assert!(!queue.is_pending(&"r1".into(), "year"));
        assert_eq!(flipped.rows[0].decision("year").unwrap(), current);
        assert_eq!(flipped.summary.superseded, 0);

        ctx.config.policy.low_trust_corroborates = false;
        run(&ctx, &votes, &ledger, &mut queue).unwrap();
        assert_eq!(ledger.current(&"r1".into(), "year").unwrap().confidence, Confidence::Unresolved);
        assert!(queue.is_pending(&"r1".into(), "year"));
        assert_eq!(ledger.history(&"r1".into(), "year").len(), 3);
    }

    #[test]
    fn config_change_keeps_human_answer_on_same_votes() {
        let mut ctx = ctx();
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        let submission = ReviewSubmission {
            record_id: "r2".into(),
            field: "title".into(),
            choice: ReviewChoice::Method("fitz".into()),
            reviewer: "Dana".into(),
        };
        apply_review(&mut queue, &ledger, &submission).unwrap();

        ctx.config.thresholds.title = 0.5;
        run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        let current = ledger.current(&"r2".into(), "title").unwrap();
        assert_eq!(current.confidence, Confidence::HumanResolved);
        assert_eq!(current.chosen_value.as_deref(), Some("C"));
    }

    #[test]
    fn manual_value_review() {
        let ctx = ctx();
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        let submission = ReviewSubmission {
            record_id: "r2".into(),
            field: "doi".into(),
            choice: ReviewChoice::Manual("10.9/zzz".into()),
            reviewer: "Dana".into(),
        };
        let line = apply_review(&mut queue, &ledger, &submission).unwrap();
        assert_eq!(line.chosen_source.as_deref(), Some("manual"));
        let rows = export_rows(&ledger);
        let decision = rows[1].decision("doi").unwrap();
        assert_eq!(decision.chosen_value.as_deref(), Some("10.9/zzz"));
        assert_eq!(decision.confidence, Confidence::HumanResolved);
    }

    #[test]
    fn stale_queue_cannot_answer_twice() {
        let ctx = ctx();
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        run(&ctx, &records("B"), &ledger, &mut queue).unwrap();
        let mut stale = queue.clone();

        let submission = ReviewSubmission {
            record_id: "r2".into(),
            field: "title".into(),
            choice: ReviewChoice::Method("grobid".into()),
            reviewer: "Dana".into(),
        };
        apply_review(&mut queue, &ledger, &submission).unwrap();
        let entries = ledger.len();

        // The queue on disk never saw the answer.
        assert!(stale.is_pending(&"r2".into(), "title"));
        let err = apply_review(&mut stale, &ledger, &submission).unwrap_err();
        assert!(matches!(err, ReconError::UnknownReviewItem { .. }));
        assert_eq!(ledger.len(), entries);
        assert!(!stale.is_pending(&"r2".into(), "title"));
    }

    #[test]
    fn review_of_unknown_item_is_rejected() {
        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        let submission = ReviewSubmission {
            record_id: "nope".into(),
            field: "doi".into(),
            choice: ReviewChoice::Manual("x".into()),
            reviewer: "Dana".into(),
        };
        let err = apply_review(&mut queue, &ledger, &submission).unwrap_err();
        assert!(matches!(err, ReconError::UnknownReviewItem { .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn load_votes_fills_fields_and_drops_unknown() {
        let input = concat!(
            r#"{"record_id": "r1", "votes": {"doi": {"llm": "10.1/a", "crossref": null}, "abstract": {"llm": "x"}}}"#,
            "\n\n",
            r#"{"source": "papers/Smith - 2019 - T.pdf", "votes": {"title": {"llm": ["T"]}}}"#,
            "\n",
        );
        let records = load_vote_records(input.as_bytes(), &ctx().config).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].votes.len(), 2);
        assert!(records[0].field_votes("title").unwrap().is_empty());
        assert!(records[0].field_votes("abstract").is_none());
        assert!(records[0].field_votes("doi").unwrap()["crossref"].is_absent());
        assert!(records[1].record_id.as_str().starts_with("paper_ID_"));
        assert_eq!(records[1].field_votes("title").unwrap()["llm"], RawValue::from(vec!["T"]));
    }

    #[test]
    fn load_votes_survives_misshapen_vote_map() {
        let input = concat!(
            r#"{"record_id": "r1", "votes": {"doi": {"llm": "10.1/a", "crossref": "10.1/A"}}}"#,
            "\n",
            r#"{"record_id": "r2", "votes": {"doi": "10.1/b", "title": {"llm": "Effects of Nursing"}}}"#,
            "\n",
        );
        let ctx = ctx();
        let records = load_vote_records(input.as_bytes(), &ctx.config).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].field_votes("doi").unwrap().is_empty());
        assert_eq!(records[1].field_votes("title").unwrap().len(), 1);

        let ledger = ProvenanceLedger::in_memory();
        let mut queue = ReviewQueue::new();
        let result = run(&ctx, &records, &ledger, &mut queue).unwrap();
        assert_eq!(ledger.len(), 4);
        assert_eq!(result.summary.auto_consensus, 1);
        assert_eq!(result.summary.single_source, 1);
        assert_eq!(ledger.current(&"r2".into(), "doi").unwrap().confidence, Confidence::Unresolved);
        assert!(queue.is_pending(&"r2".into(), "doi"));
    }

    #[test]
    fn load_votes_reports_bad_lines() {
        let config = ctx().config;
        let err = load_vote_records("{\"record_id\": \"r1\"}\nnot json\n".as_bytes(), &config).unwrap_err();
        assert!(matches!(err, ReconError::InputParse { line: 2, .. }));

        let err = load_vote_records("{\"votes\": {}}\n".as_bytes(), &config).unwrap_err();
        assert!(matches!(err, ReconError::InputParse { line: 1, .. }));

        let dup = "{\"record_id\": \"r1\"}\n{\"record_id\": \"r1\"}\n";
        let err = load_vote_records(dup.as_bytes(), &config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
