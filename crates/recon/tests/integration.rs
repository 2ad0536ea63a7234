use std::path::PathBuf;

use biblio_recon::diagnostics;
use biblio_recon::engine::{self, load_vote_file, ReviewSubmission, RunContext};
use biblio_recon::ledger::{self, ProvenanceLedger};
use biblio_recon::output::{self, TableFormat};
use biblio_recon::review::{self, ReviewChoice, ReviewQueue};
use biblio_recon::{Confidence, ReconConfig, ReconError, RecordId, RecordVotes};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_fixture() -> (RunContext, Vec<RecordVotes>, tempfile::TempDir) {
    let dir = fixtures_dir();
    let toml = std::fs::read_to_string(dir.join("biblio.toml")).unwrap();
    let config = ReconConfig::from_toml(&toml).unwrap();
    let records = load_vote_file(&dir.join("votes.jsonl"), &config).unwrap();
    let out = tempfile::tempdir().unwrap();
    (RunContext::new(config, out.path()), records, out)
}

fn decision(rows: &[output::OutputRow], record: &str, field: &str) -> biblio_recon::ConsensusDecision {
    rows.iter()
        .find(|r| r.record_id.as_str() == record)
        .and_then(|r| r.decision(field))
        .unwrap_or_else(|| panic!("no decision for {record}/{field}"))
}

// -------------------------------------------------------------------------
// Resolution
// -------------------------------------------------------------------------

#[test]
fn fixture_run_summary() {
    let (ctx, records, _out) = load_fixture();
    assert_eq!(records.len(), 4);

    let ledger = ProvenanceLedger::open(&ctx.ledger_path()).unwrap();
    let mut queue = ReviewQueue::new();
    let result = engine::run(&ctx, &records, &ledger, &mut queue).unwrap();

    assert_eq!(result.meta.config_name, "Nursing scoping review");
    assert_eq!(result.summary.records, 4);
    assert_eq!(result.summary.fields, 8);
    assert_eq!(result.summary.auto_consensus, 6);
    assert_eq!(result.summary.single_source, 5);
    assert_eq!(result.summary.unresolved, 21);
    assert_eq!(result.summary.ledger_appended, 32);
    assert_eq!(queue.len(), 21);
    assert_eq!(ledger.len(), 32);
}

#[test]
fn fixture_decisions() {
    let (ctx, records, _out) = load_fixture();
    let ledger = ProvenanceLedger::in_memory();
    let mut queue = ReviewQueue::new();
    let rows = engine::run(&ctx, &records, &ledger, &mut queue).unwrap().rows;

    let doi = decision(&rows, "paper_ID_doi00001", "doi");
    assert_eq!(doi.chosen_value.as_deref(), Some("10.1/aaa"));
    assert_eq!(doi.source_method.as_deref(), Some("crossref"));
    assert_eq!(doi.confidence, Confidence::AutoConsensus);

    let title = decision(&rows, "paper_ID_doi00001", "title");
    assert_eq!(title.source_method.as_deref(), Some("openalex"));
    assert_eq!(
        title.chosen_value.as_deref(),
        Some("Nurse Staffing and Patient Outcomes - A Review")
    );

    let year = decision(&rows, "paper_ID_doi00001", "year");
    assert_eq!(year.chosen_value.as_deref(), Some("2019"));
    assert_eq!(year.source_method.as_deref(), Some("llm"));

    let country = decision(&rows, "paper_ID_doi00001", "country");
    assert_eq!(country.chosen_value.as_deref(), Some("United States; United Kingdom"));
    assert_eq!(country.confidence, Confidence::AutoConsensus);

    let author = decision(&rows, "paper_ID_auth0002", "author");
    assert_eq!(author.chosen_value.as_deref(), Some("Smith J"));
    assert_eq!(author.confidence, Confidence::SingleSource);

    let keywords = decision(&rows, "paper_ID_auth0002", "author_keywords");
    assert_eq!(keywords.chosen_value.as_deref(), Some("burnout; ICU; Nursing"));
    assert_eq!(keywords.confidence, Confidence::AutoConsensus);

    let study = decision(&rows, "paper_ID_split003", "study_type");
    assert_eq!(study.chosen_value.as_deref(), Some("Qualitative"));
    assert_eq!(study.confidence, Confidence::SingleSource);

    let split_year = decision(&rows, "paper_ID_split003", "year");
    assert_eq!(split_year.confidence, Confidence::Unresolved);
    let item = queue.get(&"paper_ID_split003".into(), "year").unwrap();
    assert_eq!(item.candidates.len(), 3);

    let lee = RecordId::from_path("papers/Lee - 2021 - Night shifts.pdf");
    let journal = decision(&rows, lee.as_str(), "source_journal");
    assert_eq!(journal.source_method.as_deref(), Some("crossref"));
    assert_eq!(journal.confidence, Confidence::SingleSource);
}

#[test]
fn every_field_has_decision_or_review() {
    let (ctx, records, _out) = load_fixture();
    let ledger = ProvenanceLedger::in_memory();
    let mut queue = ReviewQueue::new();
    engine::run(&ctx, &records, &ledger, &mut queue).unwrap();

    for record in &records {
        for field in ctx.config.fields.keys() {
            let current = ledger.current(&record.record_id, field).unwrap();
            if current.is_resolved() {
                assert!(!queue.is_pending(&record.record_id, field));
            } else {
                assert!(queue.is_pending(&record.record_id, field));
            }
        }
    }
}

// -------------------------------------------------------------------------
// Resumable review session
// -------------------------------------------------------------------------

#[test]
fn review_session_resumes_from_disk() {
    let (ctx, records, _out) = load_fixture();
    {
        let ledger = ProvenanceLedger::open(&ctx.ledger_path()).unwrap();
        let mut queue = ReviewQueue::new();
        engine::run(&ctx, &records, &ledger, &mut queue).unwrap();
        queue.save(&ctx.queue_path()).unwrap();
    }

    // Later process: reload, answer one item.
    let ledger = ProvenanceLedger::open(&ctx.ledger_path()).unwrap();
    let mut queue = ReviewQueue::load(&ctx.queue_path()).unwrap();
    assert_eq!(queue.len(), 21);

    let submission = ReviewSubmission {
        record_id: "paper_ID_split003".into(),
        field: "title".into(),
        choice: ReviewChoice::Method("grobid".into()),
        reviewer: "Reviewer One".into(),
    };
    let line = engine::apply_review(&mut queue, &ledger, &submission).unwrap();
    review::append_transcript(&ctx.transcript_path(), &line).unwrap();
    queue.save(&ctx.queue_path()).unwrap();

    let transcript = review::read_transcript(&ctx.transcript_path()).unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].chosen_value.as_deref(), Some("B"));
    assert_eq!(transcript[0].candidates_shown.len(), 3);
    assert_eq!(ReviewQueue::load(&ctx.queue_path()).unwrap().len(), 20);

    // Answering it again is rejected.
    let err = engine::apply_review(&mut queue, &ledger, &submission).unwrap_err();
    assert!(matches!(err, ReconError::UnknownReviewItem { .. }));

    // Re-running on the same votes keeps the human answer.
    let rerun = engine::run(&ctx, &records, &ledger, &mut queue).unwrap();
    assert_eq!(rerun.summary.ledger_appended, 0);
    assert_eq!(rerun.summary.human_resolved, 1);
    assert_eq!(ledger::verify_file(&ctx.ledger_path()).unwrap(), 33);
}

// -------------------------------------------------------------------------
// Output + ledger
// -------------------------------------------------------------------------

#[test]
fn export_round_trips_through_csv() {
    let (ctx, records, _out) = load_fixture();
    let ledger = ProvenanceLedger::open(&ctx.ledger_path()).unwrap();
    let mut queue = ReviewQueue::new();
    engine::run(&ctx, &records, &ledger, &mut queue).unwrap();

    let rows = engine::export_rows(&ledger);
    let path = ctx.output_path(TableFormat::Csv);
    let file = std::fs::File::create(&path).unwrap();
    output::write_rows(file, &rows, &ctx.field_names(), TableFormat::Csv).unwrap();

    let parsed = output::parse_rows(std::fs::File::open(&path).unwrap(), TableFormat::Csv).unwrap();
    assert_eq!(parsed, rows);
}

#[test]
fn tampered_ledger_is_rejected() {
    let (ctx, records, _out) = load_fixture();
    {
        let ledger = ProvenanceLedger::open(&ctx.ledger_path()).unwrap();
        let mut queue = ReviewQueue::new();
        engine::run(&ctx, &records, &ledger, &mut queue).unwrap();
    }
    let data = std::fs::read_to_string(ctx.ledger_path()).unwrap();
    let mut lines: Vec<&str> = data.lines().collect();
    lines.remove(5);
    std::fs::write(ctx.ledger_path(), lines.join("\n") + "\n").unwrap();

    let err = ledger::verify_file(&ctx.ledger_path()).unwrap_err();
    assert!(matches!(err, ReconError::LedgerIntegrity { line: 6, .. }));
    assert!(ProvenanceLedger::open(&ctx.ledger_path()).is_err());
}

// -------------------------------------------------------------------------
// Diagnostics
// -------------------------------------------------------------------------

#[test]
fn fixture_diagnostics() {
    let (ctx, records, _out) = load_fixture();
    let report = diagnostics::report(&records, &ctx.config);

    assert_eq!(report.records, 4);
    assert!(!report.null_rate.methods.contains(&"abstract".to_string()));
    assert_eq!(report.null_rate.get("filename", "year"), 1);
    assert_eq!(report.exact.get("grobid", "year"), 1);
    assert_eq!(report.approx.get("grobid", "title"), 1);
    assert_eq!(report.exact.get("crossref", "doi"), 1);
    assert_eq!(report.exact.get("grobid", "author_keywords"), 1);
    assert_eq!(report.approx.get("grobid", "author_keywords"), 0);
}
