//! `biblio review`: list and answer pending review items.

use std::io::Write;

use clap::{ArgGroup, Subcommand};

use biblio_recon::engine::{apply_review, ReviewSubmission};
use biblio_recon::review::{append_transcript, ReviewChoice};
use biblio_recon::{ProvenanceLedger, ReconError, RecordId, ReviewQueue};

use crate::{CliError, CommonArgs};

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// Show fields waiting for a human decision
    #[command(after_help = "\
Examples:
  biblio review list --dir out
  biblio review list --dir out --json")]
    List {
        #[command(flatten)]
        common: CommonArgs,

        /// Print the pending items as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Answer one pending item
    #[command(after_help = "\
Examples:
  biblio review submit paper_ID_1a2b3c4d title --method grobid --reviewer ks
  biblio review submit paper_ID_1a2b3c4d doi --value 10.1000/xyz --reviewer ks")]
    #[command(group(ArgGroup::new("choice").required(true).args(["method", "value"])))]
    Submit {
        record_id: String,
        field: String,

        /// Take the candidate offered by this method
        #[arg(long)]
        method: Option<String>,

        /// Enter the value by hand (source recorded as "manual")
        #[arg(long)]
        value: Option<String>,

        /// Reviewer name, recorded in the ledger and transcript
        #[arg(long, env = "BIBLIO_REVIEWER")]
        reviewer: String,

        #[command(flatten)]
        common: CommonArgs,
    },
}

pub fn cmd_review(cmd: ReviewCommands) -> Result<(), CliError> {
    match cmd {
        ReviewCommands::List { common, json } => cmd_review_list(&common, json),
        ReviewCommands::Submit { record_id, field, method, value, reviewer, common } => {
            let choice = match (method, value) {
                (Some(method), None) => ReviewChoice::Method(method),
                (None, Some(value)) => ReviewChoice::Manual(value),
                _ => return Err(CliError::args("pass exactly one of --method or --value")),
            };
            let submission = ReviewSubmission {
                record_id: RecordId::new(record_id),
                field,
                choice,
                reviewer,
            };
            cmd_review_submit(&common, &submission)
        }
    }
}

fn cmd_review_list(common: &CommonArgs, json_output: bool) -> Result<(), CliError> {
    let ctx = common.context()?;
    let queue = ReviewQueue::load(&ctx.queue_path())?;
    let pending = queue.pending();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let write_err = |e: std::io::Error| CliError::io(e.to_string());

    if json_output {
        let json = serde_json::to_string_pretty(&pending)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        writeln!(out, "{json}").map_err(write_err)?;
        return Ok(());
    }

    for item in &pending {
        writeln!(out, "{}  {}", item.record_id, item.field).map_err(write_err)?;
        if item.candidates.is_empty() {
            writeln!(out, "    (no candidates; use --value)").map_err(write_err)?;
        }
        for (method, value) in &item.candidates {
            writeln!(out, "    {method:<12} {value}").map_err(write_err)?;
        }
    }
    eprintln!("{} items pending review", pending.len());
    Ok(())
}

fn cmd_review_submit(common: &CommonArgs, submission: &ReviewSubmission) -> Result<(), CliError> {
    let ctx = common.context()?;
    let mut queue = ReviewQueue::load(&ctx.queue_path())?;
    if !queue.is_pending(&submission.record_id, &submission.field) {
        return Err(ReconError::UnknownReviewItem {
            record_id: submission.record_id.to_string(),
            field: submission.field.clone(),
        }
        .into());
    }
    let ledger = ProvenanceLedger::open(&ctx.ledger_path())?;

    let line = match apply_review(&mut queue, &ledger, submission) {
        Ok(line) => line,
        Err(e) => {
            // A stale item may have been dropped from the queue.
            queue.save(&ctx.queue_path())?;
            return Err(e.into());
        }
    };
    queue.save(&ctx.queue_path())?;
    append_transcript(&ctx.transcript_path(), &line)?;

    eprintln!(
        "{} {}: {} (source {}) by {}; {} items still pending",
        line.record_id,
        line.field,
        line.chosen_value.as_deref().unwrap_or("<empty>"),
        line.chosen_source.as_deref().unwrap_or("-"),
        line.reviewer_id,
        queue.len(),
    );
    Ok(())
}
