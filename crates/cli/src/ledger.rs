//! `biblio ledger`: verify the hash chain, show a field's history.

use std::io::Write;

use clap::Subcommand;
use serde::Serialize;

use biblio_recon::ledger::{verify_file, ProvenanceLedger};
use biblio_recon::RecordId;

use crate::exit_codes::exit_code_for;
use crate::{CliError, CommonArgs};

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Verify the ledger hash chain end to end
    #[command(after_help = "\
Examples:
  biblio ledger verify --dir out
  biblio ledger verify --dir out --json")]
    Verify {
        #[command(flatten)]
        common: CommonArgs,

        /// Print the verification result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Every decision recorded for one field of one record
    History {
        record_id: String,
        field: String,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Serialize)]
struct VerifyReport {
    ok: bool,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn cmd_ledger(cmd: LedgerCommands) -> Result<(), CliError> {
    match cmd {
        LedgerCommands::Verify { common, json } => cmd_ledger_verify(&common, json),
        LedgerCommands::History { record_id, field, common } => {
            cmd_ledger_history(&common, &RecordId::new(record_id), &field)
        }
    }
}

fn cmd_ledger_verify(common: &CommonArgs, json_output: bool) -> Result<(), CliError> {
    let ctx = common.context()?;
    let path = ctx.ledger_path();
    if !path.exists() {
        return Err(CliError::args(format!("no ledger at {}", path.display()))
            .with_hint("run `biblio resolve` first"));
    }

    let result = verify_file(&path);
    if json_output {
        let report = VerifyReport {
            ok: result.is_ok(),
            path: path.display().to_string(),
            entries: result.as_ref().ok().copied(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{json}");
    }

    match result {
        Ok(entries) => {
            eprintln!("ledger OK: {entries} entries, chain intact");
            Ok(())
        }
        Err(e) if json_output => Err(CliError::new(exit_code_for(&e), String::new())),
        Err(e) => Err(e.into()),
    }
}

fn cmd_ledger_history(common: &CommonArgs, record_id: &RecordId, field: &str) -> Result<(), CliError> {
    let ctx = common.context()?;
    let ledger = ProvenanceLedger::open(&ctx.ledger_path())?;
    let history = ledger.history(record_id, field);
    if history.is_empty() {
        return Err(CliError::args(format!("no ledger entries for {record_id} {field}")));
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for entry in &history {
        let line = serde_json::to_string(entry)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        writeln!(out, "{line}").map_err(|e| CliError::io(e.to_string()))?;
    }

    if let Some(current) = ledger.current(record_id, field) {
        eprintln!(
            "{} entries; current: {} ({}, {})",
            history.len(),
            current.chosen_value.as_deref().unwrap_or("<none>"),
            current.source_method.as_deref().unwrap_or("-"),
            current.confidence,
        );
    }
    Ok(())
}
