//! `biblio export` and `biblio report`.

use std::io::Write;
use std::path::Path;

use biblio_recon::diagnostics;
use biblio_recon::engine::{export_rows, load_vote_file};
use biblio_recon::output::{write_rows, TableFormat};
use biblio_recon::ProvenanceLedger;

use crate::{load_config, CliError, CommonArgs, ReportFormat};

/// Current decisions from the ledger, as the output table on stdout.
pub fn cmd_export(common: &CommonArgs, format: TableFormat) -> Result<(), CliError> {
    let ctx = common.context()?;
    let path = ctx.ledger_path();
    if !path.exists() {
        return Err(CliError::args(format!("no ledger at {}", path.display()))
            .with_hint("run `biblio resolve` first"));
    }
    let ledger = ProvenanceLedger::open(&path)?;
    let rows = export_rows(&ledger);

    let stdout = std::io::stdout();
    write_rows(stdout.lock(), &rows, &ctx.field_names(), format)?;
    eprintln!("exported {} records", rows.len());
    Ok(())
}

/// Diagnostic matrices for a vote file, on stdout.
pub fn cmd_report(votes: &Path, config: Option<&Path>, format: ReportFormat) -> Result<(), CliError> {
    if !votes.exists() {
        return Err(CliError::args(format!("vote file not found: {}", votes.display())));
    }
    let config = load_config(config)?;
    let records = load_vote_file(votes, &config)?;
    let report = diagnostics::report(&records, &config);

    match format {
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
            println!("{json}");
        }
        ReportFormat::Csv => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for (title, matrix) in [
                ("null_rate", &report.null_rate),
                ("exact", &report.exact),
                ("approx", &report.approx),
            ] {
                writeln!(out, "# {title}").map_err(|e| CliError::io(e.to_string()))?;
                matrix.write_csv(&mut out)?;
            }
        }
    }
    eprintln!("{} records, anchor {}", report.records, config.policy.anchor);
    Ok(())
}
