//! `biblio resolve` and `biblio extract`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use biblio_recon::adapter::{collect_votes, DocumentRef, ExtractionAdapter, FilenameAdapter};
use biblio_recon::engine::{self, load_vote_file};
use biblio_recon::output::{write_rows, TableFormat};
use biblio_recon::{ProvenanceLedger, ReviewQueue};
use tracing::info;

use crate::exit_codes::EXIT_REVIEW_PENDING;
use crate::{load_config, CliError, CommonArgs};

pub fn cmd_resolve(
    votes: &Path,
    common: &CommonArgs,
    format: TableFormat,
    json_output: bool,
) -> Result<(), CliError> {
    if !votes.exists() {
        return Err(CliError::args(format!("vote file not found: {}", votes.display())));
    }
    let ctx = common.context()?;
    let records = load_vote_file(votes, &ctx.config)?;
    info!(records = records.len(), dir = %ctx.out_dir.display(), config = %ctx.config.name, "resolving");

    std::fs::create_dir_all(&ctx.out_dir)
        .map_err(|e| CliError::io(format!("cannot create {}: {e}", ctx.out_dir.display())))?;
    let ledger = ProvenanceLedger::open(&ctx.ledger_path())?;
    let mut queue = ReviewQueue::load(&ctx.queue_path())?;

    let result = engine::run(&ctx, &records, &ledger, &mut queue)?;
    queue.save(&ctx.queue_path())?;

    let table_path = ctx.output_path(format);
    let file = std::fs::File::create(&table_path)
        .map_err(|e| CliError::io(format!("cannot write {}: {e}", table_path.display())))?;
    write_rows(std::io::BufWriter::new(file), &result.rows, &ctx.field_names(), format)?;

    if json_output {
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{json}");
    }

    // Human summary to stderr
    let s = &result.summary;
    eprintln!(
        "{} records x {} fields: {} auto_consensus, {} single_source, {} human_resolved, {} unresolved",
        s.records, s.fields, s.auto_consensus, s.single_source, s.human_resolved, s.unresolved,
    );
    eprintln!(
        "ledger: {} new entries; {} human decisions superseded",
        s.ledger_appended, s.superseded
    );
    eprintln!("wrote {}", table_path.display());

    if !queue.is_empty() {
        return Err(CliError::new(
            EXIT_REVIEW_PENDING,
            format!("{} fields pending review", queue.len()),
        )
        .with_hint(format!("biblio review list --dir {}", ctx.out_dir.display())));
    }
    Ok(())
}

/// Run the offline extractors over each file and print one vote line per file.
pub fn cmd_extract(files: &[PathBuf], config: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config)?;
    let adapters: Vec<Arc<dyn ExtractionAdapter>> = vec![Arc::new(FilenameAdapter)];

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for file in files {
        let doc = DocumentRef::from_path(file.clone());
        let record = collect_votes(&adapters, &doc, &config.adapters).into_record_votes();
        let line = serde_json::to_string(&record)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        writeln!(out, "{line}").map_err(|e| CliError::io(e.to_string()))?;
    }
    eprintln!("extracted {} documents", files.len());
    Ok(())
}
