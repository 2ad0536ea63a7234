// biblio - bibliographic metadata reconciliation from the command line.
// stdout carries machine-readable output (JSON or a table); everything
// human-facing goes to stderr.

mod exit_codes;
mod export;
mod ledger;
mod resolve;
mod review;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use biblio_recon::output::TableFormat;
use biblio_recon::{ReconConfig, ReconError, RunContext};

use exit_codes::{exit_code_for, EXIT_CONFIG_INVALID, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "biblio")]
#[command(about = "Reconcile bibliographic metadata from several extraction methods")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every field of every record in a vote file
    #[command(after_help = "\
Examples:
  biblio resolve votes.jsonl
  biblio resolve votes.jsonl --config biblio.toml --dir out
  biblio resolve votes.jsonl --format jsonl --json")]
    Resolve {
        /// JSON-lines vote file, one record per line
        votes: PathBuf,

        #[command(flatten)]
        common: CommonArgs,

        /// Output table format
        #[arg(long, value_enum, default_value = "csv")]
        format: TableArg,

        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Build a vote file from document paths with the offline extractors
    #[command(after_help = "\
Examples:
  biblio extract papers/*.pdf > votes.jsonl")]
    Extract {
        /// Documents to extract from
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Config file (adapter timeout and concurrency)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List or answer pending review items
    #[command(subcommand)]
    Review(review::ReviewCommands),

    /// Inspect the provenance ledger
    #[command(subcommand)]
    Ledger(ledger::LedgerCommands),

    /// Write current decisions from the ledger as the output table
    #[command(after_help = "\
Examples:
  biblio export --dir out > reconciled.csv
  biblio export --dir out --format jsonl")]
    Export {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long, value_enum, default_value = "csv")]
        format: TableArg,
    },

    /// Null-rate and agreement matrices for a vote file
    #[command(after_help = "\
Examples:
  biblio report votes.jsonl
  biblio report votes.jsonl --format csv")]
    Report {
        votes: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: ReportFormat,
    },

    /// Config file commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Parse and validate a config file without running
    Validate {
        config: PathBuf,
    },
}

/// Options shared by every command that touches the artifact directory.
#[derive(clap::Args, Clone)]
pub struct CommonArgs {
    /// Config file (defaults apply when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the ledger, review queue and transcript
    #[arg(long, default_value = "biblio-out", env = "BIBLIO_DIR")]
    pub dir: PathBuf,
}

impl CommonArgs {
    /// Build the run context once; commands pass it down.
    pub fn context(&self) -> Result<RunContext, CliError> {
        let config = load_config(self.config.as_deref())?;
        Ok(RunContext::new(config, &self.dir))
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TableArg {
    Csv,
    Jsonl,
}

impl From<TableArg> for TableFormat {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Csv => TableFormat::Csv,
            TableArg::Jsonl => TableFormat::Jsonl,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    Json,
    Csv,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  biblio-recon ", env!("CARGO_PKG_VERSION"),
    )
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if verbose > 0 {
        tracing_subscriber::EnvFilter::new(level)
    } else {
        tracing_subscriber::EnvFilter::try_from_env("BIBLIO_LOG")
            .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    // A second init (tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Resolve { votes, common, format, json } => {
            resolve::cmd_resolve(&votes, &common, format.into(), json)
        }
        Commands::Extract { files, config } => resolve::cmd_extract(&files, config.as_deref()),
        Commands::Review(cmd) => review::cmd_review(cmd),
        Commands::Ledger(cmd) => ledger::cmd_ledger(cmd),
        Commands::Export { common, format } => export::cmd_export(&common, format.into()),
        Commands::Report { votes, config, format } => {
            export::cmd_report(&votes, config.as_deref(), format)
        }
        Commands::Config(ConfigCommands::Validate { config }) => cmd_config_validate(&config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::UnknownReviewItem { .. } => {
                Some("run `biblio review list` to see what is pending".to_string())
            }
            ReconError::UnknownCandidate { .. } => {
                Some("pick a method listed for the item, or pass --value".to_string())
            }
            ReconError::LedgerIntegrity { .. } | ReconError::LedgerHalted => {
                Some("the ledger was edited or corrupted; restore it from backup before writing".to_string())
            }
            _ => None,
        };
        Self { code: exit_code_for(&err), message: err.to_string(), hint }
    }
}

/// Read and validate a config file, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<ReconConfig, CliError> {
    let Some(path) = path else {
        return Ok(ReconConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::new(EXIT_CONFIG_INVALID, format!("cannot read config {}: {e}", path.display()))
    })?;
    Ok(ReconConfig::from_toml(&text)?)
}

// ============================================================================
// config validate
// ============================================================================

fn cmd_config_validate(path: &Path) -> Result<(), CliError> {
    let config = load_config(Some(path))?;
    eprintln!(
        "config OK: \"{}\" ({} fields, anchor {}, registries {})",
        config.name,
        config.fields.len(),
        config.policy.anchor,
        config.policy.preferred.join(" > "),
    );
    Ok(())
}
