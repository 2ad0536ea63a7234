use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad threshold, anchor listed as preferred, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A field name that the run does not reconcile.
    #[error("unknown field: {0}")]
    UnknownField(String),
    /// A vote input line could not be parsed.
    #[error("input line {line}: {message}")]
    InputParse { line: usize, message: String },
    /// Review submission for a (record, field) pair that is not pending.
    #[error("no pending review item for record '{record_id}', field '{field}'")]
    UnknownReviewItem { record_id: String, field: String },
    /// A review choice naming a method that offered no candidate value.
    #[error("method '{method}' offered no candidate for record '{record_id}', field '{field}'")]
    UnknownCandidate { record_id: String, field: String, method: String },
    /// Reviewer identity missing or reserved.
    #[error("invalid reviewer id: {0:?}")]
    InvalidReviewer(String),
    /// Hash-chain verification failed. Fatal for audit purposes.
    #[error("ledger integrity failure at line {line}: {reason}")]
    LedgerIntegrity { line: usize, reason: String },
    /// Writes refused after an integrity failure on this ledger handle.
    #[error("ledger is halted after an integrity failure; no further writes accepted")]
    LedgerHalted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ReconError {
    /// True for failures that must stop further ledger writes.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::LedgerIntegrity { .. } | Self::LedgerHalted)
    }
}
