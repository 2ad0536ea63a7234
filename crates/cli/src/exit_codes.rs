//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success                                              |
//! | 1    | General error (I/O, serialization)                   |
//! | 2    | Usage error (bad args, bad reviewer id)              |
//! | 3    | `resolve` finished but review items are pending      |
//! | 4    | Review submission for an item that is not pending    |
//! | 5    | Ledger integrity failure (tampering or corruption)   |
//! | 6    | Config file invalid                                  |
//! | 7    | Vote input or table could not be parsed              |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Map it in `exit_code_for` if it comes from the engine

use biblio_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// `resolve` completed but left fields for human review.
/// Informational: outputs were written.
pub const EXIT_REVIEW_PENDING: u8 = 3;

/// `review submit` named a (record, field) that is not pending, or a
/// method that offered no candidate.
pub const EXIT_UNKNOWN_REVIEW_ITEM: u8 = 4;

/// Ledger hash chain failed verification. Writes are refused.
pub const EXIT_LEDGER_INTEGRITY: u8 = 5;

/// Config TOML unreadable or failed validation.
pub const EXIT_CONFIG_INVALID: u8 = 6;

/// Vote input (or a table read back) is malformed.
pub const EXIT_INPUT_PARSE: u8 = 7;

/// Map an engine error to its exit code.
pub fn exit_code_for(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) | ReconError::UnknownField(_) => {
            EXIT_CONFIG_INVALID
        }
        ReconError::InputParse { .. } => EXIT_INPUT_PARSE,
        ReconError::UnknownReviewItem { .. } | ReconError::UnknownCandidate { .. } => {
            EXIT_UNKNOWN_REVIEW_ITEM
        }
        ReconError::InvalidReviewer(_) => EXIT_USAGE,
        ReconError::LedgerIntegrity { .. } | ReconError::LedgerHalted => EXIT_LEDGER_INTEGRITY,
        ReconError::Io(_) | ReconError::Json(_) | ReconError::Csv(_) => EXIT_ERROR,
    }
}
