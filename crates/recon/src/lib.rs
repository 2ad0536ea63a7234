//! `biblio-recon`: bibliographic metadata reconciliation engine.
//!
//! Takes per-field votes from several extraction methods, normalizes them,
//! decides each field by consensus or hands it to human review, and records
//! every decision in a hash-chained provenance ledger.
//! No CLI or argument parsing; file access is limited to the artifacts the
//! caller points it at.

pub mod adapter;
pub mod config;
pub mod consensus;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod output;
pub mod review;

pub use config::ReconConfig;
pub use engine::{apply_review, run, RunContext, RunResult, RunSummary};
pub use error::ReconError;
pub use ledger::ProvenanceLedger;
pub use model::{Confidence, ConsensusDecision, FieldType, RawValue, RecordId, RecordVotes, ReviewItem};
pub use review::ReviewQueue;
