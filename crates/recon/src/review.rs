//! Review queue: fields the resolver could not decide, waiting for a human.
//!
//! The queue is bookkeeping only. An external driver lists `pending()`,
//! collects answers however it likes, and calls `submit()`. The queue
//! persists to a JSON file so a session can stop and resume later.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReconError;
use crate::model::{Confidence, ConsensusDecision, RecordId, ReviewItem};

const QUEUE_SCHEMA_VERSION: u32 = 1;

/// Source recorded when a reviewer types a value instead of picking one.
pub const MANUAL_SOURCE: &str = "manual";

#[derive(Debug, Clone, Default)]
pub struct ReviewQueue {
    items: BTreeMap<(RecordId, String), ReviewItem>,
}

/// On-disk form of the queue.
#[derive(Debug, Serialize, Deserialize)]
struct QueueFile {
    schema_version: u32,
    items: Vec<ReviewItem>,
}

/// What a reviewer picked for a pending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewChoice {
    /// Take the candidate value offered by this method.
    Method(String),
    /// A value typed by the reviewer.
    Manual(String),
}

impl ReviewChoice {
    /// Resolve to `(chosen_value, source_method)` against the candidates shown.
    pub fn resolve(&self, item: &ReviewItem) -> Result<(String, String), ReconError> {
        match self {
            Self::Method(method) => item
                .candidates
                .get(method)
                .map(|value| (value.clone(), method.clone()))
                .ok_or_else(|| ReconError::UnknownCandidate {
                    record_id: item.record_id.to_string(),
                    field: item.field.clone(),
                    method: method.clone(),
                }),
            Self::Manual(value) => Ok((value.trim().to_string(), MANUAL_SOURCE.to_string())),
        }
    }
}

/// Result of a submission: the human decision and what the reviewer saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewReceipt {
    pub decision: ConsensusDecision,
    pub candidates_shown: BTreeMap<String, String>,
}

/// One line of the review transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub record_id: RecordId,
    pub field: String,
    pub candidates_shown: BTreeMap<String, String>,
    pub chosen_value: Option<String>,
    pub chosen_source: Option<String>,
    pub reviewer_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(receipt: &ReviewReceipt, reviewer_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            record_id: receipt.decision.record_id.clone(),
            field: receipt.decision.field.clone(),
            candidates_shown: receipt.candidates_shown.clone(),
            chosen_value: receipt.decision.chosen_value.clone(),
            chosen_source: receipt.decision.source_method.clone(),
            reviewer_id: reviewer_id.to_string(),
            timestamp,
        }
    }
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. An item already pending for the same (record, field) is
    /// replaced so the reviewer always sees the latest candidates.
    pub fn enqueue(&mut self, item: ReviewItem) {
        let key = (item.record_id.clone(), item.field.clone());
        if self.items.insert(key, item).is_some() {
            debug!("review item replaced with fresh candidates");
        }
    }

    /// Pending items ordered by (record_id, field).
    pub fn pending(&self) -> Vec<&ReviewItem> {
        self.items.values().collect()
    }

    pub fn get(&self, record_id: &RecordId, field: &str) -> Option<&ReviewItem> {
        self.items.get(&(record_id.clone(), field.to_string()))
    }

    pub fn is_pending(&self, record_id: &RecordId, field: &str) -> bool {
        self.get(record_id, field).is_some()
    }

    /// Drop a pending item without a decision (its field was re-resolved).
    pub fn withdraw(&mut self, record_id: &RecordId, field: &str) -> Option<ReviewItem> {
        self.items.remove(&(record_id.clone(), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record a human decision for a pending item and remove it from the queue.
    pub fn submit(
        &mut self,
        record_id: &RecordId,
        field: &str,
        chosen_value: &str,
        source_method: &str,
        reviewer_id: &str,
    ) -> Result<ReviewReceipt, ReconError> {
        validate_reviewer(reviewer_id)?;
        let item = self
            .items
            .remove(&(record_id.clone(), field.to_string()))
            .ok_or_else(|| ReconError::UnknownReviewItem {
                record_id: record_id.to_string(),
                field: field.to_string(),
            })?;

        let chosen_value = chosen_value.trim();
        let decision = ConsensusDecision {
            record_id: item.record_id,
            field: item.field,
            chosen_value: (!chosen_value.is_empty()).then(|| chosen_value.to_string()),
            source_method: Some(source_method.to_string()),
            confidence: Confidence::HumanResolved,
        };
        info!(%record_id, field, source = source_method, reviewer = reviewer_id, "review submitted");
        Ok(ReviewReceipt {
            decision,
            candidates_shown: item.candidates,
        })
    }

    /// Submit using a [`ReviewChoice`] resolved against the pending item.
    pub fn submit_choice(
        &mut self,
        record_id: &RecordId,
        field: &str,
        choice: &ReviewChoice,
        reviewer_id: &str,
    ) -> Result<ReviewReceipt, ReconError> {
        let item = self.get(record_id, field).ok_or_else(|| ReconError::UnknownReviewItem {
            record_id: record_id.to_string(),
            field: field.to_string(),
        })?;
        let (value, source) = choice.resolve(item)?;
        self.submit(record_id, field, &value, &source, reviewer_id)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load a persisted queue. A missing file is an empty queue.
    pub fn load(path: &Path) -> Result<Self, ReconError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        let file: QueueFile = serde_json::from_str(&data)?;
        let mut queue = Self::new();
        for item in file.items {
            queue.enqueue(item);
        }
        Ok(queue)
    }

    /// Persist via write-to-temp then rename so a crash never leaves a torn file.
    pub fn save(&self, path: &Path) -> Result<(), ReconError> {
        let file = QueueFile {
            schema_version: QUEUE_SCHEMA_VERSION,
            items: self.items.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn validate_reviewer(reviewer_id: &str) -> Result<(), ReconError> {
    let trimmed = reviewer_id.trim();
    if trimmed.chars().count() < 2 || trimmed.eq_ignore_ascii_case("auto") {
        return Err(ReconError::InvalidReviewer(reviewer_id.to_string()));
    }
    Ok(())
}

/// Append one entry to a JSON-lines review transcript.
pub fn append_transcript(path: &Path, entry: &TranscriptEntry) -> Result<(), ReconError> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Read a review transcript. A missing file has no entries.
pub fn read_transcript(path: &Path) -> Result<Vec<TranscriptEntry>, ReconError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    data.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(ReconError::from))
        .collect()
}
