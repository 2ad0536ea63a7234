//! Provenance ledger: append-only, hash-chained history of every decision.
//!
//! # Invariants
//!
//! 1. **Append-only.** Entries are never edited or removed. A correction is
//!    a new entry for the same (record, field).
//! 2. **Chained.** Entry `n` stores the hash of entry `n-1` (the first entry
//!    chains from `sha256("genesis")`) and its own hash over the canonical
//!    JSON of its body. Any edit, deletion or reordering breaks the chain.
//! 3. **Current = latest.** `current()` is the entry with the greatest
//!    timestamp for the key, ties broken by sequence number.
//! 4. **Halt on corruption.** After a failed verification the handle
//!    refuses all further writes.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::error::ReconError;
use crate::model::{Actor, ConsensusDecision, RecordId};

// ============================================================================
// Entry
// ============================================================================

/// One ledger row: a decision, when it was made, and by whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// 0-based position in the ledger.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub decision: ConsensusDecision,
    /// Fingerprint of the votes behind an automatic decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_fingerprint: Option<String>,
    /// `"sha256:<hex>"` of the preceding entry.
    pub prev_hash: String,
    /// `"sha256:<hex>"` of this entry's body (everything above plus `prev_hash`).
    pub hash: String,
}

/// The hashed portion of an entry. Field order is the canonical order.
#[derive(Serialize)]
struct EntryBody<'a> {
    seq: u64,
    timestamp: &'a DateTime<Utc>,
    actor: &'a Actor,
    decision: &'a ConsensusDecision,
    vote_fingerprint: &'a Option<String>,
    prev_hash: &'a str,
}

impl ProvenanceEntry {
    fn compute_hash(&self) -> Result<String, ReconError> {
        let body = EntryBody {
            seq: self.seq,
            timestamp: &self.timestamp,
            actor: &self.actor,
            decision: &self.decision,
            vote_fingerprint: &self.vote_fingerprint,
            prev_hash: &self.prev_hash,
        };
        let canonical = serde_json::to_vec(&body)?;
        Ok(format!("sha256:{:x}", Sha256::digest(&canonical)))
    }

    fn key(&self) -> (RecordId, String) {
        (self.decision.record_id.clone(), self.decision.field.clone())
    }
}

/// Hash every chain starts from.
pub fn genesis_hash() -> String {
    format!("sha256:{:x}", Sha256::digest(b"genesis"))
}

// ============================================================================
// Verification
// ============================================================================

/// Check sequence numbers, back-links and entry hashes. Errors name the
/// 1-based line of the first bad entry.
pub fn verify_entries(entries: &[ProvenanceEntry]) -> Result<(), ReconError> {
    let mut prev = genesis_hash();
    for (i, entry) in entries.iter().enumerate() {
        let line = i + 1;
        if entry.seq != i as u64 {
            return Err(ReconError::LedgerIntegrity {
                line,
                reason: format!("sequence {} out of order (expected {i})", entry.seq),
            });
        }
        if entry.prev_hash != prev {
            return Err(ReconError::LedgerIntegrity {
                line,
                reason: "previous-entry hash does not match".into(),
            });
        }
        if entry.compute_hash()? != entry.hash {
            return Err(ReconError::LedgerIntegrity {
                line,
                reason: "entry hash does not match its content".into(),
            });
        }
        prev = entry.hash.clone();
    }
    Ok(())
}

/// Parse JSON-lines ledger content. Unparseable lines are integrity failures.
pub fn parse_entries(data: &str) -> Result<Vec<ProvenanceEntry>, ReconError> {
    let mut entries = Vec::new();
    for (i, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|e| ReconError::LedgerIntegrity {
            line: i + 1,
            reason: format!("unparseable entry: {e}"),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Read and verify a ledger file. Returns the number of entries.
pub fn verify_file(path: &Path) -> Result<usize, ReconError> {
    let data = std::fs::read_to_string(path)?;
    let entries = parse_entries(&data)?;
    verify_entries(&entries)?;
    Ok(entries.len())
}

// ============================================================================
// Ledger
// ============================================================================

/// Thread-safe ledger handle. Writes are serialized by an internal mutex so
/// the chain order is the append order.
pub struct ProvenanceLedger {
    state: Mutex<LedgerState>,
}

struct LedgerState {
    entries: Vec<ProvenanceEntry>,
    by_key: HashMap<(RecordId, String), Vec<usize>>,
    sink: Option<File>,
    path: Option<PathBuf>,
    halted: bool,
}

impl LedgerState {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
            sink: None,
            path: None,
            halted: false,
        }
    }

    fn index(&mut self, entry: ProvenanceEntry) {
        let pos = self.entries.len();
        self.by_key.entry(entry.key()).or_default().push(pos);
        self.entries.push(entry);
    }

    fn current_index(&self, key: &(RecordId, String)) -> Option<usize> {
        self.by_key
            .get(key)?
            .iter()
            .copied()
            .max_by_key(|&i| (self.entries[i].timestamp, self.entries[i].seq))
    }
}

impl ProvenanceLedger {
    /// A ledger that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState::empty()),
        }
    }

    /// Open (or create) a JSON-lines ledger file. Existing content is verified
    /// first; a broken chain is returned as `LedgerIntegrity`.
    pub fn open(path: &Path) -> Result<Self, ReconError> {
        let mut state = LedgerState::empty();
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let entries = parse_entries(&data)?;
            if let Err(e) = verify_entries(&entries) {
                error!(path = %path.display(), error = %e, "ledger failed verification on open");
                return Err(e);
            }
            for entry in entries {
                state.index(entry);
            }
        }
        state.sink = Some(OpenOptions::new().create(true).append(true).open(path)?);
        state.path = Some(path.to_path_buf());
        debug!(path = %path.display(), entries = state.entries.len(), "ledger opened");
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Append a decision. Returns the stored entry.
    pub fn append(
        &self,
        decision: ConsensusDecision,
        timestamp: DateTime<Utc>,
        actor: Actor,
    ) -> Result<ProvenanceEntry, ReconError> {
        self.append_with_fingerprint(decision, timestamp, actor, None)
    }

    pub fn append_with_fingerprint(
        &self,
        decision: ConsensusDecision,
        timestamp: DateTime<Utc>,
        actor: Actor,
        vote_fingerprint: Option<String>,
    ) -> Result<ProvenanceEntry, ReconError> {
        let mut state = self.state.lock();
        if state.halted {
            return Err(ReconError::LedgerHalted);
        }

        let prev_hash = state
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(genesis_hash);
        let mut entry = ProvenanceEntry {
            seq: state.entries.len() as u64,
            timestamp,
            actor,
            decision,
            vote_fingerprint,
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;

        if let Some(sink) = state.sink.as_mut() {
            let line = serde_json::to_string(&entry)?;
            let written = writeln!(sink, "{line}").and_then(|_| sink.flush());
            if let Err(e) = written {
                // A partial line on disk would break the chain; stop writing.
                state.halted = true;
                error!(error = %e, "ledger write failed; ledger halted");
                return Err(e.into());
            }
        }

        state.index(entry.clone());
        Ok(entry)
    }

    /// The current decision for a key: the latest-timestamped entry.
    pub fn current(&self, record_id: &RecordId, field: &str) -> Option<ConsensusDecision> {
        self.current_entry(record_id, field).map(|e| e.decision)
    }

    pub fn current_entry(&self, record_id: &RecordId, field: &str) -> Option<ProvenanceEntry> {
        let state = self.state.lock();
        let key = (record_id.clone(), field.to_string());
        state.current_index(&key).map(|i| state.entries[i].clone())
    }

    /// Every entry for a key, in append order.
    pub fn history(&self, record_id: &RecordId, field: &str) -> Vec<ProvenanceEntry> {
        let state = self.state.lock();
        let key = (record_id.clone(), field.to_string());
        state
            .by_key
            .get(&key)
            .map(|positions| positions.iter().map(|&i| state.entries[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Current decision for every key, ordered by (record_id, field).
    pub fn current_decisions(&self) -> Vec<ConsensusDecision> {
        let state = self.state.lock();
        let mut out: BTreeMap<&(RecordId, String), &ConsensusDecision> = BTreeMap::new();
        for key in state.by_key.keys() {
            if let Some(i) = state.current_index(key) {
                out.insert(key, &state.entries[i].decision);
            }
        }
        out.into_values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<ProvenanceEntry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    /// Re-verify the chain: the in-memory entries, and the backing file when
    /// there is one (catches edits made behind this handle's back). Halts the
    /// handle on failure.
    pub fn verify(&self) -> Result<usize, ReconError> {
        let mut state = self.state.lock();
        let result = match &state.path {
            Some(path) => std::fs::read_to_string(path)
                .map_err(ReconError::from)
                .and_then(|data| parse_entries(&data))
                .and_then(|on_disk| {
                    verify_entries(&on_disk)?;
                    if on_disk != state.entries {
                        return Err(ReconError::LedgerIntegrity {
                            line: first_divergence(&on_disk, &state.entries),
                            reason: "ledger file diverges from entries written by this process".into(),
                        });
                    }
                    Ok(on_disk.len())
                }),
            None => verify_entries(&state.entries).map(|_| state.entries.len()),
        };
        if let Err(e) = &result {
            if e.is_integrity_failure() {
                state.halted = true;
                error!(error = %e, "ledger verification failed; ledger halted");
            }
        }
        result
    }
}

fn first_divergence(a: &[ProvenanceEntry], b: &[ProvenanceEntry]) -> usize {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| a.len().min(b.len()))
        + 1
}
