//! Extraction adapter boundary.
//!
//! Adapters (LLM, document services, registries, filename heuristics) turn a
//! document into one [`MethodOutput`]. [`collect_votes`] runs a set of them
//! with bounded parallelism and a per-call timeout. A failed or slow adapter
//! degrades to an all-empty output for its method; it never fails the record.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AdapterConfig;
use crate::model::{RawValue, RecordId, RecordVotes};

// ============================================================================
// Types
// ============================================================================

/// Why an adapter produced nothing. Logged, then treated as canonical-empty.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// The document handed to every adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub record_id: RecordId,
    pub path: PathBuf,
}

impl DocumentRef {
    /// Reference a file, deriving the record id from its path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            record_id: RecordId::from_path(&path.to_string_lossy()),
            path,
        }
    }
}

/// One method's raw values for every known field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodOutput {
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub title: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub author: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub year: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub doi: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub author_keywords: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub country: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub source_journal: RawValue,
    #[serde(default, skip_serializing_if = "RawValue::is_absent")]
    pub study_type: RawValue,
}

impl MethodOutput {
    pub fn fields(&self) -> [(&'static str, &RawValue); 8] {
        [
            ("title", &self.title),
            ("author", &self.author),
            ("year", &self.year),
            ("doi", &self.doi),
            ("author_keywords", &self.author_keywords),
            ("country", &self.country),
            ("source_journal", &self.source_journal),
            ("study_type", &self.study_type),
        ]
    }
}

/// A source of votes for one method.
pub trait ExtractionAdapter: Send + Sync {
    fn method(&self) -> &str;
    fn extract(&self, doc: &DocumentRef) -> Result<MethodOutput, AdapterFailure>;
}

// ============================================================================
// Vote sheet
// ============================================================================

/// Outputs of every method for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSheet {
    pub record_id: RecordId,
    pub source: Option<String>,
    outputs: BTreeMap<String, MethodOutput>,
}

impl VoteSheet {
    pub fn from_method_outputs(doc: &DocumentRef, outputs: BTreeMap<String, MethodOutput>) -> Self {
        Self {
            record_id: doc.record_id.clone(),
            source: Some(doc.path.to_string_lossy().into_owned()),
            outputs,
        }
    }

    pub fn output(&self, method: &str) -> Option<&MethodOutput> {
        self.outputs.get(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Pivot method→field into field→method vote maps.
    pub fn into_record_votes(self) -> RecordVotes {
        let mut record = RecordVotes::new(self.record_id);
        record.source = self.source;
        for (method, output) in &self.outputs {
            for (field, raw) in output.fields() {
                record
                    .votes
                    .entry(field.to_string())
                    .or_default()
                    .insert(method.clone(), raw.clone());
            }
        }
        record
    }
}

// ============================================================================
// Harness
// ============================================================================

type Completion = (usize, Result<MethodOutput, AdapterFailure>);

/// Run every adapter against `doc`, at most `max_concurrency` at a time, each
/// bounded by `timeout_ms`. A timed-out call is abandoned; its late result is
/// discarded.
pub fn collect_votes(
    adapters: &[Arc<dyn ExtractionAdapter>],
    doc: &DocumentRef,
    config: &AdapterConfig,
) -> VoteSheet {
    let timeout = Duration::from_millis(config.timeout_ms);
    let max_in_flight = config.max_concurrency.max(1);
    let (tx, rx) = mpsc::channel::<Completion>();

    let mut outputs: BTreeMap<String, MethodOutput> = BTreeMap::new();
    let mut queued = adapters.iter().enumerate();
    let mut in_flight: HashMap<usize, Instant> = HashMap::new();

    let settle = |outputs: &mut BTreeMap<String, MethodOutput>,
                  idx: usize,
                  result: Result<MethodOutput, AdapterFailure>| {
        let method = adapters[idx].method().to_string();
        let output = match result {
            Ok(output) => {
                debug!(record_id = %doc.record_id, method = %method, "adapter returned");
                output
            }
            Err(failure) => {
                warn!(record_id = %doc.record_id, method = %method, %failure, "adapter failure");
                MethodOutput::default()
            }
        };
        outputs.insert(method, output);
    };

    loop {
        while in_flight.len() < max_in_flight {
            let Some((idx, adapter)) = queued.next() else {
                break;
            };
            let adapter = Arc::clone(adapter);
            let doc = doc.clone();
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("adapter-{}", adapter.method()))
                .spawn(move || {
                    let result = adapter.extract(&doc);
                    // Receiver may be gone if this call already timed out.
                    let _ = tx.send((idx, result));
                });
            match spawned {
                Ok(_) => {
                    in_flight.insert(idx, Instant::now() + timeout);
                }
                Err(e) => settle(&mut outputs, idx, Err(AdapterFailure::Unavailable(e.to_string()))),
            }
        }

        let Some(next_deadline) = in_flight.values().min().copied() else {
            break;
        };
        match rx.recv_timeout(next_deadline.saturating_duration_since(Instant::now())) {
            Ok((idx, result)) => {
                if in_flight.remove(&idx).is_some() {
                    settle(&mut outputs, idx, result);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                let expired: Vec<usize> = in_flight
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(idx, _)| *idx)
                    .collect();
                for idx in expired {
                    in_flight.remove(&idx);
                    settle(&mut outputs, idx, Err(AdapterFailure::Timeout(timeout)));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    VoteSheet::from_method_outputs(doc, outputs)
}

// ============================================================================
// Filename heuristics
// ============================================================================

/// `Author - 2019 - Title.pdf`, the usual reference-manager export name.
static FILENAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s*-\s*(\d{4})\s*-\s*(.+?)(?:\.pdf)?$").expect("static regex"));
static AUTHOR_PREFIX_JUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(copy of\s*|\s*final\s*|\s*v\d+\s*|\s*-+\s*)+").expect("static regex"));
/// DOI in a file name. `/` cannot appear in a name, so `_` stands in for it.
static DOI_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(10\.\d{4,9})[/_]([\w.\-]+)").expect("static regex"));

/// Offline adapter that reads author, year, title and DOI from the file name.
/// Low-trust by default: it rarely errs on year but often on everything else.
#[derive(Debug, Default, Clone)]
pub struct FilenameAdapter;

impl FilenameAdapter {
    pub const METHOD: &'static str = "filename";
}

fn clean_author(raw: &str) -> String {
    let stripped = AUTHOR_PREFIX_JUNK.replace(raw, "");
    let author = stripped.replace(['_', '-'], " ");
    let author = author.trim().trim_end_matches('.').trim();
    if author.chars().count() > 2 && !author.chars().all(|c| c.is_ascii_digit()) {
        author.to_string()
    } else {
        String::new()
    }
}

fn text(s: String) -> RawValue {
    if s.is_empty() {
        RawValue::Absent
    } else {
        RawValue::Text(s)
    }
}

impl ExtractionAdapter for FilenameAdapter {
    fn method(&self) -> &str {
        Self::METHOD
    }

    fn extract(&self, doc: &DocumentRef) -> Result<MethodOutput, AdapterFailure> {
        let name = doc
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AdapterFailure::BadResponse(format!("no file name in {}", doc.path.display())))?;

        let mut output = MethodOutput::default();
        if let Some(caps) = FILENAME_PATTERN.captures(&name) {
            output.author = text(clean_author(&caps[1]));
            output.year = text(caps[2].to_string());
            output.title = text(caps[3].replace('_', " ").trim().to_string());
        } else {
            debug!(file = %name, "file name does not follow the author - year - title pattern");
        }
        let stem = strip_pdf_extension(&name);
        if let Some(caps) = DOI_IN_NAME.captures(stem) {
            output.doi = text(format!("{}/{}", &caps[1], &caps[2]));
        }
        Ok(output)
    }
}

fn strip_pdf_extension(name: &str) -> &str {
    let path = Path::new(name);
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => &name[..name.len() - 4],
        _ => name,
    }
}
