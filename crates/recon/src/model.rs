use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable, content-derived identifier of one document under review.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Short id derived from the originating path: `paper_ID_<8 hex>`.
    pub fn from_path(path: &str) -> Self {
        let digest = Sha256::digest(path.as_bytes());
        let hex = format!("{digest:x}");
        Self(format!("paper_ID_{}", &hex[..8]))
    }

    /// Full SHA-256 of the document bytes.
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

/// Semantic type of a field. Drives normalization and matching rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Doi,
    KeywordList,
    AuthorList,
    CountryList,
    Title,
    Year,
    SourceJournal,
    StudyType,
}

impl FieldType {
    /// Field types where fuzzy similarity can establish agreement.
    pub fn is_fuzzy(&self) -> bool {
        matches!(self, Self::Title | Self::AuthorList)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doi => write!(f, "doi"),
            Self::KeywordList => write!(f, "keyword_list"),
            Self::AuthorList => write!(f, "author_list"),
            Self::CountryList => write!(f, "country_list"),
            Self::Title => write!(f, "title"),
            Self::Year => write!(f, "year"),
            Self::SourceJournal => write!(f, "source_journal"),
            Self::StudyType => write!(f, "study_type"),
        }
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// A raw value as produced by one extraction method.
///
/// Deserializes from any JSON value: strings and string lists are kept,
/// numbers and booleans become text, `null` is `Absent`, and anything else
/// is `Malformed` (normalizes to canonical-empty).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum RawValue {
    #[default]
    Absent,
    Text(String),
    List(Vec<String>),
    Malformed(String),
}

impl RawValue {
    /// True when the method produced nothing at all.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Absent,
            Value::String(s) => Self::Text(s),
            Value::Number(n) => Self::Text(n.to_string()),
            Value::Bool(b) => Self::Text(b.to_string()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Null => {}
                        Value::String(s) => out.push(s),
                        Value::Number(n) => out.push(n.to_string()),
                        other => return Self::Malformed(other.to_string()),
                    }
                }
                Self::List(out)
            }
            Value::Object(_) => Self::Malformed(value.to_string()),
        }
    }
}

impl From<RawValue> for serde_json::Value {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Absent => serde_json::Value::Null,
            RawValue::Text(s) | RawValue::Malformed(s) => serde_json::Value::String(s),
            RawValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::String).collect())
            }
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<&str>> for RawValue {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(str::to_string).collect())
    }
}

/// Votes for one field of one record: method name -> raw value.
pub type VoteMap = BTreeMap<String, RawValue>;

/// All vote maps of one record, keyed by field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordVotes {
    pub record_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub votes: BTreeMap<String, VoteMap>,
}

impl RecordVotes {
    pub fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            source: None,
            votes: BTreeMap::new(),
        }
    }

    /// Builder-style helper used by adapters and tests.
    pub fn with_vote(mut self, field: &str, method: &str, raw: impl Into<RawValue>) -> Self {
        self.votes
            .entry(field.to_string())
            .or_default()
            .insert(method.to_string(), raw.into());
        self
    }

    pub fn field_votes(&self, field: &str) -> Option<&VoteMap> {
        self.votes.get(field)
    }
}

// ---------------------------------------------------------------------------
// Normalized values
// ---------------------------------------------------------------------------

/// Canonical comparable form of a raw value. The empty string is the
/// canonical-empty value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedValue(String);

impl NormalizedValue {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    AutoConsensus,
    SingleSource,
    HumanResolved,
    Unresolved,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoConsensus => "auto_consensus",
            Self::SingleSource => "single_source",
            Self::HumanResolved => "human_resolved",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_consensus" => Some(Self::AutoConsensus),
            "single_source" => Some(Self::SingleSource),
            "human_resolved" => Some(Self::HumanResolved),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision for one field of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub record_id: RecordId,
    pub field: String,
    pub chosen_value: Option<String>,
    pub source_method: Option<String>,
    pub confidence: Confidence,
}

impl ConsensusDecision {
    pub fn unresolved(record_id: RecordId, field: &str) -> Self {
        Self {
            record_id,
            field: field.to_string(),
            chosen_value: None,
            source_method: None,
            confidence: Confidence::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.confidence != Confidence::Unresolved
    }
}

/// A field that could not be auto-resolved, with the competing values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub record_id: RecordId,
    pub field: String,
    /// Non-empty normalized votes, keyed by method.
    pub candidates: BTreeMap<String, String>,
}

/// Who produced a ledger entry: the engine or a named reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Actor {
    Auto,
    Reviewer(String),
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        if s == "auto" {
            Self::Auto
        } else {
            Self::Reviewer(s)
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.to_string()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Reviewer(name) => f.write_str(name),
        }
    }
}
