use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::FieldType;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Field name -> field type for every field the run reconciles.
    #[serde(default = "default_fields")]
    pub fields: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub adapters: AdapterConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            policy: PolicyConfig::default(),
            thresholds: ThresholdConfig::default(),
            fields: default_fields(),
            adapters: AdapterConfig::default(),
        }
    }
}

fn default_name() -> String {
    "bibliographic-metadata".into()
}

fn default_fields() -> BTreeMap<String, FieldType> {
    [
        ("title", FieldType::Title),
        ("author", FieldType::AuthorList),
        ("year", FieldType::Year),
        ("doi", FieldType::Doi),
        ("author_keywords", FieldType::KeywordList),
        ("country", FieldType::CountryList),
        ("source_journal", FieldType::SourceJournal),
        ("study_type", FieldType::StudyType),
    ]
    .into_iter()
    .map(|(name, ty)| (name.to_string(), ty))
    .collect()
}

// ---------------------------------------------------------------------------
// Consensus policy
// ---------------------------------------------------------------------------

/// Which methods anchor, override and corroborate a decision.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Method whose value is the default candidate (the language-model extractor).
    #[serde(default = "default_anchor")]
    pub anchor: String,
    /// Bibliographic registries, in priority order.
    #[serde(default = "default_preferred")]
    pub preferred: Vec<String>,
    /// Methods that may not count toward agreement (filename heuristics).
    #[serde(default = "default_low_trust")]
    pub low_trust: Vec<String>,
    /// Let low-trust methods count toward agreement anyway.
    #[serde(default)]
    pub low_trust_corroborates: bool,
    /// Agreeing methods (anchor included) needed for auto consensus.
    #[serde(default = "default_min_agreement")]
    pub min_agreement: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            anchor: default_anchor(),
            preferred: default_preferred(),
            low_trust: default_low_trust(),
            low_trust_corroborates: false,
            min_agreement: default_min_agreement(),
        }
    }
}

impl PolicyConfig {
    pub fn is_preferred(&self, method: &str) -> bool {
        self.preferred.iter().any(|m| m == method)
    }

    /// Low-trust methods excluded from the agreement count under this policy.
    pub fn excluded_from_count(&self, method: &str) -> bool {
        !self.low_trust_corroborates && self.low_trust.iter().any(|m| m == method)
    }
}

fn default_anchor() -> String {
    "llm".into()
}

fn default_preferred() -> Vec<String> {
    vec!["openalex".into(), "crossref".into()]
}

fn default_low_trust() -> Vec<String> {
    vec!["filename".into()]
}

fn default_min_agreement() -> usize {
    2
}

// ---------------------------------------------------------------------------
// Thresholds + adapters
// ---------------------------------------------------------------------------

/// Fuzzy-match similarity thresholds. Empirical, not domain law.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_title_threshold")]
    pub title: f64,
    #[serde(default = "default_author_threshold")]
    pub author_list: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            title: default_title_threshold(),
            author_list: default_author_threshold(),
        }
    }
}

fn default_title_threshold() -> f64 {
    0.88
}

fn default_author_threshold() -> f64 {
    0.82
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        for (label, value) in [
            ("thresholds.title", self.thresholds.title),
            ("thresholds.author_list", self.thresholds.author_list),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ReconError::ConfigValidation(format!(
                    "{label} must be in (0, 1], got {value}"
                )));
            }
        }

        let policy = &self.policy;
        if policy.anchor.trim().is_empty() {
            return Err(ReconError::ConfigValidation("policy.anchor must not be empty".into()));
        }
        if policy.is_preferred(&policy.anchor) {
            return Err(ReconError::ConfigValidation(format!(
                "anchor '{}' cannot also be a preferred registry",
                policy.anchor
            )));
        }
        if policy.low_trust.iter().any(|m| *m == policy.anchor) {
            return Err(ReconError::ConfigValidation(format!(
                "anchor '{}' cannot be low-trust",
                policy.anchor
            )));
        }
        if policy.min_agreement == 0 {
            return Err(ReconError::ConfigValidation(
                "policy.min_agreement must be at least 1".into(),
            ));
        }

        if self.fields.is_empty() {
            return Err(ReconError::ConfigValidation("at least one field is required".into()));
        }

        if self.adapters.max_concurrency == 0 {
            return Err(ReconError::ConfigValidation(
                "adapters.max_concurrency must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Field type for a reconciled field name.
    pub fn field_type(&self, field: &str) -> Result<FieldType, ReconError> {
        self.fields
            .get(field)
            .copied()
            .ok_or_else(|| ReconError::UnknownField(field.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
