//! Per-field consensus: pick a value, its source and a confidence tag from
//! the votes of every extraction method, or hand the field to review.
//!
//! Rules, first match wins:
//! 1. Registry override (title/author only): a preferred registry whose
//!    value fuzzy-matches the anchor supplies the value.
//! 2. Agreement: at least `min_agreement` counted methods (anchor included)
//!    match the anchor. A preferred registry in the agreeing set supplies the
//!    value, otherwise the anchor does.
//! 3. Single source: exactly one informative vote.
//! 4. Otherwise unresolved, with a review item carrying every non-empty vote.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ReconConfig;
use crate::matcher::fuzzy_equal;
use crate::model::{
    Confidence, ConsensusDecision, FieldType, NormalizedValue, RecordId, ReviewItem, VoteMap,
};
use crate::normalize::normalize_votes;

/// Decision for one field plus the review item it spawned, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: ConsensusDecision,
    pub review: Option<ReviewItem>,
    /// Fingerprint of the informative votes the decision was made from.
    pub vote_fingerprint: String,
}

/// Resolve one field of one record. Never fails: malformed votes normalize to
/// canonical-empty and drop out of every count.
pub fn resolve(
    record_id: &RecordId,
    field: &str,
    field_type: FieldType,
    votes: &VoteMap,
    config: &ReconConfig,
) -> Resolution {
    let policy = &config.policy;
    let thresholds = &config.thresholds;

    let informative: BTreeMap<String, NormalizedValue> = normalize_votes(field_type, votes)
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .collect();
    let vote_fingerprint = fingerprint(&informative);

    let decide = |value: &NormalizedValue, method: &str, confidence: Confidence| {
        debug!(%record_id, field, method, %confidence, "field decided");
        Resolution {
            decision: ConsensusDecision {
                record_id: record_id.clone(),
                field: field.to_string(),
                chosen_value: Some(value.as_str().to_string()),
                source_method: Some(method.to_string()),
                confidence,
            },
            review: None,
            vote_fingerprint: vote_fingerprint.clone(),
        }
    };

    if let Some(anchor) = informative.get(&policy.anchor) {
        if field_type.is_fuzzy() {
            for registry in &policy.preferred {
                if let Some(value) = informative.get(registry) {
                    if fuzzy_equal(field_type, value, anchor, thresholds) {
                        return decide(value, registry, Confidence::AutoConsensus);
                    }
                }
            }
        }

        let agreeing: Vec<&str> = informative
            .iter()
            .filter(|(method, _)| !policy.excluded_from_count(method))
            .filter(|(_, value)| fuzzy_equal(field_type, value, anchor, thresholds))
            .map(|(method, _)| method.as_str())
            .collect();

        if agreeing.len() >= policy.min_agreement {
            let registry = policy
                .preferred
                .iter()
                .find(|r| agreeing.contains(&r.as_str()))
                .and_then(|r| informative.get(r).map(|v| (r.as_str(), v)));
            return match registry {
                Some((method, value)) => decide(value, method, Confidence::AutoConsensus),
                None => decide(anchor, &policy.anchor, Confidence::AutoConsensus),
            };
        }
    }

    // Low-trust votes only count as informative when nothing else voted.
    let trusted: Vec<(&String, &NormalizedValue)> = informative
        .iter()
        .filter(|(method, _)| !policy.excluded_from_count(method))
        .collect();
    let single = match (informative.len(), trusted.len()) {
        (1, _) => informative.iter().next(),
        (_, 1) => trusted.first().copied(),
        _ => None,
    };
    if let Some((method, value)) = single {
        return decide(value, method, Confidence::SingleSource);
    }

    debug!(%record_id, field, candidates = informative.len(), "field unresolved");
    let candidates = informative
        .into_iter()
        .map(|(method, value)| (method, value.into_string()))
        .collect();
    Resolution {
        decision: ConsensusDecision::unresolved(record_id.clone(), field),
        review: Some(ReviewItem {
            record_id: record_id.clone(),
            field: field.to_string(),
            candidates,
        }),
        vote_fingerprint,
    }
}

/// `sha256:<hex>` over the sorted `method=value` lines of the informative votes.
pub fn fingerprint(informative: &BTreeMap<String, NormalizedValue>) -> String {
    let mut hasher = Sha256::new();
    for (method, value) in informative {
        hasher.update(method.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_str().as_bytes());
        hasher.update(b"\n");
    }
    format!("sha256:{:x}", hasher.finalize())
}
