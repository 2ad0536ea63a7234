// Property-based tests for normalization, matching, consensus and the ledger.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use biblio_recon::config::{ReconConfig, ThresholdConfig};
use biblio_recon::consensus::resolve;
use biblio_recon::ledger::ProvenanceLedger;
use biblio_recon::matcher::{equal, fuzzy_equal};
use biblio_recon::model::{
    Actor, Confidence, ConsensusDecision, FieldType, NormalizedValue, RawValue, RecordId, VoteMap,
};
use biblio_recon::normalize::normalize;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn arb_field_type() -> impl Strategy<Value = FieldType> {
    prop_oneof![
        Just(FieldType::Doi),
        Just(FieldType::KeywordList),
        Just(FieldType::AuthorList),
        Just(FieldType::CountryList),
        Just(FieldType::Title),
        Just(FieldType::Year),
        Just(FieldType::SourceJournal),
        Just(FieldType::StudyType),
    ]
}

/// Raw text shaped like real extractor output for any field.
fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        2 => r"[A-Za-z][A-Za-z ]{0,30}",
        1 => r"(https?://(dx\.)?doi\.org/)?10\.[0-9]{4}/[A-Za-z0-9.]{1,10}",
        1 => r"([A-Z][a-z]{1,8}( [A-Z])?)((; |, | & | and )[A-Z][a-z]{1,8}( [A-Z])?){0,3}",
        1 => r"([a-z]{2,10})([;,/|] ?[A-Za-z]{2,10}){0,4}",
        1 => r"(us|GB|nz|au|[A-Z][a-z]{3,8})(; ?(us|GB|ca|[A-Z][a-z]{3,8})){0,3}",
        1 => r"(19|20)[0-9]{2}",
        1 => prop_oneof![Just("null".to_string()), Just("None".to_string()), Just(" ".to_string())],
    ]
}

fn arb_raw() -> impl Strategy<Value = RawValue> {
    prop_oneof![
        4 => arb_text().prop_map(RawValue::Text),
        1 => prop::collection::vec(r"[A-Z][a-z]{1,8}( [A-Z])?", 1..4).prop_map(RawValue::List),
        1 => Just(RawValue::Absent),
    ]
}

fn arb_votes() -> impl Strategy<Value = VoteMap> {
    let methods = ["llm", "grobid", "fitz", "pdfplumber", "filename", "crossref", "openalex"];
    prop::collection::vec(arb_raw(), methods.len()).prop_map(move |raws| {
        methods
            .iter()
            .zip(raws)
            .map(|(m, raw)| (m.to_string(), raw))
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Normalization + matching
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn normalization_is_idempotent(ft in arb_field_type(), raw in arb_raw()) {
        let once = normalize(ft, &raw);
        let twice = normalize(ft, &RawValue::Text(once.as_str().to_string()));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn equal_implies_fuzzy_equal(ft in arb_field_type(), a in arb_raw(), b in arb_raw()) {
        let thresholds = ThresholdConfig::default();
        let a = normalize(ft, &a);
        let b = normalize(ft, &b);
        if equal(ft, &a, &b) {
            prop_assert!(fuzzy_equal(ft, &a, &b, &thresholds));
        }
        // Every value is equal to itself unless empty.
        prop_assert_eq!(equal(ft, &a, &a), !a.is_empty());
    }

    #[test]
    fn empty_never_matches(ft in arb_field_type(), other in arb_raw()) {
        let thresholds = ThresholdConfig::default();
        let empty = NormalizedValue::empty();
        let other = normalize(ft, &other);
        prop_assert!(!equal(ft, &empty, &other));
        prop_assert!(!fuzzy_equal(ft, &empty, &other, &thresholds));
        prop_assert!(!fuzzy_equal(ft, &other, &empty, &thresholds));
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn resolve_is_deterministic(ft in arb_field_type(), votes in arb_votes()) {
        let config = ReconConfig::default();
        let id = RecordId::from("r1");
        let a = resolve(&id, "f", ft, &votes, &config);
        let b = resolve(&id, "f", ft, &votes, &config);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn two_corroborators_give_auto_consensus(year in r"(19|20)[0-9]{2}", noise in arb_votes()) {
        let mut votes = noise;
        for method in ["llm", "grobid", "fitz"] {
            votes.insert(method.to_string(), RawValue::Text(year.clone()));
        }
        let r = resolve(&RecordId::from("r1"), "year", FieldType::Year, &votes, &ReconConfig::default());
        prop_assert_eq!(r.decision.confidence, Confidence::AutoConsensus);
        prop_assert_eq!(r.decision.chosen_value.as_deref(), Some(year.as_str()));
    }

    #[test]
    fn unresolved_iff_review_item(ft in arb_field_type(), votes in arb_votes()) {
        let r = resolve(&RecordId::from("r1"), "f", ft, &votes, &ReconConfig::default());
        prop_assert_eq!(r.review.is_some(), r.decision.confidence == Confidence::Unresolved);
        if let Some(item) = r.review {
            prop_assert!(item.candidates.values().all(|v| !v.is_empty()));
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn current_is_max_timestamp(offsets in prop::collection::vec(0i64..1_000, 1..20)) {
        let ledger = ProvenanceLedger::in_memory();
        let id = RecordId::from("r1");
        let mut best: Option<(i64, usize)> = None;
        for (i, offset) in offsets.iter().enumerate() {
            let decision = ConsensusDecision {
                record_id: id.clone(),
                field: "year".into(),
                chosen_value: Some(i.to_string()),
                source_method: Some("llm".into()),
                confidence: Confidence::SingleSource,
            };
            let ts = Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap();
            ledger.append(decision, ts, Actor::Auto).unwrap();
            if best.map_or(true, |(b, _)| *offset >= b) {
                best = Some((*offset, i));
            }
            prop_assert_eq!(ledger.history(&id, "year").len(), i + 1);
        }
        let expected = best.map(|(_, i)| i.to_string());
        prop_assert_eq!(ledger.current(&id, "year").unwrap().chosen_value, expected);
        prop_assert!(ledger.verify().is_ok());
    }
}
