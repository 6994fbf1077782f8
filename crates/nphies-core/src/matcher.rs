//! Resolve a classified message to at most one local business record.
//!
//! Strategies run in fixed priority order:
//!
//! 1. direct correlation (solicited messages only)
//! 2. business identifier carried in the payload
//! 3. counterpart heuristic (patient + provider + service-date window)
//!
//! The first strategy with exactly one candidate wins. A strategy with more
//! than one candidate ends matching as ambiguous; lower-priority strategies
//! are not consulted, so an ambiguity is never resolved by a weaker signal.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::classifier::ClassifiedMessage;
use crate::config::MatchingConfig;
use crate::error::Result;
use crate::payload::{self, CounterpartKeys};
use crate::types::{BusinessTable, MatchStrategy, MessageType};

/// Candidate lookups against business tables. Each lookup returns at most
/// `limit` record ids.
pub trait RecordIndex: Send + Sync {
    fn by_correlation(&self, table: BusinessTable, correlation_id: &str, limit: usize) -> Result<Vec<i64>>;

    fn by_business_id(&self, table: BusinessTable, business_id: &str, limit: usize) -> Result<Vec<i64>>;

    fn by_counterparts(
        &self,
        table: BusinessTable,
        keys: &CounterpartKeys,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<i64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// The resource type has no business table.
    Unroutable,
    NoCandidate,
    Ambiguous {
        strategy: MatchStrategy,
        candidates: usize,
    },
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::Unroutable => f.write_str("no business table for resource type"),
            UnmatchedReason::NoCandidate => f.write_str("no candidate record"),
            UnmatchedReason::Ambiguous {
                strategy,
                candidates,
            } => write!(f, "{candidates} candidates via {strategy}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched {
        table: BusinessTable,
        record_id: i64,
        strategy: MatchStrategy,
    },
    /// No local record exists and policy allows creating one.
    Create { table: BusinessTable },
    Unmatched { reason: UnmatchedReason },
}

impl MatchOutcome {
    pub fn strategy(&self) -> Option<MatchStrategy> {
        match self {
            MatchOutcome::Matched { strategy, .. } => Some(*strategy),
            MatchOutcome::Create { .. } => Some(MatchStrategy::PayerInitiated),
            MatchOutcome::Unmatched { .. } => None,
        }
    }
}

enum Probe {
    One(i64),
    None,
    Many(usize),
}

fn probe(ids: impl IntoIterator<Item = i64>) -> Probe {
    let set: BTreeSet<i64> = ids.into_iter().collect();
    match set.len() {
        0 => Probe::None,
        1 => set.into_iter().next().map_or(Probe::None, Probe::One),
        n => Probe::Many(n),
    }
}

pub struct Matcher<'a> {
    index: &'a dyn RecordIndex,
    config: &'a MatchingConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(index: &'a dyn RecordIndex, config: &'a MatchingConfig) -> Self {
        Self { index, config }
    }

    /// Lookup failures propagate; they are per-message errors, not no-match.
    pub fn match_message(&self, msg: &ClassifiedMessage) -> Result<MatchOutcome> {
        let Some(table) = payload::route(&msg.resource_type, msg.event_code.as_deref(), &msg.payload)
        else {
            return Ok(MatchOutcome::Unmatched {
                reason: UnmatchedReason::Unroutable,
            });
        };

        let strategies = [
            MatchStrategy::DirectCorrelation,
            MatchStrategy::BusinessIdentifier,
            MatchStrategy::Heuristic,
        ];
        for strategy in strategies {
            match self.run(strategy, table, msg)? {
                Probe::One(record_id) => {
                    return Ok(MatchOutcome::Matched {
                        table,
                        record_id,
                        strategy,
                    })
                }
                Probe::Many(candidates) => {
                    return Ok(MatchOutcome::Unmatched {
                        reason: UnmatchedReason::Ambiguous {
                            strategy,
                            candidates,
                        },
                    })
                }
                Probe::None => {}
            }
        }

        if msg.message_type == MessageType::Unsolicited && self.config.may_create(table) {
            return Ok(MatchOutcome::Create { table });
        }
        Ok(MatchOutcome::Unmatched {
            reason: UnmatchedReason::NoCandidate,
        })
    }

    fn run(&self, strategy: MatchStrategy, table: BusinessTable, msg: &ClassifiedMessage) -> Result<Probe> {
        match strategy {
            MatchStrategy::DirectCorrelation => match msg.correlation_id() {
                Some(id) => Ok(probe(self.index.by_correlation(table, id, 2)?)),
                None => Ok(Probe::None),
            },
            MatchStrategy::BusinessIdentifier => {
                let mut hits = Vec::new();
                for id in payload::business_identifiers(&msg.payload) {
                    hits.extend(self.index.by_business_id(table, &id, 2)?);
                }
                Ok(probe(hits))
            }
            MatchStrategy::Heuristic => {
                let bound = self.config.max_heuristic_candidates;
                if bound == 0 {
                    return Ok(Probe::None);
                }
                match payload::counterpart_keys(&msg.payload) {
                    Some(keys) => {
                        let hits = self.index.by_counterparts(
                            table,
                            &keys,
                            self.config.heuristic_window_days,
                            bound + 1,
                        )?;
                        Ok(probe(hits))
                    }
                    None => Ok(Probe::None),
                }
            }
            MatchStrategy::PayerInitiated => Ok(Probe::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RawMessage;
    use crate::classifier::classify;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Index backed by fixed answers keyed by lookup value.
    #[derive(Default)]
    struct FakeIndex {
        correlation: HashMap<String, Vec<i64>>,
        business: HashMap<String, Vec<i64>>,
        counterparts: Vec<i64>,
    }

    impl RecordIndex for FakeIndex {
        fn by_correlation(&self, _: BusinessTable, id: &str, limit: usize) -> Result<Vec<i64>> {
            let mut ids = self.correlation.get(id).cloned().unwrap_or_default();
            ids.truncate(limit);
            Ok(ids)
        }

        fn by_business_id(&self, _: BusinessTable, id: &str, limit: usize) -> Result<Vec<i64>> {
            let mut ids = self.business.get(id).cloned().unwrap_or_default();
            ids.truncate(limit);
            Ok(ids)
        }

        fn by_counterparts(
            &self,
            _: BusinessTable,
            _: &CounterpartKeys,
            _: u32,
            limit: usize,
        ) -> Result<Vec<i64>> {
            let mut ids = self.counterparts.clone();
            ids.truncate(limit);
            Ok(ids)
        }
    }

    fn message(resource_type: &str, correlation: Option<&str>, payload: Value) -> ClassifiedMessage {
        classify(RawMessage {
            entry_index: 0,
            resource_type: resource_type.to_string(),
            event_code: None,
            correlation: correlation.map(str::to_string),
            payload,
        })
    }

    fn payment_notice() -> Value {
        json!({
            "resourceType": "PaymentNotice",
            "patient": { "identifier": { "value": "pat-1" } },
            "provider": { "identifier": { "value": "prov-1" } },
            "created": "2026-03-10"
        })
    }

    #[test]
    fn correlation_beats_business_identifier() {
        let mut index = FakeIndex::default();
        index.correlation.insert("req-1".into(), vec![10]);
        index.business.insert("CLM-1".into(), vec![20]);
        let config = MatchingConfig::default();
        let msg = message(
            "ClaimResponse",
            Some("req-1"),
            json!({ "identifier": [{ "value": "CLM-1" }] }),
        );
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                table: BusinessTable::ClaimSubmissions,
                record_id: 10,
                strategy: MatchStrategy::DirectCorrelation,
            }
        );
    }

    #[test]
    fn falls_through_to_business_identifier() {
        let mut index = FakeIndex::default();
        index.business.insert("CLM-1".into(), vec![20]);
        let config = MatchingConfig::default();
        let msg = message(
            "ClaimResponse",
            Some("req-unknown"),
            json!({ "identifier": [{ "value": "CLM-1" }] }),
        );
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert_eq!(outcome.strategy(), Some(MatchStrategy::BusinessIdentifier));
    }

    #[test]
    fn two_heuristic_candidates_are_ambiguous() {
        let index = FakeIndex {
            counterparts: vec![3, 4],
            ..Default::default()
        };
        let config = MatchingConfig::default();
        let msg = message("PaymentNotice", None, payment_notice());
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Unmatched {
                reason: UnmatchedReason::Ambiguous {
                    strategy: MatchStrategy::Heuristic,
                    candidates: 2,
                }
            }
        );
    }

    #[test]
    fn single_heuristic_candidate_matches() {
        let index = FakeIndex {
            counterparts: vec![3],
            ..Default::default()
        };
        let config = MatchingConfig::default();
        let msg = message("PaymentNotice", None, payment_notice());
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert_eq!(outcome.strategy(), Some(MatchStrategy::Heuristic));
    }

    #[test]
    fn zero_candidate_bound_disables_heuristic() {
        let index = FakeIndex {
            counterparts: vec![3],
            ..Default::default()
        };
        let config = MatchingConfig {
            max_heuristic_candidates: 0,
            ..MatchingConfig::default()
        };
        let msg = message("PaymentNotice", None, payment_notice());
        assert_eq!(
            Matcher::new(&index, &config).match_message(&msg).unwrap(),
            MatchOutcome::Unmatched {
                reason: UnmatchedReason::NoCandidate
            }
        );
    }

    #[test]
    fn ambiguity_stops_lower_strategies() {
        let mut index = FakeIndex {
            counterparts: vec![3],
            ..Default::default()
        };
        index.business.insert("CLM-1".into(), vec![20, 21]);
        let config = MatchingConfig::default();
        let mut payload = payment_notice();
        payload["identifier"] = json!([{ "value": "CLM-1" }]);
        let msg = message("PaymentNotice", None, payload);
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert!(matches!(
            outcome,
            MatchOutcome::Unmatched {
                reason: UnmatchedReason::Ambiguous {
                    strategy: MatchStrategy::BusinessIdentifier,
                    ..
                }
            }
        ));
    }

    #[test]
    fn same_record_under_two_identifiers_is_one_candidate() {
        let mut index = FakeIndex::default();
        index.business.insert("PA-1".into(), vec![5]);
        index.business.insert("REF-9".into(), vec![5]);
        let config = MatchingConfig::default();
        let msg = message(
            "ClaimResponse",
            None,
            json!({ "preAuthRef": ["PA-1"], "identifier": [{ "value": "REF-9" }] }),
        );
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert_eq!(outcome.strategy(), Some(MatchStrategy::BusinessIdentifier));
    }

    #[test]
    fn unknown_type_skips_correlation_and_never_creates() {
        let mut index = FakeIndex::default();
        index.correlation.insert("bad id!".into(), vec![1]);
        let config = MatchingConfig::default();
        let msg = message("Communication", Some("bad id!"), json!({ "status": "active" }));
        assert_eq!(msg.message_type, MessageType::Unknown);
        let outcome = Matcher::new(&index, &config).match_message(&msg).unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Unmatched {
                reason: UnmatchedReason::NoCandidate
            }
        );
    }

    #[test]
    fn unsolicited_creates_only_where_policy_allows() {
        let index = FakeIndex::default();
        let config = MatchingConfig::default();
        let comm = message("Communication", None, json!({ "status": "active" }));
        assert_eq!(
            Matcher::new(&index, &config).match_message(&comm).unwrap(),
            MatchOutcome::Create {
                table: BusinessTable::Communications
            }
        );
        let notice = message("PaymentNotice", None, payment_notice());
        assert!(matches!(
            Matcher::new(&index, &config).match_message(&notice).unwrap(),
            MatchOutcome::Unmatched { .. }
        ));
    }

    #[test]
    fn unroutable_resource_is_unmatched() {
        let index = FakeIndex::default();
        let config = MatchingConfig::default();
        let msg = message("Patient", None, json!({}));
        assert_eq!(
            Matcher::new(&index, &config).match_message(&msg).unwrap(),
            MatchOutcome::Unmatched {
                reason: UnmatchedReason::Unroutable
            }
        );
    }
}
