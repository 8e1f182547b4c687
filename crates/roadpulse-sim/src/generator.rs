//! Fault-injecting change-feed generator.
//!
//! The generator keeps the source-side truth (which identities exist and
//! their latest payload) and emits the change events a live query would
//! deliver for it, then perturbs delivery the way a real feed can:
//! redelivered `Added`, `Modified` for an identity the client never saw,
//! repeated `Removed`, removals for identities that never existed, and
//! arbitrary batch boundaries. None of these faults change what the final
//! view must contain.

use std::collections::BTreeMap;

use roadpulse_core::feed::{ChangeEvent, ChangeKind};
use roadpulse_core::model::RecordId;
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Delivery fault probabilities, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// An `Added` is delivered twice in a row.
    pub duplicate_added_percent: u8,
    /// A first appearance is delivered as `Modified`.
    pub modified_before_added_percent: u8,
    /// A `Removed` is delivered twice in a row.
    pub redeliver_removed_percent: u8,
    /// A `Removed` arrives for an identity that never existed.
    pub stray_removed_percent: u8,
    /// Chance of closing the batch after each step.
    pub split_batch_percent: u8,
    /// Hard cap on events per batch.
    pub max_batch_len: usize,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            duplicate_added_percent: 10,
            modified_before_added_percent: 10,
            redeliver_removed_percent: 10,
            stray_removed_percent: 5,
            split_batch_percent: 25,
            max_batch_len: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    DuplicateAdded,
    ModifiedBeforeAdded,
    RedeliveredRemoved,
    StrayRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    Emit {
        id: RecordId,
        kind: ChangeKind,
        value: Option<u32>,
    },
    Fault {
        fault: FaultKind,
        id: RecordId,
    },
    BatchClosed {
        len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: u64,
    /// Index of the batch the event belongs to.
    pub batch: usize,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// Everything one generator run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFeed {
    pub batches: Vec<Vec<ChangeEvent<u32>>>,
    /// Source-side state after the last step.
    pub truth: BTreeMap<RecordId, u32>,
    pub trace: Vec<TraceEvent>,
}

/// Stable name of the identity at `index`.
#[must_use]
pub fn identity_name(index: usize) -> RecordId {
    RecordId::new(format!("rec-{index:03}"))
}

pub struct FeedGenerator {
    fault: FaultConfig,
    identities: usize,
    source: BTreeMap<RecordId, u32>,
    batches: Vec<Vec<ChangeEvent<u32>>>,
    current: Vec<ChangeEvent<u32>>,
    trace: Vec<TraceEvent>,
    next_value: u32,
    step: u64,
}

impl FeedGenerator {
    #[must_use]
    pub const fn new(identities: usize, fault: FaultConfig) -> Self {
        Self {
            fault,
            identities,
            source: BTreeMap::new(),
            batches: Vec::new(),
            current: Vec::new(),
            trace: Vec::new(),
            next_value: 0,
            step: 0,
        }
    }

    /// Advance the source by one change and deliver it.
    pub fn step(&mut self, rng: &mut DeterministicRng) {
        self.step += 1;

        if rng.hit_rate_percent(self.fault.stray_removed_percent) {
            let ghost = RecordId::new(format!("ghost-{}", self.step));
            self.fault(FaultKind::StrayRemoved, &ghost);
            self.emit(ChangeEvent::removed(ghost));
        }

        let id = identity_name(rng.pick(self.identities));
        if self.source.contains_key(&id) {
            if rng.next_bounded(100) < 30 {
                self.source.remove(&id);
                self.emit(ChangeEvent::removed(id.clone()));
                if rng.hit_rate_percent(self.fault.redeliver_removed_percent) {
                    self.fault(FaultKind::RedeliveredRemoved, &id);
                    self.emit(ChangeEvent::removed(id));
                }
            } else {
                let value = self.fresh_value();
                self.source.insert(id.clone(), value);
                self.emit(ChangeEvent::modified(id, value));
            }
        } else {
            let value = self.fresh_value();
            self.source.insert(id.clone(), value);
            if rng.hit_rate_percent(self.fault.modified_before_added_percent) {
                self.fault(FaultKind::ModifiedBeforeAdded, &id);
                self.emit(ChangeEvent::modified(id, value));
            } else {
                self.emit(ChangeEvent::added(id.clone(), value));
                if rng.hit_rate_percent(self.fault.duplicate_added_percent) {
                    self.fault(FaultKind::DuplicateAdded, &id);
                    self.emit(ChangeEvent::added(id, value));
                }
            }
        }

        let full = self.current.len() >= self.fault.max_batch_len.max(1);
        if full || rng.hit_rate_percent(self.fault.split_batch_percent) {
            self.close_batch();
        }
    }

    /// Flush the trailing batch and hand over the feed.
    #[must_use]
    pub fn finish(mut self) -> GeneratedFeed {
        self.close_batch();
        GeneratedFeed {
            batches: self.batches,
            truth: self.source,
            trace: self.trace,
        }
    }

    const fn fresh_value(&mut self) -> u32 {
        self.next_value += 1;
        self.next_value
    }

    fn emit(&mut self, event: ChangeEvent<u32>) {
        self.trace.push(TraceEvent {
            step: self.step,
            batch: self.batches.len(),
            kind: TraceEventKind::Emit {
                id: event.id.clone(),
                kind: event.kind(),
                value: event.payload().copied(),
            },
        });
        self.current.push(event);
    }

    fn fault(&mut self, fault: FaultKind, id: &RecordId) {
        self.trace.push(TraceEvent {
            step: self.step,
            batch: self.batches.len(),
            kind: TraceEventKind::Fault {
                fault,
                id: id.clone(),
            },
        });
    }

    fn close_batch(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.current);
        self.trace.push(TraceEvent {
            step: self.step,
            batch: self.batches.len(),
            kind: TraceEventKind::BatchClosed { len: batch.len() },
        });
        self.batches.push(batch);
    }
}

/// Last delivered state per identity, replaying `batches` in order.
#[must_use]
pub fn last_event_state(batches: &[Vec<ChangeEvent<u32>>]) -> BTreeMap<RecordId, u32> {
    let mut state = BTreeMap::new();
    for event in batches.iter().flatten() {
        match event.payload() {
            Some(value) => {
                state.insert(event.id.clone(), *value);
            }
            None => {
                state.remove(&event.id);
            }
        }
    }
    state
}

/// Number of absent-to-present transitions per identity in the delivered
/// stream. A correct synchronizer creates exactly this many handles.
#[must_use]
pub fn lifecycles(batches: &[Vec<ChangeEvent<u32>>]) -> BTreeMap<RecordId, usize> {
    let mut present = BTreeMap::new();
    let mut counts: BTreeMap<RecordId, usize> = BTreeMap::new();
    for event in batches.iter().flatten() {
        let now_present = event.payload().is_some();
        let was_present = present.insert(event.id.clone(), now_present).unwrap_or(false);
        if now_present && !was_present {
            *counts.entry(event.id.clone()).or_default() += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(seed: u64, steps: u64, fault: FaultConfig) -> GeneratedFeed {
        let mut rng = DeterministicRng::new(seed);
        let mut generator = FeedGenerator::new(6, fault);
        for _ in 0..steps {
            generator.step(&mut rng);
        }
        generator.finish()
    }

    #[test]
    fn faults_never_change_the_final_state() {
        let feed = generate(11, 200, FaultConfig::default());
        assert_eq!(last_event_state(&feed.batches), feed.truth);
    }

    #[test]
    fn batches_are_non_empty_and_capped() {
        let fault = FaultConfig {
            max_batch_len: 3,
            ..FaultConfig::default()
        };
        let feed = generate(5, 150, fault);
        assert!(!feed.batches.is_empty());
        // A step emits at most three events on top of a batch one short of the cap.
        assert!(feed.batches.iter().all(|b| !b.is_empty() && b.len() <= 3 + 2));
    }

    #[test]
    fn fault_free_feed_has_no_fault_trace() {
        let fault = FaultConfig {
            duplicate_added_percent: 0,
            modified_before_added_percent: 0,
            redeliver_removed_percent: 0,
            stray_removed_percent: 0,
            ..FaultConfig::default()
        };
        let feed = generate(2, 100, fault);
        assert!(
            feed.trace
                .iter()
                .all(|t| !matches!(t.kind, TraceEventKind::Fault { .. }))
        );
        // Without injected faults every identity starts with Added.
        let firsts = feed
            .batches
            .iter()
            .flatten()
            .fold(BTreeMap::new(), |mut seen, e| {
                seen.entry(e.id.clone()).or_insert(e.kind());
                seen
            });
        assert!(firsts.values().all(|k| *k == ChangeKind::Added));
    }

    #[test]
    fn lifecycles_count_reappearances() {
        let batches = vec![
            vec![
                ChangeEvent::modified("a", 1),
                ChangeEvent::added("a", 1),
                ChangeEvent::removed("a"),
            ],
            vec![ChangeEvent::removed("a"), ChangeEvent::added("a", 2)],
        ];
        assert_eq!(lifecycles(&batches).get(&RecordId::from("a")), Some(&2));
    }

    #[test]
    fn trace_serializes_flat() {
        let feed = generate(1, 3, FaultConfig::default());
        let json = serde_json::to_string(&feed.trace[0]).expect("serialize");
        assert!(json.contains("\"event\":"));
        assert!(json.contains("\"step\":"));
    }
}
