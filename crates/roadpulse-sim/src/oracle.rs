use std::collections::{BTreeMap, BTreeSet};

use roadpulse_core::model::RecordId;
use serde::Serialize;

use crate::SimulationResult;
use crate::recorder::Ledger;

// ── Core result types ─────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "invariant", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// The final projection disagrees with the source for one identity.
    Projection {
        id: RecordId,
        expected: Option<u32>,
        actual: Option<u32>,
    },

    /// A handle was passed to `destroy` more than once.
    DoubleDestroy {
        serial: u64,
        id: RecordId,
        count: usize,
    },

    /// A handle survived teardown.
    LeakedHandle { serial: u64, id: RecordId },

    /// An identity was created more often than it appeared.
    ExtraCreate {
        id: RecordId,
        creates: usize,
        lifecycles: usize,
    },

    /// Applying the same events in different batches changed the result.
    BatchSensitivity {
        id: RecordId,
        split: Option<u32>,
        joined: Option<u32>,
    },
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Checks a finished simulation against the synchronizer contract.
///
/// # Invariants checked
///
/// 1. **Projection** (`check_projection`): the live set equals the
///    identities whose last event was Added or Modified, with the latest
///    payload.
/// 2. **Destroy once** (`check_destroy_once`): every handle is destroyed at
///    most once, and none survives teardown.
/// 3. **Single create** (`check_single_create`): duplicate `Added` and
///    `Modified`-before-`Added` never create a second handle.
/// 4. **Batch independence** (`check_batch_independence`): batch
///    boundaries do not affect the projection.
///
/// Checks 1 and 3 assume every sink call succeeded and are skipped when
/// the run injected sink failures.
pub struct FeedOracle;

impl FeedOracle {
    // ── Invariant 1: Projection ──────────────────────────────────────────────

    #[must_use]
    pub fn check_projection(
        truth: &BTreeMap<RecordId, u32>,
        projection: &BTreeMap<RecordId, u32>,
    ) -> OracleResult {
        OracleResult::from_violations(
            diff_maps(truth, projection)
                .map(|(id, expected, actual)| InvariantViolation::Projection {
                    id,
                    expected,
                    actual,
                })
                .collect(),
        )
    }

    // ── Invariant 2: Destroy once ────────────────────────────────────────────

    /// Run after teardown so that every live handle has been released.
    #[must_use]
    pub fn check_destroy_once(ledger: &Ledger) -> OracleResult {
        let unknown = RecordId::new("?");
        let mut violations: Vec<InvariantViolation> = ledger
            .destroys
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(serial, count)| InvariantViolation::DoubleDestroy {
                serial: *serial,
                id: ledger.owners.get(serial).unwrap_or(&unknown).clone(),
                count: *count,
            })
            .collect();
        violations.extend(ledger.leaked().map(|(serial, id)| {
            InvariantViolation::LeakedHandle {
                serial,
                id: id.clone(),
            }
        }));
        OracleResult::from_violations(violations)
    }

    // ── Invariant 3: Single create ───────────────────────────────────────────

    #[must_use]
    pub fn check_single_create(
        lifecycles: &BTreeMap<RecordId, usize>,
        ledger: &Ledger,
    ) -> OracleResult {
        let violations = ledger
            .creates
            .iter()
            .filter_map(|(id, creates)| {
                let expected = lifecycles.get(id).copied().unwrap_or(0);
                (*creates > expected).then(|| InvariantViolation::ExtraCreate {
                    id: id.clone(),
                    creates: *creates,
                    lifecycles: expected,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    // ── Invariant 4: Batch independence ──────────────────────────────────────

    #[must_use]
    pub fn check_batch_independence(
        split: &BTreeMap<RecordId, u32>,
        joined: &BTreeMap<RecordId, u32>,
    ) -> OracleResult {
        OracleResult::from_violations(
            diff_maps(split, joined)
                .map(|(id, split, joined)| InvariantViolation::BatchSensitivity {
                    id,
                    split,
                    joined,
                })
                .collect(),
        )
    }

    // ── Combined ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        let clean = result.ledger.failures == 0;
        let mut out = OracleResult::pass();
        if clean {
            out = out
                .merge(Self::check_projection(&result.truth, &result.projection))
                .merge(Self::check_single_create(&result.lifecycles, &result.ledger));
        }
        out.merge(Self::check_destroy_once(&result.ledger))
            .merge(Self::check_batch_independence(
                &result.projection,
                &result.joined_projection,
            ))
    }
}

/// Identities on which `a` and `b` disagree, with both sides.
fn diff_maps<'a>(
    a: &'a BTreeMap<RecordId, u32>,
    b: &'a BTreeMap<RecordId, u32>,
) -> impl Iterator<Item = (RecordId, Option<u32>, Option<u32>)> + 'a {
    let keys: BTreeSet<&RecordId> = a.keys().chain(b.keys()).collect();
    keys.into_iter().filter_map(move |id| {
        let left = a.get(id).copied();
        let right = b.get(id).copied();
        (left != right).then(|| (id.clone(), left, right))
    })
}
