//! Render sink that records every call it receives.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use roadpulse_core::model::RecordId;
use roadpulse_core::sync::RenderSink;
use serde::Serialize;

use crate::rng::DeterministicRng;

/// Opaque handle handed back to the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub serial: u64,
    pub value: u32,
}

/// Call counts collected by [`RecordingSink`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ledger {
    /// Successful creates per identity.
    pub creates: BTreeMap<RecordId, usize>,
    /// Destroy calls per handle serial, failed ones included.
    pub destroys: BTreeMap<u64, usize>,
    /// Identity each serial was created for.
    pub owners: BTreeMap<u64, RecordId>,
    /// Injected failures across all three operations.
    pub failures: usize,
}

impl Ledger {
    /// Serials handed out but never passed to `destroy`.
    pub fn leaked(&self) -> impl Iterator<Item = (u64, &RecordId)> {
        self.owners
            .iter()
            .filter(|(serial, _)| !self.destroys.contains_key(serial))
            .map(|(serial, id)| (*serial, id))
    }
}

pub struct RecordingSink {
    rng: DeterministicRng,
    failure_percent: u8,
    next_serial: u64,
    ledger: Ledger,
}

impl RecordingSink {
    /// A sink whose calls fail `failure_percent` of the time.
    #[must_use]
    pub fn new(seed: u64, failure_percent: u8) -> Self {
        Self {
            rng: DeterministicRng::new(seed),
            failure_percent,
            next_serial: 0,
            ledger: Ledger::default(),
        }
    }

    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    fn inject(&mut self, op: &str, id: &RecordId) -> Result<()> {
        if self.rng.hit_rate_percent(self.failure_percent) {
            self.ledger.failures += 1;
            bail!("injected {op} failure for {id}");
        }
        Ok(())
    }
}

impl RenderSink for RecordingSink {
    type Payload = u32;
    type Handle = Marker;

    fn create(&mut self, id: &RecordId, payload: &u32) -> Result<Marker> {
        self.inject("create", id)?;
        self.next_serial += 1;
        *self.ledger.creates.entry(id.clone()).or_default() += 1;
        self.ledger.owners.insert(self.next_serial, id.clone());
        Ok(Marker {
            serial: self.next_serial,
            value: *payload,
        })
    }

    fn update(&mut self, id: &RecordId, handle: &mut Marker, payload: &u32) -> Result<()> {
        self.inject("update", id)?;
        handle.value = *payload;
        Ok(())
    }

    fn destroy(&mut self, handle: Marker) -> Result<()> {
        *self.ledger.destroys.entry(handle.serial).or_default() += 1;
        let owner = self
            .ledger
            .owners
            .get(&handle.serial)
            .cloned()
            .unwrap_or_else(|| RecordId::new("?"));
        self.inject("destroy", &owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadpulse_core::feed::ChangeEvent;
    use roadpulse_core::sync::Synchronizer;

    #[test]
    fn ledger_tracks_lifecycle() {
        let mut sync = Synchronizer::new(RecordingSink::new(0, 0));
        sync.apply(&[
            ChangeEvent::added("a", 1),
            ChangeEvent::added("b", 2),
            ChangeEvent::removed("a"),
        ]);
        let ledger = sync.sink().ledger();
        assert_eq!(ledger.creates.len(), 2);
        assert_eq!(ledger.destroys.get(&1), Some(&1));
        assert_eq!(ledger.leaked().map(|(s, _)| s).collect::<Vec<_>>(), vec![2]);

        sync.teardown();
        assert_eq!(sync.sink().ledger().leaked().count(), 0);
    }

    #[test]
    fn always_failing_sink_creates_nothing() {
        let mut sync = Synchronizer::new(RecordingSink::new(0, 100));
        let stats = sync.apply(&[ChangeEvent::added("a", 1), ChangeEvent::modified("a", 2)]);
        assert_eq!(stats.errors, 2);
        assert!(sync.projection().is_empty());
        assert_eq!(sync.sink().ledger().failures, 2);
    }
}
