//! Incremental view synchronizer.
//!
//! A [`Synchronizer`] keeps a [`Projection`] of `identity -> render handle`
//! consistent with an ordered change feed. Every event touches at most one
//! handle; nothing is ever cleared and redrawn.
//!
//! # Reconciliation rules
//!
//! | event    | identity known         | identity unknown |
//! |----------|------------------------|------------------|
//! | Added    | update in place        | create           |
//! | Modified | update in place        | create           |
//! | Removed  | destroy, drop entry    | no-op            |
//!
//! After any sequence of batches the projection's key set equals the
//! identities whose most recent event is Added or Modified, and each handle
//! was last given that event's payload.
//!
//! Render sink failures never abort a batch. They are logged, counted in
//! [`ApplyStats::errors`], and leave the projection in the state below:
//!
//! - failed `create`: no entry (a later Added/Modified retries it)
//! - failed `update`: the existing handle is kept
//! - failed `destroy`: the entry is dropped anyway

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::AddAssign;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::feed::{Change, ChangeEvent};
use crate::model::RecordId;

/// Drawing collaborator driven by the synchronizer.
pub trait RenderSink {
    type Payload;
    type Handle;

    /// Draw a new element for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the element could not be created.
    fn create(&mut self, id: &RecordId, payload: &Self::Payload) -> Result<Self::Handle>;

    /// Redraw an existing element in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the element could not be updated.
    fn update(
        &mut self,
        id: &RecordId,
        handle: &mut Self::Handle,
        payload: &Self::Payload,
    ) -> Result<()>;

    /// Release an element. The handle is consumed either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the element could not be released cleanly.
    fn destroy(&mut self, handle: Self::Handle) -> Result<()>;
}

/// Identity-keyed live render handles.
#[derive(Debug)]
pub struct Projection<H> {
    entries: BTreeMap<RecordId, H>,
}

impl<H> Default for Projection<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H> Projection<H> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&H> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &H)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &H> {
        self.entries.values()
    }
}

/// Counters for one or more `apply` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    /// Handles created for new identities.
    pub created: usize,
    /// In-place updates from Modified.
    pub updated: usize,
    /// Duplicate Added treated as an in-place update.
    pub replaced: usize,
    /// Modified for an unknown identity, created instead.
    pub healed: usize,
    pub destroyed: usize,
    /// Removed for an unknown identity.
    pub ignored: usize,
    /// Render sink failures (logged and skipped).
    pub errors: usize,
}

impl ApplyStats {
    #[must_use]
    pub const fn events(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed + self.ignored + self.errors
    }
}

impl AddAssign for ApplyStats {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.replaced += rhs.replaced;
        self.healed += rhs.healed;
        self.destroyed += rhs.destroyed;
        self.ignored += rhs.ignored;
        self.errors += rhs.errors;
    }
}

/// Applies change batches to a render sink through a projection.
pub struct Synchronizer<S: RenderSink> {
    sink: S,
    projection: Projection<S::Handle>,
}

impl<S: RenderSink> Synchronizer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            projection: Projection::default(),
        }
    }

    /// Apply one batch in order.
    pub fn apply(&mut self, batch: &[ChangeEvent<S::Payload>]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        for event in batch {
            match &event.change {
                Change::Added(payload) => self.upsert(&event.id, payload, false, &mut stats),
                Change::Modified(payload) => self.upsert(&event.id, payload, true, &mut stats),
                Change::Removed => self.remove(&event.id, &mut stats),
            }
        }
        stats
    }

    fn upsert(
        &mut self,
        id: &RecordId,
        payload: &S::Payload,
        modified: bool,
        stats: &mut ApplyStats,
    ) {
        if let Some(handle) = self.projection.entries.get_mut(id) {
            if !modified {
                debug!(id = %id, "duplicate added, replacing in place");
            }
            match self.sink.update(id, handle, payload) {
                Ok(()) if modified => stats.updated += 1,
                Ok(()) => stats.replaced += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "render update failed, keeping previous handle");
                    stats.errors += 1;
                }
            }
            return;
        }

        if modified {
            debug!(id = %id, "modified for unknown identity, creating");
        }
        match self.sink.create(id, payload) {
            Ok(handle) => {
                self.projection.entries.insert(id.clone(), handle);
                stats.created += 1;
                if modified {
                    stats.healed += 1;
                }
            }
            Err(e) => {
                warn!(id = %id, error = %e, "render create failed");
                stats.errors += 1;
            }
        }
    }

    fn remove(&mut self, id: &RecordId, stats: &mut ApplyStats) {
        let Some(handle) = self.projection.entries.remove(id) else {
            debug!(id = %id, "removed for unknown identity, ignoring");
            stats.ignored += 1;
            return;
        };
        match self.sink.destroy(handle) {
            Ok(()) => stats.destroyed += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "render destroy failed, entry dropped");
                stats.errors += 1;
            }
        }
    }

    /// Destroy every live handle and empty the projection.
    pub fn teardown(&mut self) -> ApplyStats {
        let mut stats = ApplyStats::default();
        for (id, handle) in std::mem::take(&mut self.projection.entries) {
            match self.sink.destroy(handle) {
                Ok(()) => stats.destroyed += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "render destroy failed during teardown");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    #[must_use]
    pub const fn projection(&self) -> &Projection<S::Handle> {
        &self.projection
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

/// Sink whose handle is a copy of the latest payload.
///
/// Used by views that recompute derived output from the full snapshot
/// (aggregations, rankings) rather than drawing one element per record.
#[derive(Debug)]
pub struct MirrorSink<P> {
    _payload: PhantomData<P>,
}

impl<P> Default for MirrorSink<P> {
    fn default() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<P: Clone> RenderSink for MirrorSink<P> {
    type Payload = P;
    type Handle = P;

    fn create(&mut self, _id: &RecordId, payload: &P) -> Result<P> {
        Ok(payload.clone())
    }

    fn update(&mut self, _id: &RecordId, handle: &mut P, payload: &P) -> Result<()> {
        handle.clone_from(payload);
        Ok(())
    }

    fn destroy(&mut self, _handle: P) -> Result<()> {
        Ok(())
    }
}

/// Snapshot of the current payload per identity.
pub type SnapshotMirror<P> = Synchronizer<MirrorSink<P>>;

impl<P: Clone> SnapshotMirror<P> {
    #[must_use]
    pub fn mirror() -> Self {
        Self::new(MirrorSink::default())
    }

    /// Current payloads in identity order.
    pub fn payloads(&self) -> impl Iterator<Item = &P> {
        self.projection.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Debug, Default)]
    struct CountingSink {
        next: u32,
        creates: Vec<RecordId>,
        updates: usize,
        destroyed: Vec<u32>,
        fail_create: bool,
        fail_update: bool,
        fail_destroy: bool,
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Handle {
        serial: u32,
        value: i32,
    }

    impl RenderSink for CountingSink {
        type Payload = i32;
        type Handle = Handle;

        fn create(&mut self, id: &RecordId, payload: &i32) -> Result<Handle> {
            if self.fail_create {
                bail!("create refused");
            }
            self.next += 1;
            self.creates.push(id.clone());
            Ok(Handle {
                serial: self.next,
                value: *payload,
            })
        }

        fn update(&mut self, _id: &RecordId, handle: &mut Handle, payload: &i32) -> Result<()> {
            if self.fail_update {
                bail!("update refused");
            }
            self.updates += 1;
            handle.value = *payload;
            Ok(())
        }

        fn destroy(&mut self, handle: Handle) -> Result<()> {
            self.destroyed.push(handle.serial);
            if self.fail_destroy {
                bail!("destroy refused");
            }
            Ok(())
        }
    }

    fn sync() -> Synchronizer<CountingSink> {
        Synchronizer::new(CountingSink::default())
    }

    #[test]
    fn added_creates_one_handle() {
        let mut s = sync();
        let stats = s.apply(&[ChangeEvent::added("a", 1), ChangeEvent::added("b", 2)]);
        assert_eq!(stats.created, 2);
        assert_eq!(s.projection().len(), 2);
        assert_eq!(s.projection().get(&"b".into()).map(|h| h.value), Some(2));
    }

    #[test]
    fn duplicate_added_updates_in_place() {
        let mut s = sync();
        s.apply(&[ChangeEvent::added("a", 1)]);
        let stats = s.apply(&[ChangeEvent::added("a", 5)]);
        assert_eq!(stats.replaced, 1);
        assert_eq!(s.sink().creates.len(), 1);
        assert_eq!(s.sink().updates, 1);
        let handle = s.projection().get(&"a".into()).expect("present");
        assert_eq!(handle, &Handle { serial: 1, value: 5 });
    }

    #[test]
    fn modified_before_added_creates_exactly_once() {
        let mut s = sync();
        let stats = s.apply(&[ChangeEvent::modified("x", 3), ChangeEvent::added("x", 4)]);
        assert_eq!(stats.healed, 1);
        assert_eq!(stats.replaced, 1);
        assert_eq!(s.sink().creates, vec![RecordId::from("x")]);
        assert_eq!(s.projection().get(&"x".into()).map(|h| h.value), Some(4));
    }

    #[test]
    fn removed_destroys_once_and_redelivery_is_noop() {
        let mut s = sync();
        s.apply(&[ChangeEvent::added("a", 1)]);
        let stats = s.apply(&[ChangeEvent::removed("a"), ChangeEvent::removed("a")]);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(s.sink().destroyed, vec![1]);
        assert!(s.projection().is_empty());
    }

    #[test]
    fn failed_create_leaves_no_entry_and_is_retried() {
        let mut s = sync();
        s.sink_mut().fail_create = true;
        let stats = s.apply(&[ChangeEvent::added("a", 1)]);
        assert_eq!(stats.errors, 1);
        assert!(s.projection().is_empty());

        s.sink_mut().fail_create = false;
        s.apply(&[ChangeEvent::modified("a", 2)]);
        assert_eq!(s.projection().get(&"a".into()).map(|h| h.value), Some(2));
    }

    #[test]
    fn failed_update_keeps_previous_handle() {
        let mut s = sync();
        s.apply(&[ChangeEvent::added("a", 1)]);
        s.sink_mut().fail_update = true;
        let stats = s.apply(&[ChangeEvent::modified("a", 9)]);
        assert_eq!(stats.errors, 1);
        assert_eq!(s.projection().get(&"a".into()).map(|h| h.value), Some(1));
    }

    #[test]
    fn failed_destroy_still_drops_entry() {
        let mut s = sync();
        s.apply(&[ChangeEvent::added("a", 1)]);
        s.sink_mut().fail_destroy = true;
        let stats = s.apply(&[ChangeEvent::removed("a")]);
        assert_eq!(stats.errors, 1);
        assert!(!s.projection().contains(&"a".into()));
        assert_eq!(s.sink().destroyed, vec![1]);
    }

    #[test]
    fn teardown_destroys_everything() {
        let mut s = sync();
        s.apply(&[
            ChangeEvent::added("a", 1),
            ChangeEvent::added("b", 2),
            ChangeEvent::added("c", 3),
        ]);
        let stats = s.teardown();
        assert_eq!(stats.destroyed, 3);
        assert!(s.projection().is_empty());
        assert_eq!(s.sink().destroyed.len(), 3);
    }

    #[test]
    fn stats_accumulate() {
        let mut total = ApplyStats::default();
        total += ApplyStats {
            created: 2,
            ..ApplyStats::default()
        };
        total += ApplyStats {
            created: 1,
            errors: 1,
            ..ApplyStats::default()
        };
        assert_eq!(total.created, 3);
        assert_eq!(total.events(), 4);
    }

    #[test]
    fn mirror_tracks_latest_payloads() {
        let mut m: SnapshotMirror<&str> = SnapshotMirror::mirror();
        m.apply(&[
            ChangeEvent::added("b", "two"),
            ChangeEvent::added("a", "one"),
            ChangeEvent::modified("b", "deux"),
        ]);
        assert_eq!(m.payloads().copied().collect::<Vec<_>>(), vec!["one", "deux"]);
    }
}
