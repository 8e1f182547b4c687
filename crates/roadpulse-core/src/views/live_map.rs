//! Live traffic map.
//!
//! One marker per traffic sample newer than the configured window. The
//! subscription follows the session: signing in subscribes, signing out
//! cancels it and removes every marker.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use super::{ViewStats, decode_batch};
use crate::config::MapConfig;
use crate::model::traffic::CongestionThresholds;
use crate::model::{CongestionBand, Coordinates, RecordId, TrafficSample};
use crate::session::{Session, SessionChange};
use crate::source::{
    Collection, Delivery, FilterOp, LiveDataSource, QueryDescriptor, Subscription,
};
use crate::sync::{ApplyStats, RenderSink, Synchronizer};

const VIEW: &str = "live_map";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PopupStage {
    Reported,
    Updated,
}

impl PopupStage {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Reported => "Reported",
            Self::Updated => "Updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popup {
    pub title: String,
    pub description: String,
    pub stage: PopupStage,
    pub timestamp: i64,
}

/// Everything a map canvas needs to draw one marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDescriptor {
    pub id: RecordId,
    pub position: Coordinates,
    pub level: u8,
    pub band: CongestionBand,
    pub color: &'static str,
    /// Text inside the marker, e.g. `85%`.
    pub label: String,
    pub popup: Popup,
}

impl MarkerDescriptor {
    #[must_use]
    pub fn describe(
        id: &RecordId,
        sample: &TrafficSample,
        thresholds: CongestionThresholds,
        stage: PopupStage,
    ) -> Self {
        let band = thresholds.band(sample.congestion_level);
        Self {
            id: id.clone(),
            position: sample.coordinates,
            level: sample.congestion_level,
            band,
            color: band.color(),
            label: format!("{}%", sample.congestion_level),
            popup: Popup {
                title: sample.title().to_string(),
                description: sample.description_or_default().to_string(),
                stage,
                timestamp: sample.timestamp,
            },
        }
    }
}

/// Map rendering collaborator.
pub trait MapCanvas {
    type Marker;

    /// # Errors
    ///
    /// Returns an error if the marker could not be drawn.
    fn add_marker(&mut self, marker: &MarkerDescriptor) -> Result<Self::Marker>;

    /// # Errors
    ///
    /// Returns an error if the marker could not be redrawn.
    fn update_marker(&mut self, handle: &mut Self::Marker, marker: &MarkerDescriptor)
    -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the marker could not be removed cleanly.
    fn remove_marker(&mut self, handle: Self::Marker) -> Result<()>;
}

/// Adapts a [`MapCanvas`] to the synchronizer.
pub struct MarkerLayer<C> {
    canvas: C,
    thresholds: CongestionThresholds,
}

impl<C: MapCanvas> MarkerLayer<C> {
    pub const fn new(canvas: C, thresholds: CongestionThresholds) -> Self {
        Self { canvas, thresholds }
    }

    pub const fn canvas(&self) -> &C {
        &self.canvas
    }
}

impl<C: MapCanvas> RenderSink for MarkerLayer<C> {
    type Payload = TrafficSample;
    type Handle = C::Marker;

    fn create(&mut self, id: &RecordId, payload: &TrafficSample) -> Result<C::Marker> {
        let marker =
            MarkerDescriptor::describe(id, payload, self.thresholds, PopupStage::Reported);
        self.canvas.add_marker(&marker)
    }

    fn update(
        &mut self,
        id: &RecordId,
        handle: &mut C::Marker,
        payload: &TrafficSample,
    ) -> Result<()> {
        let marker = MarkerDescriptor::describe(id, payload, self.thresholds, PopupStage::Updated);
        self.canvas.update_marker(handle, &marker)
    }

    fn destroy(&mut self, handle: C::Marker) -> Result<()> {
        self.canvas.remove_marker(handle)
    }
}

type SharedLayer<C> = Rc<RefCell<Synchronizer<MarkerLayer<C>>>>;

/// The live map view context.
pub struct LiveMapView<C: MapCanvas> {
    layer: SharedLayer<C>,
    stats: Rc<RefCell<ViewStats>>,
    subscription: Option<Subscription>,
    config: MapConfig,
}

impl<C: MapCanvas + 'static> LiveMapView<C> {
    /// Build the view, subscribing right away when someone is signed in.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be registered.
    pub fn open(
        source: &dyn LiveDataSource,
        canvas: C,
        config: MapConfig,
        session: &Session,
        now_us: i64,
    ) -> Result<Self> {
        let layer = Rc::new(RefCell::new(Synchronizer::new(MarkerLayer::new(
            canvas,
            config.thresholds(),
        ))));
        let mut view = Self {
            layer,
            stats: Rc::new(RefCell::new(ViewStats::default())),
            subscription: None,
            config,
        };
        if session.is_signed_in() {
            view.subscribe(source, now_us)?;
        }
        Ok(view)
    }

    /// Follow a sign-in state change.
    ///
    /// # Errors
    ///
    /// Returns an error if resubscribing fails.
    pub fn on_session_changed(
        &mut self,
        source: &dyn LiveDataSource,
        change: &SessionChange,
        now_us: i64,
    ) -> Result<()> {
        match change {
            SessionChange::SignedIn(_) if self.subscription.is_none() => {
                self.subscribe(source, now_us)
            }
            SessionChange::SignedOut => {
                self.shutdown();
                Ok(())
            }
            SessionChange::SignedIn(_) | SessionChange::Unchanged => Ok(()),
        }
    }

    fn subscribe(&mut self, source: &dyn LiveDataSource, now_us: i64) -> Result<()> {
        let threshold = now_us.saturating_sub(self.config.window_us());
        let query = QueryDescriptor::collection(Collection::TrafficData).filter(
            "timestamp",
            FilterOp::Gt,
            threshold,
        );

        let layer = Rc::clone(&self.layer);
        let stats = Rc::clone(&self.stats);
        let subscription = source
            .subscribe(
                query,
                Box::new(move |delivery| {
                    let mut stats = stats.borrow_mut();
                    stats.deliveries += 1;
                    match delivery {
                        Delivery::Snapshot(snapshot) => {
                            let batch = decode_batch(VIEW, snapshot.changes, &mut stats);
                            let applied = layer.borrow_mut().apply(&batch);
                            stats.apply += applied;
                        }
                        Delivery::Error(e) => stats.record_error(VIEW, e),
                    }
                }),
            )
            .context("subscribe to live traffic samples")?;
        info!(view = VIEW, threshold, "live map subscribed");
        self.subscription = Some(subscription);
        Ok(())
    }

    fn shutdown(&mut self) -> ApplyStats {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        let stats = self.layer.borrow_mut().teardown();
        self.stats.borrow_mut().apply += stats;
        stats
    }

    /// Cancel the subscription and remove every marker.
    pub fn close(mut self) -> ViewStats {
        self.shutdown();
        self.stats.borrow().clone()
    }
}

impl<C: MapCanvas> LiveMapView<C> {
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.layer.borrow().projection().len()
    }

    #[must_use]
    pub fn stats(&self) -> ViewStats {
        self.stats.borrow().clone()
    }

    /// Run `f` against the canvas.
    pub fn with_canvas<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        f(self.layer.borrow().sink().canvas())
    }
}

impl<C: MapCanvas> Drop for LiveMapView<C> {
    fn drop(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if let Ok(mut layer) = self.layer.try_borrow_mut() {
            layer.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Actor;
    use crate::store::LocalStore;
    use anyhow::bail;
    use serde_json::json;
    use std::collections::BTreeMap;

    const NOW: i64 = 1_700_000_000_000_000;

    /// Canvas that keeps markers in a map keyed by serial.
    #[derive(Default)]
    struct TestCanvas {
        next: u64,
        markers: BTreeMap<u64, MarkerDescriptor>,
        removed: usize,
        fail_add: bool,
    }

    impl MapCanvas for TestCanvas {
        type Marker = u64;

        fn add_marker(&mut self, marker: &MarkerDescriptor) -> Result<u64> {
            if self.fail_add {
                bail!("tile layer not ready");
            }
            self.next += 1;
            self.markers.insert(self.next, marker.clone());
            Ok(self.next)
        }

        fn update_marker(&mut self, handle: &mut u64, marker: &MarkerDescriptor) -> Result<()> {
            self.markers.insert(*handle, marker.clone());
            Ok(())
        }

        fn remove_marker(&mut self, handle: u64) -> Result<()> {
            self.markers.remove(&handle);
            self.removed += 1;
            Ok(())
        }
    }

    fn sample(level: u8, ts: i64) -> crate::model::Document {
        json!({
            "coordinates": {"latitude": 10.99, "longitude": 76.0},
            "congestionLevel": level,
            "timestamp": ts
        })
        .as_object()
        .cloned()
        .expect("object")
    }

    fn signed_in() -> Session {
        Session::signed_in(Actor::new("u1"))
    }

    #[test]
    fn shows_only_recent_samples() {
        let store = LocalStore::in_memory().expect("store");
        store
            .put(Collection::TrafficData, &"fresh".into(), &sample(80, NOW - 1_000_000))
            .expect("put");
        store
            .put(Collection::TrafficData, &"stale".into(), &sample(20, NOW - 3 * 3_600_000_000))
            .expect("put");

        let view = LiveMapView::open(
            &store,
            TestCanvas::default(),
            MapConfig::default(),
            &signed_in(),
            NOW,
        )
        .expect("open");
        assert_eq!(view.marker_count(), 1);
        view.with_canvas(|c| {
            let marker = c.markers.values().next().expect("marker");
            assert_eq!(marker.id.as_str(), "fresh");
            assert_eq!(marker.color, "red");
            assert_eq!(marker.label, "80%");
            assert_eq!(marker.popup.stage, PopupStage::Reported);
            assert_eq!(marker.popup.title, "Traffic Incident");
        });
    }

    #[test]
    fn updates_in_place_and_removes() {
        let store = LocalStore::in_memory().expect("store");
        let view = LiveMapView::open(
            &store,
            TestCanvas::default(),
            MapConfig::default(),
            &signed_in(),
            NOW,
        )
        .expect("open");

        store.put(Collection::TrafficData, &"a".into(), &sample(30, NOW)).expect("put");
        store.put(Collection::TrafficData, &"a".into(), &sample(50, NOW)).expect("put");
        view.with_canvas(|c| {
            assert_eq!(c.next, 1, "one marker created");
            let marker = c.markers.get(&1).expect("marker");
            assert_eq!(marker.band, CongestionBand::Moderate);
            assert_eq!(marker.popup.stage, PopupStage::Updated);
            assert_eq!(marker.id.as_str(), "a");
        });

        store.delete(Collection::TrafficData, &"a".into()).expect("delete");
        assert_eq!(view.marker_count(), 0);
        view.with_canvas(|c| assert_eq!(c.removed, 1));
    }

    #[test]
    fn signed_out_view_does_not_subscribe() {
        let store = LocalStore::in_memory().expect("store");
        store.put(Collection::TrafficData, &"a".into(), &sample(30, NOW)).expect("put");
        let mut view = LiveMapView::open(
            &store,
            TestCanvas::default(),
            MapConfig::default(),
            &Session::signed_out(),
            NOW,
        )
        .expect("open");
        assert!(!view.is_subscribed());
        assert_eq!(view.marker_count(), 0);

        let mut session = Session::signed_out();
        let change = session.sign_in(Actor::new("u1"));
        view.on_session_changed(&store, &change, NOW).expect("sign in");
        assert!(view.is_subscribed());
        assert_eq!(view.marker_count(), 1);

        let change = session.sign_out();
        view.on_session_changed(&store, &change, NOW).expect("sign out");
        assert!(!view.is_subscribed());
        assert_eq!(view.marker_count(), 0);
        assert_eq!(store.subscription_count(), 0);
    }

    #[test]
    fn invalid_sample_is_rejected_not_drawn() {
        let store = LocalStore::in_memory().expect("store");
        let view = LiveMapView::open(
            &store,
            TestCanvas::default(),
            MapConfig::default(),
            &signed_in(),
            NOW,
        )
        .expect("open");
        let mut bad = sample(10, NOW);
        bad.remove("coordinates");
        store.put(Collection::TrafficData, &"bad".into(), &bad).expect("put");
        assert_eq!(view.marker_count(), 0);
        assert_eq!(view.stats().rejected, 1);
    }

    #[test]
    fn canvas_failure_is_counted_and_skipped() {
        let store = LocalStore::in_memory().expect("store");
        let canvas = TestCanvas {
            fail_add: true,
            ..TestCanvas::default()
        };
        let view = LiveMapView::open(&store, canvas, MapConfig::default(), &signed_in(), NOW)
            .expect("open");
        store.put(Collection::TrafficData, &"a".into(), &sample(30, NOW)).expect("put");
        assert_eq!(view.marker_count(), 0);
        assert_eq!(view.stats().apply.errors, 1);
    }

    #[test]
    fn close_and_drop_cancel_the_subscription() {
        let store = LocalStore::in_memory().expect("store");
        store.put(Collection::TrafficData, &"a".into(), &sample(30, NOW)).expect("put");
        let view = LiveMapView::open(
            &store,
            TestCanvas::default(),
            MapConfig::default(),
            &signed_in(),
            NOW,
        )
        .expect("open");
        let stats = view.close();
        assert_eq!(stats.apply.created, 1);
        assert_eq!(stats.apply.destroyed, 1);
        assert_eq!(store.subscription_count(), 0);

        let view = LiveMapView::open(
            &store,
            TestCanvas::default(),
            MapConfig::default(),
            &signed_in(),
            NOW,
        )
        .expect("open");
        assert_eq!(store.subscription_count(), 1);
        drop(view);
        assert_eq!(store.subscription_count(), 0);
    }
}
