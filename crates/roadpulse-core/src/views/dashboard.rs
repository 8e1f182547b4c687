//! Statistics dashboard: hourly congestion and report-type breakdown.
//!
//! Both charts mirror their query's full result and are recomputed from that
//! mirror on every delivery.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use tracing::{info, warn};

use super::{ViewStats, decode_batch};
use crate::aggregate::{HourlySeries, ReportTypeCounts, hourly_buckets, resolve_offset};
use crate::config::DashboardConfig;
use crate::model::{Report, TrafficStat};
use crate::source::{
    Collection, Delivery, Direction, FilterOp, LiveDataSource, QueryDescriptor, Subscription,
};
use crate::sync::SnapshotMirror;

const VIEW: &str = "dashboard";

/// Chart rendering collaborator.
pub trait ChartSink {
    /// # Errors
    ///
    /// Returns an error if the chart could not be redrawn.
    fn hourly_congestion(&mut self, series: &HourlySeries) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the chart could not be redrawn.
    fn report_types(&mut self, counts: &ReportTypeCounts) -> Result<()>;
}

struct DashboardState<K> {
    charts: K,
    offset: FixedOffset,
    stats_mirror: SnapshotMirror<TrafficStat>,
    reports_mirror: SnapshotMirror<Report>,
    hourly: HourlySeries,
    report_counts: ReportTypeCounts,
    stats: ViewStats,
}

impl<K: ChartSink> DashboardState<K> {
    fn on_stats(&mut self, delivery: Delivery) {
        self.stats.deliveries += 1;
        let snapshot = match delivery {
            Delivery::Snapshot(s) => s,
            Delivery::Error(e) => return self.stats.record_error(VIEW, e),
        };
        let batch = decode_batch(VIEW, snapshot.changes, &mut self.stats);
        self.stats.apply += self.stats_mirror.apply(&batch);

        let buckets = hourly_buckets(
            self.stats_mirror
                .payloads()
                .map(|s| (s.timestamp, f64::from(s.congestion_level))),
            self.offset,
        );
        self.hourly = HourlySeries::from_buckets(&buckets);
        if let Err(e) = self.charts.hourly_congestion(&self.hourly) {
            warn!(view = VIEW, error = %e, "hourly chart render failed");
            self.stats.apply.errors += 1;
        }
    }

    fn on_reports(&mut self, delivery: Delivery) {
        self.stats.deliveries += 1;
        let snapshot = match delivery {
            Delivery::Snapshot(s) => s,
            Delivery::Error(e) => return self.stats.record_error(VIEW, e),
        };
        let batch = decode_batch(VIEW, snapshot.changes, &mut self.stats);
        self.stats.apply += self.reports_mirror.apply(&batch);

        self.report_counts =
            ReportTypeCounts::from_types(self.reports_mirror.payloads().map(|r| r.report_type));
        if let Err(e) = self.charts.report_types(&self.report_counts) {
            warn!(view = VIEW, error = %e, "report type chart render failed");
            self.stats.apply.errors += 1;
        }
    }
}

/// The dashboard view context.
pub struct DashboardView<K> {
    state: Rc<RefCell<DashboardState<K>>>,
    subscriptions: Vec<Subscription>,
}

impl<K: ChartSink + 'static> DashboardView<K> {
    /// Subscribe to both dashboard queries.
    ///
    /// # Errors
    ///
    /// Returns an error if either subscription cannot be registered. Any
    /// subscription already made is cancelled.
    pub fn open(
        source: &dyn LiveDataSource,
        charts: K,
        config: &DashboardConfig,
        now_us: i64,
    ) -> Result<Self> {
        let state = Rc::new(RefCell::new(DashboardState {
            charts,
            offset: resolve_offset(config.utc_offset_minutes),
            stats_mirror: SnapshotMirror::mirror(),
            reports_mirror: SnapshotMirror::mirror(),
            hourly: HourlySeries::from_buckets(&crate::aggregate::HourlyBuckets::default()),
            report_counts: ReportTypeCounts::default(),
            stats: ViewStats::default(),
        }));
        let mut view = Self {
            state,
            subscriptions: Vec::with_capacity(2),
        };

        let hourly_query = QueryDescriptor::collection(Collection::TrafficStats)
            .filter(
                "timestamp",
                FilterOp::Gt,
                now_us.saturating_sub(config.hourly_window_us()),
            )
            .order_by("timestamp", Direction::Asc);
        let shared = Rc::clone(&view.state);
        let sub = source
            .subscribe(
                hourly_query,
                Box::new(move |d| shared.borrow_mut().on_stats(d)),
            )
            .context("subscribe to traffic stats")?;
        view.subscriptions.push(sub);

        let reports_query = QueryDescriptor::collection(Collection::Reports).filter(
            "timestamp",
            FilterOp::Gt,
            now_us.saturating_sub(config.report_types_window_us()),
        );
        let shared = Rc::clone(&view.state);
        let sub = source
            .subscribe(
                reports_query,
                Box::new(move |d| shared.borrow_mut().on_reports(d)),
            )
            .context("subscribe to recent reports")?;
        view.subscriptions.push(sub);

        info!(view = VIEW, "dashboard subscribed");
        Ok(view)
    }
}

impl<K> DashboardView<K> {
    #[must_use]
    pub fn hourly(&self) -> HourlySeries {
        self.state.borrow().hourly.clone()
    }

    #[must_use]
    pub fn report_counts(&self) -> ReportTypeCounts {
        self.state.borrow().report_counts
    }

    #[must_use]
    pub fn stats(&self) -> ViewStats {
        self.state.borrow().stats.clone()
    }

    pub fn with_charts<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&self.state.borrow().charts)
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_active()).count()
    }

    /// Cancel both subscriptions.
    pub fn close(mut self) -> ViewStats {
        self.cancel_all();
        self.stats()
    }

    fn cancel_all(&mut self) {
        for sub in &mut self.subscriptions {
            sub.cancel();
        }
    }
}

impl<K> Drop for DashboardView<K> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
