//! Snapshot aggregation into fixed bucket arrays.
//!
//! Buckets are always rebuilt from the full current snapshot; there is no
//! incremental merge. An empty bucket averages to 0.

use chrono::{DateTime, FixedOffset, Local, Offset, Timelike};
use serde::Serialize;

use crate::model::ReportType;

/// Running sum and count for one bucket key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bucket {
    pub sum: f64,
    pub count: u32,
}

impl Bucket {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    #[must_use]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / f64::from(self.count)
        }
    }
}

/// Fixed-size bucket array indexed `0..N`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Buckets<const N: usize> {
    buckets: [Bucket; N],
}

impl<const N: usize> Default for Buckets<N> {
    fn default() -> Self {
        Self {
            buckets: [Bucket::default(); N],
        }
    }
}

impl<const N: usize> Buckets<N> {
    /// Add a value under `key`. Keys outside `0..N` are ignored and
    /// reported as `false`.
    pub fn add(&mut self, key: usize, value: f64) -> bool {
        self.buckets.get_mut(key).map(|b| b.add(value)).is_some()
    }

    #[must_use]
    pub fn get(&self, key: usize) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    /// Averages in ascending key order.
    #[must_use]
    pub fn averages(&self) -> [f64; N] {
        self.buckets.map(|b| b.average())
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|b| u64::from(b.count)).sum()
    }
}

pub type HourlyBuckets = Buckets<24>;

/// Hour of day (0..24) of a microsecond timestamp in the given offset.
#[must_use]
pub fn hour_of_day(ts_us: i64, offset: FixedOffset) -> Option<usize> {
    let utc = DateTime::from_timestamp_micros(ts_us)?;
    usize::try_from(utc.with_timezone(&offset).hour()).ok()
}

/// Offset of the local timezone right now.
#[must_use]
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Resolve a configured offset in minutes, falling back to local time.
#[must_use]
pub fn resolve_offset(minutes: Option<i32>) -> FixedOffset {
    minutes
        .and_then(|m| FixedOffset::east_opt(m.saturating_mul(60)))
        .unwrap_or_else(local_offset)
}

/// Group `(timestamp_us, metric)` pairs by hour of day.
pub fn hourly_buckets<I>(records: I, offset: FixedOffset) -> HourlyBuckets
where
    I: IntoIterator<Item = (i64, f64)>,
{
    let mut buckets = HourlyBuckets::default();
    for (ts, metric) in records {
        if let Some(hour) = hour_of_day(ts, offset) {
            buckets.add(hour, metric);
        }
    }
    buckets
}

/// Chart-ready hourly averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySeries {
    pub labels: Vec<String>,
    /// Exact averages per hour.
    pub averages: Vec<f64>,
    /// Averages rounded half away from zero, as displayed.
    pub rounded: Vec<i64>,
    pub samples: u64,
}

impl HourlySeries {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_buckets(buckets: &HourlyBuckets) -> Self {
        let averages = buckets.averages().to_vec();
        Self {
            labels: (0..24).map(|h| format!("{h}:00")).collect(),
            rounded: averages.iter().map(|a| a.round() as i64).collect(),
            averages,
            samples: buckets.total_count(),
        }
    }
}

/// Report counts in chart order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportTypeCounts {
    counts: [u64; 5],
}

impl ReportTypeCounts {
    pub fn from_types<I: IntoIterator<Item = ReportType>>(types: I) -> Self {
        let mut out = Self::default();
        for t in types {
            out.counts[t.index()] += 1;
        }
        out
    }

    #[must_use]
    pub const fn get(&self, report_type: ReportType) -> u64 {
        self.counts[report_type.index()]
    }

    /// `(type, count)` in the fixed order Accident, Pothole, Roadblock,
    /// Flooding, Other.
    pub fn iter(&self) -> impl Iterator<Item = (ReportType, u64)> + '_ {
        ReportType::ALL.into_iter().map(|t| (t, self.get(t)))
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
