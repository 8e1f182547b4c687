//! Per-view contexts.
//!
//! Each view owns its projection, its subscription handles and its render
//! target. Views are built by `open`, follow the session while alive, and
//! cancel every subscription when closed or dropped.

pub mod dashboard;
pub mod karma;
pub mod live_map;
pub mod report;

use serde::Serialize;
use tracing::warn;

use crate::feed::{Change, ChangeEvent};
use crate::model::{Document, Payload, PayloadError, Record, RecordKind};
use crate::source::SourceError;
use crate::sync::ApplyStats;

/// Delivery counters kept by every view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewStats {
    pub deliveries: usize,
    pub apply: ApplyStats,
    /// Documents that failed to decode.
    pub rejected: usize,
    pub source_errors: usize,
    #[serde(skip)]
    pub last_error: Option<SourceError>,
}

impl ViewStats {
    pub(crate) fn record_error(&mut self, view: &str, error: SourceError) {
        warn!(view, code = %error.code, error = %error.message, "live data source error");
        self.source_errors += 1;
        self.last_error = Some(error);
    }
}

/// Decode a document batch into typed events.
///
/// A document that fails to decode withdraws its identity from the view:
/// the event becomes `Removed`, which is a no-op when the identity was never
/// shown.
pub fn decode_batch<P: Payload>(
    view: &str,
    changes: Vec<ChangeEvent<Document>>,
    stats: &mut ViewStats,
) -> Vec<ChangeEvent<P>> {
    decode_with(view, changes, stats, |doc| P::decode(&doc))
}

/// Like [`decode_batch`], with the schema picked at runtime.
pub fn decode_records(
    view: &str,
    kind: RecordKind,
    changes: Vec<ChangeEvent<Document>>,
    stats: &mut ViewStats,
) -> Vec<ChangeEvent<Record>> {
    decode_with(view, changes, stats, |doc| Record::decode(kind, &doc))
}

fn decode_with<P>(
    view: &str,
    changes: Vec<ChangeEvent<Document>>,
    stats: &mut ViewStats,
    decode: impl Fn(Document) -> Result<P, PayloadError>,
) -> Vec<ChangeEvent<P>> {
    changes
        .into_iter()
        .map(|event| {
            let id = event.id.clone();
            let kind = event.kind();
            event.try_map(&decode).unwrap_or_else(|e| {
                warn!(view, id = %id, kind = %kind, error = %e, "rejecting invalid document");
                stats.rejected += 1;
                ChangeEvent {
                    id,
                    change: Change::Removed,
                }
            })
        })
        .collect()
}
