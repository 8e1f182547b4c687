//! `rp replay`: drive a recorded change feed through the synchronizer.
//!
//! Documents are decoded with the schema of `--collection`. Traffic samples
//! also drive the map marker layer.

use std::io::{self, Read as _, Write};

use anyhow::{Context as _, Result};
use clap::Args;
use roadpulse_core::error::ErrorCode;
use roadpulse_core::feed::{Change, ChangeEvent, parse_feed};
use roadpulse_core::model::{Record, RecordKind, TrafficSample};
use roadpulse_core::source::Collection;
use roadpulse_core::sync::{ApplyStats, SnapshotMirror, Synchronizer};
use roadpulse_core::views::live_map::{MarkerDescriptor, MarkerLayer};
use roadpulse_core::views::{ViewStats, decode_records};
use serde::Serialize;
use tracing::{debug, info};

use super::Context;
use super::map::TextCanvas;
use crate::output::{CommandError, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Feed file, one change per line; `-` reads stdin.
    pub file: String,

    /// Also write every change into the local store.
    #[arg(long)]
    pub into_store: bool,

    /// Collection the feed belongs to: selects the document schema and the
    /// --into-store target.
    #[arg(long, default_value = "trafficData")]
    pub collection: String,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    collection: Collection,
    batches: usize,
    events: usize,
    /// Records alive after the last batch.
    live: usize,
    markers: Vec<MarkerDescriptor>,
    stats: ApplyStats,
    rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    persisted: Option<usize>,
}

fn read_feed(file: &str) -> Result<String> {
    if file == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("read feed from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(file).with_context(|| format!("read feed {file}"))
}

/// Execute `rp replay`.
///
/// # Errors
///
/// Returns an error if the feed cannot be read or parsed, or if
/// `--into-store` is set and the store rejects a write.
pub fn run_replay(args: &ReplayArgs, ctx: &Context) -> Result<()> {
    let text = read_feed(&args.file)?;
    let batches = parse_feed(&text).map_err(|(line, e)| {
        anyhow::Error::from(e).context(format!("{}: line {line}", args.file))
    })?;

    let collection = Collection::from_name(&args.collection).ok_or_else(|| {
        CommandError::new(
            ErrorCode::InvalidQuery,
            format!("unknown collection '{}'", args.collection),
        )
    })?;
    let kind = RecordKind::for_collection(collection);
    let store = if args.into_store {
        Some(ctx.open_store()?)
    } else {
        None
    };

    let mut records = SnapshotMirror::<Record>::mirror();
    let mut layer = (kind == RecordKind::TrafficSample).then(|| {
        Synchronizer::new(MarkerLayer::new(
            TextCanvas::default(),
            ctx.config.project.map.thresholds(),
        ))
    });
    let mut view_stats = ViewStats::default();
    let mut stats = ApplyStats::default();
    let mut persisted = 0;

    for (i, batch) in batches.iter().enumerate() {
        if let Some(store) = &store {
            for event in batch {
                match &event.change {
                    Change::Added(doc) | Change::Modified(doc) => {
                        store.put(collection, &event.id, doc)?;
                    }
                    Change::Removed => {
                        store.delete(collection, &event.id)?;
                    }
                }
                persisted += 1;
            }
        }
        let typed = decode_records("replay", kind, batch.clone(), &mut view_stats);
        let applied = records.apply(&typed);
        debug!(batch = i, events = typed.len(), ?applied, "batch applied");
        stats += applied;

        if let Some(layer) = &mut layer {
            let samples: Vec<ChangeEvent<TrafficSample>> = typed
                .into_iter()
                .filter_map(|e| e.try_map(|r| r.into_traffic_sample().ok_or(())).ok())
                .collect();
            stats.errors += layer.apply(&samples).errors;
        }
    }

    let markers = layer.as_mut().map_or_else(Vec::new, |layer| {
        let markers = layer.sink().canvas().markers();
        let teardown = layer.teardown();
        debug!(destroyed = teardown.destroyed, "marker layer torn down");
        markers
    });
    let live = records.projection().len();
    info!(
        collection = %collection,
        batches = batches.len(),
        live,
        markers = markers.len(),
        "replay complete"
    );

    let out = ReplayOutput {
        collection,
        batches: batches.len(),
        events: batches.iter().map(Vec::len).sum(),
        live,
        markers,
        stats,
        rejected: view_stats.rejected,
        persisted: store.as_ref().map(|_| persisted),
    };
    render_mode(ctx.output, &out, write_text, write_pretty)
}

fn write_text(out: &ReplayOutput, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "replay collection={} batches={} events={} live={} markers={} rejected={}",
        out.collection,
        out.batches,
        out.events,
        out.live,
        out.markers.len(),
        out.rejected
    )?;
    for m in &out.markers {
        writeln!(w, "marker {}\t{}\t{}", m.id, m.label, m.color)?;
    }
    Ok(())
}

fn write_pretty(out: &ReplayOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Feed replay")?;
    pretty_kv(w, "Collection", out.collection.to_string())?;
    pretty_kv(w, "Batches", out.batches.to_string())?;
    pretty_kv(w, "Events", out.events.to_string())?;
    pretty_kv(
        w,
        "Applied",
        format!(
            "{} created, {} updated, {} replaced, {} healed, {} destroyed, {} ignored",
            out.stats.created,
            out.stats.updated,
            out.stats.replaced,
            out.stats.healed,
            out.stats.destroyed,
            out.stats.ignored
        ),
    )?;
    if out.stats.errors > 0 {
        pretty_kv(w, "Errors", out.stats.errors.to_string())?;
    }
    pretty_kv(w, "Live", out.live.to_string())?;
    pretty_kv(w, "Rejected", out.rejected.to_string())?;
    if let Some(n) = out.persisted {
        pretty_kv(w, "Persisted", n.to_string())?;
    }
    if out.collection != Collection::TrafficData {
        return Ok(());
    }
    writeln!(w)?;
    pretty_section(w, &format!("Final markers ({})", out.markers.len()))?;
    for m in &out.markers {
        writeln!(w, "{:>4}  {:<8} {:<24} {}", m.label, m.color, m.popup.title, m.id)?;
    }
    Ok(())
}
