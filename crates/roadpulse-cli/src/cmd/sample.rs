//! `rp sample`: seed the local store by hand.
//!
//! The store stands in for the remote live data source, so these writes are
//! what the map, dashboard and leaderboard views then observe.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use roadpulse_core::error::ErrorCode;
use roadpulse_core::model::{
    Coordinates, LeaderboardEntry, Payload, RecordId, TrafficSample, TrafficStat,
};
use roadpulse_core::source::Collection;
use serde::Serialize;
use std::io::Write as _;
use tracing::info;

use super::Context;
use crate::output::{CommandError, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[command(subcommand)]
    pub command: SampleCommand,
}

#[derive(Subcommand, Debug)]
pub enum SampleCommand {
    /// Add or overwrite a live traffic sample.
    Traffic(TrafficArgs),
    /// Add or overwrite a leaderboard entry.
    Leader(LeaderArgs),
    /// Delete a document.
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
pub struct TrafficArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub lng: f64,

    /// Congestion level, 0-100.
    #[arg(long)]
    pub level: u8,

    /// Incident type shown as the popup title.
    #[arg(long = "type")]
    pub incident_type: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Document id; a fresh one is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Observation time in µs since the epoch (default: now).
    #[arg(long)]
    pub at: Option<i64>,

    /// Do not also record the level in `trafficStats`.
    #[arg(long)]
    pub no_stat: bool,
}

#[derive(Args, Debug)]
pub struct LeaderArgs {
    /// User id; also the document id.
    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub points: i64,

    #[arg(long, default_value = "0")]
    pub reports: u64,

    /// Accuracy percentage, 0-100.
    #[arg(long)]
    pub accuracy: Option<u8>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub id: String,

    /// trafficData, trafficStats, reports, users or leaderboard.
    #[arg(long, default_value = "trafficData")]
    pub collection: String,
}

#[derive(Debug, Serialize)]
struct WriteOutput {
    action: &'static str,
    collection: Collection,
    id: RecordId,
    #[serde(skip_serializing_if = "Option::is_none")]
    stat_id: Option<RecordId>,
}

/// Execute `rp sample <subcommand>`.
///
/// # Errors
///
/// Returns an error if the store is missing, the payload is invalid, or a
/// removed document does not exist.
pub fn run_sample(args: SampleArgs, ctx: &Context) -> Result<()> {
    let out = match args.command {
        SampleCommand::Traffic(args) => add_traffic(args, ctx)?,
        SampleCommand::Leader(args) => add_leader(args, ctx)?,
        SampleCommand::Remove(args) => remove(&args, ctx)?,
    };
    render_mode(
        ctx.output,
        &out,
        |o, w| {
            write!(w, "{} collection={} id={}", o.action, o.collection, o.id)?;
            if let Some(stat) = &o.stat_id {
                write!(w, " stat={stat}")?;
            }
            writeln!(w)
        },
        |o, w| {
            pretty_section(w, &format!("Sample {}", o.action))?;
            pretty_kv(w, "Collection", o.collection.as_str())?;
            pretty_kv(w, "ID", o.id.as_str())?;
            if let Some(stat) = &o.stat_id {
                pretty_kv(w, "Stat", stat.as_str())?;
            }
            Ok(())
        },
    )
}

fn add_traffic(args: TrafficArgs, ctx: &Context) -> Result<WriteOutput> {
    let store = ctx.open_store()?;
    let timestamp = args.at.unwrap_or(ctx.now_us);
    let sample = TrafficSample {
        coordinates: Coordinates {
            latitude: args.lat,
            longitude: args.lng,
        },
        congestion_level: args.level,
        incident_type: args.incident_type,
        description: args.description,
        timestamp,
    };
    sample.validate()?;
    let doc = sample.to_document()?;

    let id = match args.id {
        Some(raw) => {
            let id = RecordId::new(raw);
            store.put(Collection::TrafficData, &id, &doc)?;
            id
        }
        None => store.insert(Collection::TrafficData, &doc)?,
    };

    let stat_id = if args.no_stat {
        None
    } else {
        let stat = TrafficStat {
            timestamp,
            congestion_level: args.level,
        };
        let stat_doc = stat.to_document()?;
        Some(
            store
                .insert(Collection::TrafficStats, &stat_doc)
                .context("record traffic stat")?,
        )
    };
    info!(id = %id, level = args.level, "traffic sample written");

    Ok(WriteOutput {
        action: "written",
        collection: Collection::TrafficData,
        id,
        stat_id,
    })
}

fn add_leader(args: LeaderArgs, ctx: &Context) -> Result<WriteOutput> {
    let store = ctx.open_store()?;
    let entry = LeaderboardEntry {
        user_id: Some(args.user.clone()),
        user_name: args.name.unwrap_or_else(|| "Anonymous".to_string()),
        karma_points: args.points,
        total_reports: args.reports,
        accuracy: args.accuracy,
        last_activity: Some(ctx.now_us),
    };
    entry.validate()?;
    let id = RecordId::new(args.user);
    store.put(Collection::Leaderboard, &id, &entry.to_document()?)?;
    info!(id = %id, points = entry.karma_points, "leaderboard entry written");

    Ok(WriteOutput {
        action: "written",
        collection: Collection::Leaderboard,
        id,
        stat_id: None,
    })
}

fn remove(args: &RemoveArgs, ctx: &Context) -> Result<WriteOutput> {
    let collection = parse_collection(&args.collection)?;
    let store = ctx.open_store()?;
    let id = RecordId::new(args.id.as_str());
    if !store.delete(collection, &id)? {
        return Err(CommandError::new(
            ErrorCode::RecordNotFound,
            format!("no document {collection}/{id}"),
        )
        .into());
    }
    info!(collection = %collection, id = %id, "document removed");

    Ok(WriteOutput {
        action: "removed",
        collection,
        id,
        stat_id: None,
    })
}

fn parse_collection(name: &str) -> Result<Collection> {
    Collection::from_name(name).ok_or_else(|| {
        CommandError::new(
            ErrorCode::InvalidQuery,
            format!(
                "unknown collection '{name}' (expected one of: {})",
                Collection::ALL.map(Collection::as_str).join(", ")
            ),
        )
        .into()
    })
}
