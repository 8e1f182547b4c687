use anyhow::Result;
use clap::Args;
use roadpulse_core::model::{Coordinates, ReportType};
use roadpulse_core::views::report::{KarmaAward, ReportDraft, SubmitOutcome, submit_report};
use serde::Serialize;
use std::io::Write as _;

use super::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Accident, Pothole, Roadblock, Flooding or Other.
    #[arg(long = "type", default_value = "Other")]
    pub report_type: ReportType,

    /// What happened.
    #[arg(long, default_value = "")]
    pub description: String,

    /// Human-readable place name.
    #[arg(long, default_value = "")]
    pub location: String,

    /// Latitude of the pinned location.
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude of the pinned location.
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lng: Option<f64>,

    /// Link to an already uploaded photo.
    #[arg(long)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReportOutput {
    report_type: ReportType,
    #[serde(flatten)]
    outcome: SubmitOutcome,
}

/// Execute `rp report`.
///
/// # Errors
///
/// Returns an error if the draft is incomplete or invalid, or the report
/// cannot be written. A failed karma award is reported, not raised.
pub fn run_report(args: ReportArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let report_type = args.report_type;
    let draft = ReportDraft {
        report_type,
        description: args.description,
        location: args.location,
        coordinates: args
            .lat
            .zip(args.lng)
            .map(|(latitude, longitude)| Coordinates {
                latitude,
                longitude,
            }),
        photo_url: args.photo_url,
    };
    let outcome = submit_report(
        &store,
        draft,
        ctx.session.current(),
        &ctx.config.project.karma,
        ctx.now_us,
    )?;

    let out = ReportOutput {
        report_type,
        outcome,
    };
    render_mode(
        ctx.output,
        &out,
        |o, w| {
            writeln!(
                w,
                "report id={} type={} karma={}",
                o.outcome.report_id,
                o.report_type,
                award_summary(&o.outcome.karma)
            )
        },
        |o, w| {
            pretty_section(w, "Report submitted")?;
            pretty_kv(w, "ID", o.outcome.report_id.as_str())?;
            pretty_kv(w, "Type", o.report_type.as_str())?;
            pretty_kv(w, "Karma", award_summary(&o.outcome.karma))
        },
    )
}

fn award_summary(award: &KarmaAward) -> String {
    match award {
        KarmaAward::Awarded { uid, points } => format!("+{points} for {uid}"),
        KarmaAward::SignedOut => "none (signed out)".to_string(),
        KarmaAward::Failed { uid, error } => format!("not awarded to {uid}: {error}"),
    }
}
