use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use roadpulse_core::aggregate::{HourlySeries, ReportTypeCounts};
use roadpulse_core::model::ReportType;
use roadpulse_core::views::ViewStats;
use roadpulse_core::views::dashboard::{ChartSink, DashboardView};
use serde::Serialize;

use super::Context;
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};

const BAR_WIDTH: usize = 40;

#[derive(Args, Debug)]
pub struct DashboardArgs {
    /// Also list hours whose average is zero.
    #[arg(long)]
    pub all_hours: bool,
}

/// Counts chart redraws; the view keeps the latest series itself.
#[derive(Debug, Default)]
struct RedrawCounter {
    hourly: usize,
    report_types: usize,
}

impl ChartSink for RedrawCounter {
    fn hourly_congestion(&mut self, _series: &HourlySeries) -> Result<()> {
        self.hourly += 1;
        Ok(())
    }

    fn report_types(&mut self, _counts: &ReportTypeCounts) -> Result<()> {
        self.report_types += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HourRow {
    hour: usize,
    label: String,
    average: f64,
    rounded: i64,
}

#[derive(Debug, Serialize)]
struct TypeRow {
    report_type: ReportType,
    count: u64,
    color: &'static str,
}

#[derive(Debug, Serialize)]
struct DashboardOutput {
    samples: u64,
    hourly: Vec<HourRow>,
    total_reports: u64,
    report_types: Vec<TypeRow>,
    redraws: usize,
    stats: ViewStats,
}

/// Execute `rp dashboard`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or subscribed to.
pub fn run_dashboard(args: &DashboardArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let view = DashboardView::open(
        &store,
        RedrawCounter::default(),
        &ctx.config.project.dashboard,
        ctx.now_us,
    )?;
    let series = view.hourly();
    let counts = view.report_counts();
    let redraws = view.with_charts(|c| c.hourly + c.report_types);
    let out = DashboardOutput {
        samples: series.samples,
        hourly: hour_rows(&series, args.all_hours),
        total_reports: counts.total(),
        report_types: counts
            .iter()
            .map(|(report_type, count)| TypeRow {
                report_type,
                count,
                color: report_type.color(),
            })
            .collect(),
        redraws,
        stats: view.close(),
    };

    render_mode(ctx.output, &out, write_text, write_pretty)
}

fn hour_rows(series: &HourlySeries, all_hours: bool) -> Vec<HourRow> {
    series
        .labels
        .iter()
        .zip(&series.averages)
        .zip(&series.rounded)
        .enumerate()
        .filter(|(_, ((_, average), _))| all_hours || **average > 0.0)
        .map(|(hour, ((label, average), rounded))| HourRow {
            hour,
            label: label.clone(),
            average: *average,
            rounded: *rounded,
        })
        .collect()
}

fn write_text(out: &DashboardOutput, w: &mut dyn Write) -> io::Result<()> {
    for row in &out.hourly {
        writeln!(w, "hour {}\t{}", row.label, row.rounded)?;
    }
    for row in &out.report_types {
        writeln!(w, "type {}\t{}", row.report_type, row.count)?;
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bar(value: i64) -> String {
    let len = (value.clamp(0, 100) as usize * BAR_WIDTH) / 100;
    "#".repeat(len)
}

fn write_pretty(out: &DashboardOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Hourly congestion (last 24h)")?;
    pretty_kv(w, "Samples", out.samples.to_string())?;
    if out.hourly.is_empty() {
        writeln!(w, "(no samples)")?;
    }
    for row in &out.hourly {
        writeln!(w, "{:>6} {:>4}% {}", row.label, row.rounded, bar(row.rounded))?;
    }
    writeln!(w)?;
    pretty_section(w, "Reports by type (last 7 days)")?;
    for row in &out.report_types {
        writeln!(w, "{:<10} {:>5}", row.report_type.as_str(), row.count)?;
    }
    pretty_rule(w)?;
    writeln!(w, "{:<10} {:>5}", "Total", out.total_reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadpulse_core::aggregate::HourlyBuckets;

    #[test]
    fn empty_hours_are_hidden_unless_requested() {
        let mut buckets = HourlyBuckets::default();
        assert!(buckets.add(5, 10.0));
        assert!(buckets.add(5, 20.0));
        let series = HourlySeries::from_buckets(&buckets);

        let rows = hour_rows(&series, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hour, 5);
        assert_eq!(rows[0].label, "5:00");
        assert_eq!(rows[0].rounded, 15);

        assert_eq!(hour_rows(&series, true).len(), 24);
    }

    #[test]
    fn bars_scale_to_width() {
        assert_eq!(bar(100).len(), BAR_WIDTH);
        assert_eq!(bar(50).len(), BAR_WIDTH / 2);
        assert!(bar(-3).is_empty());
    }
}
