//! `rp sim`: deterministic change-feed simulation.
//!
//! `rp sim run`: execute a campaign across many seeds.
//! `rp sim replay`: replay a single seed with its trace.

use std::io::{self, Write};
use std::process;

use anyhow::Result;
use clap::{Args, Subcommand};
use roadpulse_sim::campaign::{CampaignConfig, format_violation, replay_seed, run_campaign};
use roadpulse_sim::generator::{FaultConfig, FaultKind, TraceEvent, TraceEventKind};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Failures listed before the rest are summarized.
const FAILURE_SAMPLE: usize = 5;

#[derive(Args, Debug)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimCommand {
    #[command(
        about = "Run a simulation campaign across multiple seeds",
        long_about = "Drive fault-injecting change feeds through the synchronizer for a range\n\
                      of seeds and check every run against the source-side truth. Reports\n\
                      pass/fail per seed and the first failure for replay.",
        after_help = "EXAMPLES:\n    # Run 100 seeds with defaults\n    rp sim run --seeds 100\n\n\
                      # Heavier faults and failing render calls\n    rp sim run --seeds 200 --faults 0.3 --sink-failures 10\n\n\
                      # Machine-readable output\n    rp sim run --seeds 100 --format json"
    )]
    Run(SimRunArgs),

    #[command(
        about = "Replay a single seed with its trace",
        long_about = "Replay one seed and print the delivered batches, injected faults and\n\
                      oracle verdict. Use after a campaign failure to debug.",
        after_help = "EXAMPLES:\n    # Replay seed 42\n    rp sim replay --seed 42\n\n\
                      # Include every trace event\n    rp sim replay --seed 42 --trace\n\n\
                      # Machine-readable output\n    rp sim replay --seed 42 --format json"
    )]
    Replay(SimReplayArgs),
}

/// Feed shape shared by `run` and `replay`.
#[derive(Args, Debug, Clone)]
pub struct FeedParams {
    /// Distinct identities the feed draws from.
    #[arg(long, default_value = "8")]
    pub identities: usize,

    /// Generator steps per seed.
    #[arg(long, default_value = "64")]
    pub steps: u64,

    /// Overall delivery fault rate, 0.0 to 1.0 (scales every fault kind).
    #[arg(long, default_value = "0.1")]
    pub faults: f64,

    /// Chance of closing a batch after each step, in percent.
    #[arg(long, default_value = "25")]
    pub split: u8,

    /// Hard cap on events per batch.
    #[arg(long, default_value = "8")]
    pub max_batch: usize,

    /// Chance that a render call fails, in percent.
    #[arg(long, default_value = "0")]
    pub sink_failures: u8,
}

#[derive(Args, Debug)]
pub struct SimRunArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    /// Starting seed value.
    #[arg(long, default_value = "0")]
    pub seed_start: u64,

    #[command(flatten)]
    pub feed: FeedParams,
}

#[derive(Args, Debug)]
pub struct SimReplayArgs {
    /// Seed to replay.
    #[arg(long)]
    pub seed: u64,

    /// List every trace event, not just faults.
    #[arg(long)]
    pub trace: bool,

    #[command(flatten)]
    pub feed: FeedParams,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    events_delivered: usize,
    all_passed: bool,
    failures: Vec<FailureOutput>,
    #[serde(skip)]
    replay_hint: String,
}

#[derive(Debug, Serialize)]
struct FailureOutput {
    seed: u64,
    violations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    seed: u64,
    batches: Vec<usize>,
    events: usize,
    live: usize,
    faults: Vec<FaultKind>,
    sink_failures: usize,
    oracle_passed: bool,
    violations: Vec<String>,
    interesting_state_reached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<Vec<TraceEvent>>,
    #[serde(skip)]
    fault_events: Vec<TraceEvent>,
}

/// Scale the overall fault rate (0.0 to 1.0) by a weight to get a percent.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_fault(base: f64, weight_pct: u8) -> u8 {
    (base * f64::from(weight_pct)).clamp(0.0, 100.0) as u8
}

fn build_campaign_config(seed_start: u64, seeds: u64, feed: &FeedParams) -> CampaignConfig {
    let defaults = FaultConfig::default();
    CampaignConfig {
        seed_range: seed_start..seed_start.saturating_add(seeds),
        identities: feed.identities,
        steps: feed.steps,
        duplicate_added_percent: scale_fault(feed.faults, 100),
        modified_before_added_percent: scale_fault(feed.faults, 100),
        redeliver_removed_percent: scale_fault(feed.faults, 100),
        stray_removed_percent: scale_fault(feed.faults, 50),
        split_batch_percent: feed.split,
        max_batch_len: if feed.max_batch == 0 {
            defaults.max_batch_len
        } else {
            feed.max_batch
        },
        sink_failure_percent: feed.sink_failures,
    }
}

fn replay_command(seed: u64, feed: &FeedParams) -> String {
    format!(
        "rp sim replay --seed {seed} --identities {} --steps {} --faults {} --split {} --max-batch {} --sink-failures {}",
        feed.identities, feed.steps, feed.faults, feed.split, feed.max_batch, feed.sink_failures
    )
}

/// Execute `rp sim run`. Exits with status 1 when any seed fails.
///
/// # Errors
///
/// Returns an error if the campaign parameters are invalid.
pub fn run_sim_run(args: &SimRunArgs, output: OutputMode) -> Result<()> {
    let config = build_campaign_config(args.seed_start, args.seeds, &args.feed);
    let report = run_campaign(&config)?;

    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        first_failure: report.first_failure,
        interesting_states_reached: report.interesting_states_reached,
        events_delivered: report.events_delivered,
        all_passed: report.all_passed(),
        failures: report
            .failures
            .iter()
            .map(|f| FailureOutput {
                seed: f.seed,
                violations: f.violations.clone(),
            })
            .collect(),
        replay_hint: replay_command(report.first_failure.unwrap_or(0), &args.feed),
    };

    render_mode(output, &out, write_run_text, write_run_pretty)?;

    // Non-zero exit for CI.
    if !out.all_passed {
        process::exit(1);
    }
    Ok(())
}

fn write_run_text(out: &RunOutput, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "campaign seeds_run={} events={}",
        out.seeds_run, out.events_delivered
    )?;
    writeln!(
        w,
        "results passed={} failed={} interesting_states={} all_passed={}",
        out.seeds_passed, out.seeds_failed, out.interesting_states_reached, out.all_passed
    )?;
    if out.all_passed {
        return Ok(());
    }
    for failure in out.failures.iter().take(FAILURE_SAMPLE) {
        writeln!(
            w,
            "failure seed={} violations={}",
            failure.seed,
            failure.violations.len()
        )?;
    }
    if out.failures.len() > FAILURE_SAMPLE {
        writeln!(
            w,
            "failures_truncated count={}",
            out.failures.len() - FAILURE_SAMPLE
        )?;
    }
    writeln!(w, "hint {}", out.replay_hint)
}

fn write_run_pretty(out: &RunOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Simulation Campaign")?;
    pretty_kv(w, "Seeds", out.seeds_run.to_string())?;
    pretty_kv(w, "Events", out.events_delivered.to_string())?;
    pretty_kv(
        w,
        "Results",
        format!(
            "{} passed / {} failed ({} interesting states)",
            out.seeds_passed, out.seeds_failed, out.interesting_states_reached
        ),
    )?;
    if out.all_passed {
        return pretty_kv(w, "Status", "all seeds passed");
    }
    pretty_kv(
        w,
        "Status",
        format!(
            "{} failures (first at seed {})",
            out.seeds_failed,
            out.first_failure.unwrap_or(0)
        ),
    )?;
    writeln!(w)?;
    pretty_section(w, "Failure Samples")?;
    for failure in out.failures.iter().take(FAILURE_SAMPLE) {
        writeln!(w, "seed {:<8} violations={}", failure.seed, failure.violations.len())?;
        for violation in &failure.violations {
            writeln!(w, "  - {violation}")?;
        }
    }
    if out.failures.len() > FAILURE_SAMPLE {
        writeln!(w, "... and {} more failures", out.failures.len() - FAILURE_SAMPLE)?;
    }
    writeln!(w)?;
    pretty_kv(w, "Replay", &out.replay_hint)
}

/// Execute `rp sim replay`. Exits with status 1 when the seed fails.
///
/// # Errors
///
/// Returns an error if the parameters are invalid.
pub fn run_sim_replay(args: &SimReplayArgs, output: OutputMode) -> Result<()> {
    let config = build_campaign_config(args.seed, 1, &args.feed);
    let detail = replay_seed(args.seed, &config)?;
    let result = &detail.result;

    let out = ReplayOutput {
        seed: args.seed,
        batches: result.batches.iter().map(Vec::len).collect(),
        events: result.event_count(),
        live: result.projection.len(),
        faults: result.faults(),
        sink_failures: result.ledger.failures,
        oracle_passed: detail.oracle.passed,
        violations: detail.oracle.violations.iter().map(format_violation).collect(),
        interesting_state_reached: result.interesting_state_reached,
        trace: args.trace.then(|| result.trace.clone()),
        fault_events: result
            .trace
            .iter()
            .filter(|t| matches!(t.kind, TraceEventKind::Fault { .. }))
            .cloned()
            .collect(),
    };

    render_mode(output, &out, write_replay_text, write_replay_pretty)?;

    if !out.oracle_passed {
        process::exit(1);
    }
    Ok(())
}

fn describe_trace_event(event: &TraceEvent) -> String {
    match &event.kind {
        TraceEventKind::Emit { id, kind, value } => match value {
            Some(v) => format!("emit {kind} {id} = {v}"),
            None => format!("emit {kind} {id}"),
        },
        TraceEventKind::Fault { fault, id } => format!("fault {fault:?} {id}"),
        TraceEventKind::BatchClosed { len } => format!("batch closed len={len}"),
    }
}

fn write_replay_text(out: &ReplayOutput, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "replay seed={} batches={} events={} live={} sink_failures={}",
        out.seed,
        out.batches.len(),
        out.events,
        out.live,
        out.sink_failures
    )?;
    writeln!(
        w,
        "result oracle_passed={} interesting_state_reached={} faults={}",
        out.oracle_passed,
        out.interesting_state_reached,
        out.faults.len()
    )?;
    for violation in &out.violations {
        writeln!(w, "violation={violation}")?;
    }
    let events = out.trace.as_ref().unwrap_or(&out.fault_events);
    for event in events {
        writeln!(
            w,
            "trace step={} batch={} {}",
            event.step,
            event.batch,
            describe_trace_event(event)
        )?;
    }
    Ok(())
}

fn write_replay_pretty(out: &ReplayOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Replay Seed {}", out.seed))?;
    pretty_kv(w, "Batches", out.batches.len().to_string())?;
    pretty_kv(w, "Events", out.events.to_string())?;
    pretty_kv(w, "Live", out.live.to_string())?;
    pretty_kv(w, "Sink failures", out.sink_failures.to_string())?;
    pretty_kv(
        w,
        "Faults",
        if out.faults.is_empty() {
            "none".to_string()
        } else {
            out.faults
                .iter()
                .map(|f| format!("{f:?}"))
                .collect::<Vec<_>>()
                .join(", ")
        },
    )?;
    pretty_kv(w, "Interesting", out.interesting_state_reached.to_string())?;
    pretty_kv(w, "Oracle", out.oracle_passed.to_string())?;

    if !out.oracle_passed {
        writeln!(w)?;
        pretty_section(w, "Invariant Violations")?;
        for violation in &out.violations {
            writeln!(w, "- {violation}")?;
        }
    }

    let (title, events) = out
        .trace
        .as_ref()
        .map_or(("Injected Faults", &out.fault_events), |t| ("Trace", t));
    writeln!(w)?;
    pretty_section(w, title)?;
    for event in events {
        writeln!(
            w,
            "step {:<5} batch {:<4} {}",
            event.step,
            event.batch,
            describe_trace_event(event)
        )?;
    }
    Ok(())
}

/// Dispatch `rp sim` subcommands.
///
/// # Errors
///
/// Returns an error if the simulation parameters are invalid.
pub fn run_sim(args: &SimArgs, output: OutputMode) -> Result<()> {
    match &args.command {
        SimCommand::Run(run_args) => run_sim_run(run_args, output),
        SimCommand::Replay(replay_args) => run_sim_replay(replay_args, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(faults: f64) -> FeedParams {
        FeedParams {
            identities: 8,
            steps: 64,
            faults,
            split: 25,
            max_batch: 8,
            sink_failures: 0,
        }
    }

    #[test]
    fn fault_rate_scales_each_kind() {
        let config = build_campaign_config(10, 5, &feed(0.1));
        assert_eq!(config.seed_range, 10..15);
        assert_eq!(config.duplicate_added_percent, 10);
        assert_eq!(config.stray_removed_percent, 5);
        assert_eq!(config.split_batch_percent, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fault_rate_is_clamped() {
        assert_eq!(scale_fault(5.0, 100), 100);
        assert_eq!(scale_fault(-1.0, 100), 0);
    }

    #[test]
    fn zero_batch_cap_falls_back_to_default() {
        let mut params = feed(0.0);
        params.max_batch = 0;
        let config = build_campaign_config(0, 1, &params);
        assert_eq!(config.max_batch_len, FaultConfig::default().max_batch_len);
    }

    #[test]
    fn replay_hint_round_trips_the_flags() {
        let hint = replay_command(7, &feed(0.2));
        assert!(hint.starts_with("rp sim replay --seed 7"));
        assert!(hint.contains("--faults 0.2"));
    }
}
