//! Seed campaigns.
//!
//! Runs the simulator over a range of seeds, collects oracle verdicts and
//! remembers the first failing seed so it can be replayed with a full trace.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::generator::FaultConfig;
use crate::oracle::{FeedOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration: which seeds to run and with what feed
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    pub identities: usize,
    pub steps: u64,
    pub duplicate_added_percent: u8,
    pub modified_before_added_percent: u8,
    pub redeliver_removed_percent: u8,
    pub stray_removed_percent: u8,
    pub split_batch_percent: u8,
    pub max_batch_len: usize,
    pub sink_failure_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let fault = FaultConfig::default();
        Self {
            seed_range: 0..100,
            identities: 8,
            steps: 64,
            duplicate_added_percent: fault.duplicate_added_percent,
            modified_before_added_percent: fault.modified_before_added_percent,
            redeliver_removed_percent: fault.redeliver_removed_percent,
            stray_removed_percent: fault.stray_removed_percent,
            split_batch_percent: fault.split_batch_percent,
            max_batch_len: fault.max_batch_len,
            sink_failure_percent: 0,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            identities: self.identities,
            steps: self.steps,
            fault: FaultConfig {
                duplicate_added_percent: self.duplicate_added_percent,
                modified_before_added_percent: self.modified_before_added_percent,
                redeliver_removed_percent: self.redeliver_removed_percent,
                stray_removed_percent: self.stray_removed_percent,
                split_batch_percent: self.split_batch_percent,
                max_batch_len: self.max_batch_len,
            },
            sink_failure_percent: self.sink_failure_percent,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        let percents = [
            self.duplicate_added_percent,
            self.modified_before_added_percent,
            self.redeliver_removed_percent,
            self.stray_removed_percent,
            self.split_batch_percent,
            self.sink_failure_percent,
        ];
        if percents.iter().any(|p| *p > 100) {
            bail!("fault percentages must be within 0..=100");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that injected at least three distinct delivery faults.
    pub interesting_states_reached: usize,
    /// Change events delivered across all seeds.
    pub events_delivered: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A replayed seed with its trace and oracle verdict.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in the configured range.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
        events_delivered: 0,
    };

    for seed in config.seed_range.clone() {
        let (result, oracle) = simulate(seed, config)?;
        report.seeds_run += 1;
        report.events_delivered += result.event_count();
        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }
        if oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        events = report.events_delivered,
        "campaign complete"
    );
    Ok(report)
}

/// Run a single seed: `Ok(())` on pass, the violations on failure.
///
/// # Errors
///
/// The outer error reports an invalid configuration; the inner one
/// distinguishes pass from invariant violations.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let (_, oracle) = simulate(seed, config)?;
    if oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(oracle.violations))
    }
}

/// Replay one seed keeping the full trace.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    let (result, oracle) = simulate(seed, config)?;
    Ok(DetailedTrace { result, oracle })
}

fn simulate(seed: u64, config: &CampaignConfig) -> Result<(SimulationResult, OracleResult)> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = FeedOracle::check_all(&result);
    Ok((result, oracle))
}

/// One-line human-readable form of a violation.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::Projection {
            id,
            expected,
            actual,
        } => format!("Projection: {id} expected {expected:?}, found {actual:?}"),
        InvariantViolation::DoubleDestroy { serial, id, count } => {
            format!("DoubleDestroy: handle #{serial} of {id} destroyed {count} times")
        }
        InvariantViolation::LeakedHandle { serial, id } => {
            format!("LeakedHandle: handle #{serial} of {id} survived teardown")
        }
        InvariantViolation::ExtraCreate {
            id,
            creates,
            lifecycles,
        } => format!("ExtraCreate: {id} created {creates} times over {lifecycles} lifecycles"),
        InvariantViolation::BatchSensitivity { id, split, joined } => format!(
            "BatchSensitivity: {id} is {split:?} batch by batch but {joined:?} as one batch"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_seed_range_rejected() {
        let config = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_len_rejected() {
        let config = CampaignConfig {
            max_batch_len: 0,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_percent_rejected() {
        let config = CampaignConfig {
            split_batch_percent: 101,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sim_config_for_seed_uses_correct_seed() {
        let config = CampaignConfig::default();
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.identities, config.identities);
        assert_eq!(sim.fault.max_batch_len, config.max_batch_len);
    }

    #[test]
    fn hundred_seeds_pass() {
        let report = run_campaign(&CampaignConfig::default()).expect("campaign");
        assert_eq!(report.seeds_run, 100);
        assert!(
            report.all_passed(),
            "campaign failed: {} failures, first at seed {:?}",
            report.failures.len(),
            report.first_failure,
        );
        assert!(report.events_delivered > 0);
    }

    #[test]
    fn noisy_campaign_reaches_interesting_states() {
        let config = CampaignConfig {
            seed_range: 0..20,
            steps: 120,
            duplicate_added_percent: 30,
            modified_before_added_percent: 30,
            redeliver_removed_percent: 30,
            stray_removed_percent: 20,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert!(report.all_passed());
        assert!(report.interesting_states_reached > 0);
    }

    #[test]
    fn failing_sinks_keep_lifecycle_invariants() {
        let config = CampaignConfig {
            seed_range: 0..25,
            sink_failure_percent: 15,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert!(report.all_passed(), "{:?}", report.failures);
    }

    #[test]
    fn replay_is_deterministic() {
        let config = CampaignConfig::default();
        let a = replay_seed(7, &config).expect("replay 1");
        let b = replay_seed(7, &config).expect("replay 2");
        assert_eq!(a.result.trace, b.result.trace);
        assert_eq!(a.result.projection, b.result.projection);
        assert!(a.oracle.passed);
        assert!(run_single_seed(7, &config).expect("run").is_ok());
    }

    #[test]
    fn report_serializes_to_json() {
        let report = CampaignReport {
            seeds_run: 10,
            seeds_passed: 9,
            first_failure: Some(7),
            failures: vec![SeedFailure {
                seed: 7,
                violations: vec!["LeakedHandle: handle #3 of rec-001 survived teardown".into()],
            }],
            interesting_states_reached: 5,
            events_delivered: 640,
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"seeds_run\":10"));
        assert!(json.contains("\"first_failure\":7"));
    }

    #[test]
    fn format_violation_is_readable() {
        let s = format_violation(&InvariantViolation::ExtraCreate {
            id: "rec-002".into(),
            creates: 2,
            lifecycles: 1,
        });
        assert!(s.starts_with("ExtraCreate"));
        assert!(s.contains("rec-002"));
    }
}
