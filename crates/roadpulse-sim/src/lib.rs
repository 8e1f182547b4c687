//! Deterministic change-feed simulation for the roadpulse synchronizer.
//!
//! A seeded generator drives a fault-injecting feed through a
//! [`Synchronizer`] backed by a recording sink; the oracle then checks the
//! result against the source-side truth.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for return types.
//! - **Logging**: `tracing` macros.

pub mod campaign;
pub mod generator;
pub mod oracle;
pub mod recorder;
pub mod rng;

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use roadpulse_core::feed::ChangeEvent;
use roadpulse_core::model::RecordId;
use roadpulse_core::sync::{ApplyStats, Synchronizer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::generator::{FaultConfig, FaultKind, FeedGenerator, TraceEvent, TraceEventKind};
use crate::recorder::{Ledger, RecordingSink};
use crate::rng::DeterministicRng;

pub use generator::{identity_name, last_event_state, lifecycles};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Size of the identity pool the feed draws from.
    pub identities: usize,
    /// Source changes to generate.
    pub steps: u64,
    pub fault: FaultConfig,
    /// Percent of render sink calls that fail.
    pub sink_failure_percent: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            identities: 8,
            steps: 64,
            fault: FaultConfig::default(),
            sink_failure_percent: 0,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if the configuration cannot produce a feed.
    pub fn validate(&self) -> Result<()> {
        if self.identities == 0 {
            bail!("identities must be > 0");
        }
        if self.steps == 0 {
            bail!("steps must be > 0");
        }
        if self.fault.max_batch_len == 0 {
            bail!("max_batch_len must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub batches: Vec<Vec<ChangeEvent<u32>>>,
    /// Source-side state after the last step.
    pub truth: BTreeMap<RecordId, u32>,
    /// Projection after the last batch, before teardown.
    pub projection: BTreeMap<RecordId, u32>,
    /// Projection of the same events applied as one batch.
    pub joined_projection: BTreeMap<RecordId, u32>,
    pub lifecycles: BTreeMap<RecordId, usize>,
    /// Sink ledger after teardown.
    pub ledger: Ledger,
    pub stats: ApplyStats,
    /// At least three distinct delivery faults were injected.
    pub interesting_state_reached: bool,
}

impl SimulationResult {
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Distinct delivery faults seen in the trace.
    #[must_use]
    pub fn faults(&self) -> Vec<FaultKind> {
        let mut seen: Vec<FaultKind> = self
            .trace
            .iter()
            .filter_map(|t| match t.kind {
                TraceEventKind::Fault { fault, .. } => Some(fault),
                _ => None,
            })
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen
    }
}

pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Generate the feed, apply it batch by batch, then tear down.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let config = self.config;
        config.validate()?;
        let mut rng = DeterministicRng::new(config.seed);
        let mut generator = FeedGenerator::new(config.identities, config.fault);
        for _ in 0..config.steps {
            generator.step(&mut rng);
        }
        let feed = generator.finish();

        let sink_seed = config.seed.wrapping_add(0x5EED);
        let mut sync =
            Synchronizer::new(RecordingSink::new(sink_seed, config.sink_failure_percent));
        let mut stats = ApplyStats::default();
        for (index, batch) in feed.batches.iter().enumerate() {
            let applied = sync.apply(batch);
            debug!(
                seed = config.seed,
                batch = index,
                events = batch.len(),
                ?applied,
                "batch applied"
            );
            stats += applied;
        }
        let projection = snapshot(&sync);

        // Same sink seed: the sink sees the identical call sequence.
        let mut joined =
            Synchronizer::new(RecordingSink::new(sink_seed, config.sink_failure_percent));
        let flat: Vec<ChangeEvent<u32>> = feed.batches.iter().flatten().cloned().collect();
        joined.apply(&flat);
        let joined_projection = snapshot(&joined);

        stats += sync.teardown();
        let ledger = sync.sink().ledger().clone();

        let lifecycles = lifecycles(&feed.batches);
        let mut result = SimulationResult {
            seed: config.seed,
            trace: feed.trace,
            batches: feed.batches,
            truth: feed.truth,
            projection,
            joined_projection,
            lifecycles,
            ledger,
            stats,
            interesting_state_reached: false,
        };
        result.interesting_state_reached = result.faults().len() >= 3;
        Ok(result)
    }
}

fn snapshot(sync: &Synchronizer<RecordingSink>) -> BTreeMap<RecordId, u32> {
    sync.projection()
        .iter()
        .map(|(id, marker)| (id.clone(), marker.value))
        .collect()
}
