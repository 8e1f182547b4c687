#![forbid(unsafe_code)]

use anyhow::Result;
use roadpulse_sim::oracle::FeedOracle;
use roadpulse_sim::{SimulationConfig, Simulator};

fn main() -> Result<()> {
    let mut simulator = Simulator::new(SimulationConfig::default())?;
    let result = simulator.run()?;
    let oracle = FeedOracle::check_all(&result);

    println!(
        "simulation complete: batches={} events={} live={} passed={} interesting={}",
        result.batches.len(),
        result.event_count(),
        result.projection.len(),
        oracle.passed,
        result.interesting_state_reached
    );

    Ok(())
}
