use proptest::prelude::*;
use roadpulse_sim::oracle::FeedOracle;
use roadpulse_sim::{SimulationConfig, Simulator, last_event_state};

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn any_seed_and_shape_satisfies_the_oracle(
        seed in any::<u64>(),
        identities in 1usize..12,
        steps in 1u64..150,
        max_batch_len in 1usize..10,
        sink_failure_percent in prop_oneof![Just(0u8), 1u8..40],
    ) {
        let mut config = SimulationConfig {
            seed,
            identities,
            steps,
            sink_failure_percent,
            ..SimulationConfig::default()
        };
        config.fault.max_batch_len = max_batch_len;

        let result = Simulator::new(config).expect("config").run().expect("run");
        let oracle = FeedOracle::check_all(&result);
        prop_assert!(oracle.passed, "seed {seed}: {:?}", oracle.violations);
        prop_assert_eq!(last_event_state(&result.batches), result.truth);
    }
}
