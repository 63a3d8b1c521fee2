//! Fuzz target for a reader session over a faulty link
//!
//! Drives a reader session against the simulated card through arbitrary
//! operation sequences while the card's link drops and corrupts responses.
//!
//! # Strategy
//!
//! - Arbitrary seed for RndA, RndB and fault placement
//! - Corruption rate 0% to 90%, drop rate 0% to 45%
//! - Operation mix: authenticate, list, read, write, logout
//!
//! # Invariants
//!
//! - The session NEVER panics
//! - No protected response is accepted with wrong contents
//! - A failed exchange always ends the reader's session
//! - Reader and card agree on the session key after every operation

#![no_main]

use arbitrary::Arbitrary;
use desfire_core::ChannelConfig;
use desfire_harness::{FaultConfig, Operation, SimDriver};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct ChaosScenario {
    /// Seed of every random choice
    seed: u64,
    /// Corruption rate 0-9 maps to 0%-90%
    corrupt_tenth: u8,
    /// Drop rate 0-9 maps to 0%-45%
    drop_twentieth: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|scenario: ChaosScenario| {
    let faults = FaultConfig {
        corrupt_rate: f64::from(scenario.corrupt_tenth % 10) / 10.0,
        drop_rate: f64::from(scenario.drop_twentieth % 10) / 20.0,
    };
    let mut driver = SimDriver::new(scenario.seed, ChannelConfig::default(), faults);

    for op in scenario.operations.iter().take(64) {
        if let Err(violation) = driver.apply(op) {
            panic!("{op:?}: {violation}");
        }
    }
});
