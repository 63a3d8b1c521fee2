//! Model-based property tests of the secure channel against a simulated card.
//!
//! # Invariants
//!
//! - Over a perfect link every operation agrees with the file oracle
//! - Reader and card agree on the session key and the chaining value
//! - Over a faulty link no protected response is accepted with wrong data
//! - A failed exchange always ends the reader's session
//! - A seed fully determines a run

use desfire_core::{ChannelConfig, RxCrcLayout, TxChaining};
use desfire_harness::{FaultConfig, Operation, SimDriver, SmallPayload};
use proptest::prelude::*;

fn small_payload_strategy() -> impl Strategy<Value = SmallPayload> {
    (any::<u8>(), any::<u8>()).prop_map(|(seed, len)| SmallPayload { seed, len })
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        2 => (0..5u8).prop_map(|key| Operation::Authenticate { key }),
        1 => Just(Operation::ListFiles),
        4 => (0..4u8, any::<u8>(), any::<u8>())
            .prop_map(|(file, offset, len)| Operation::Read { file, offset, len }),
        4 => (0..4u8, any::<u8>(), small_payload_strategy())
            .prop_map(|(file, offset, content)| Operation::Write { file, offset, content }),
        1 => Just(Operation::Logout),
    ]
}

fn channel_strategy() -> impl Strategy<Value = ChannelConfig> {
    (
        prop_oneof![Just(TxChaining::CmacCiphertext), Just(TxChaining::LastBlock)],
        prop_oneof![Just(RxCrcLayout::DataStatus), Just(RxCrcLayout::DataOnly)],
    )
        .prop_map(|(tx_ciphertext_chaining, rx_crc_layout)| ChannelConfig {
            tx_ciphertext_chaining,
            rx_crc_layout,
            ..ChannelConfig::default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_perfect_link_matches_oracle(
        seed in any::<u64>(),
        channel in channel_strategy(),
        ops in prop::collection::vec(operation_strategy(), 0..40),
    ) {
        let mut driver = SimDriver::new(seed, channel, FaultConfig::NONE);
        for (i, op) in ops.iter().enumerate() {
            if let Err(violation) = driver.apply(op) {
                prop_assert!(false, "operation {} ({:?}): {}", i, op, violation);
            }
        }
    }

    #[test]
    fn prop_faulty_link_never_accepts_forgeries(
        seed in any::<u64>(),
        corrupt_rate in 0.0..0.5f64,
        drop_rate in 0.0..0.2f64,
        ops in prop::collection::vec(operation_strategy(), 0..40),
    ) {
        let faults = FaultConfig { corrupt_rate, drop_rate };
        let mut driver = SimDriver::new(seed, ChannelConfig::default(), faults);
        for (i, op) in ops.iter().enumerate() {
            if let Err(violation) = driver.apply(op) {
                prop_assert!(false, "operation {} ({:?}): {}", i, op, violation);
            }
        }
    }

    #[test]
    fn prop_seed_replays_run(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 1..20),
    ) {
        let faults = FaultConfig { corrupt_rate: 0.2, drop_rate: 0.1 };
        let mut first = SimDriver::new(seed, ChannelConfig::default(), faults);
        let mut second = SimDriver::new(seed, ChannelConfig::default(), faults);

        for op in &ops {
            let a = first.apply(op);
            let b = second.apply(op);
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(first.card().stats(), second.card().stats());
        prop_assert_eq!(first.session().active_key(), second.session().active_key());
    }
}

#[test]
fn full_tour_over_perfect_link() {
    let mut driver = SimDriver::new(42, ChannelConfig::default(), FaultConfig::NONE);
    let ops = [
        Operation::ListFiles,
        Operation::Read { file: 1, offset: 0, len: 0 },
        Operation::Read { file: 2, offset: 0, len: 4 },
        Operation::Authenticate { key: 0 },
        Operation::Write { file: 3, offset: 0, content: SmallPayload { seed: 9, len: 20 } },
        Operation::Read { file: 3, offset: 0, len: 20 },
        Operation::Write { file: 2, offset: 30, content: SmallPayload { seed: 1, len: 2 } },
        Operation::Authenticate { key: 3 },
        Operation::Read { file: 3, offset: 36, len: 0 },
        Operation::Write { file: 2, offset: 31, content: SmallPayload { seed: 1, len: 2 } },
        Operation::Authenticate { key: 2 },
        Operation::Logout,
        Operation::ListFiles,
    ];
    for op in &ops {
        driver.apply(op).unwrap();
    }

    assert_eq!(driver.card().file(3).unwrap().data[..3], [9, 10, 11]);
    assert_eq!(driver.card().file(2).unwrap().data[30..], [1, 2]);
    assert_eq!(driver.card().stats().rejected, 1);
}

#[test]
fn faults_are_counted() {
    let faults = FaultConfig { corrupt_rate: 0.5, drop_rate: 0.25 };
    let mut driver = SimDriver::new(7, ChannelConfig::default(), faults);
    for key in 0..4 {
        for _ in 0..10 {
            driver.apply(&Operation::Authenticate { key }).unwrap();
            driver.apply(&Operation::Read { file: 3, offset: 0, len: 8 }).unwrap();
        }
    }

    let stats = driver.card().stats();
    assert!(stats.corrupted > 0);
    assert!(stats.dropped > 0);
}
