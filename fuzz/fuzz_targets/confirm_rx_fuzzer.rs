//! Fuzz target for response verification
//!
//! Feeds arbitrary card responses to `confirm_rx` of every cipher family in
//! every communication mode.
//!
//! # Strategy
//!
//! - Arbitrary key material and session random per family
//! - Arbitrary response bytes, including empty and misaligned ones
//! - Several responses per session so the chaining value moves
//!
//! # Invariants
//!
//! - `confirm_rx` NEVER panics
//! - An accepted response still ends with the status byte it arrived with
//! - An accepted response never grows
//! - Rejections are integrity failures or mode violations, never key errors
//! - A rejected response is left as received

#![no_main]

use arbitrary::Arbitrary;
use desfire_core::{Cipher, CommMode};
use desfire_crypto::{CipherType, Key};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum FuzzMode {
    Plain,
    Maced,
    Ciphered,
    CipheredNoCrc,
}

impl From<&FuzzMode> for CommMode {
    fn from(mode: &FuzzMode) -> Self {
        match mode {
            FuzzMode::Plain => CommMode::Plain,
            FuzzMode::Maced => CommMode::Maced,
            FuzzMode::Ciphered => CommMode::Ciphered,
            FuzzMode::CipheredNoCrc => CommMode::CipheredNoCrc,
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    /// Family selector, 0-4 (4 is the unkeyed channel)
    family: u8,
    key_material: [u8; 24],
    rnd_ab: [u8; 32],
    responses: Vec<(FuzzMode, Vec<u8>)>,
}

fn key_for(family: u8, material: &[u8; 24]) -> Key {
    let cipher = match family % 5 {
        0 => CipherType::Des,
        1 => CipherType::Des3_2k,
        2 => CipherType::Des3_3k,
        3 => CipherType::Aes128,
        _ => return Key::None,
    };
    Key::from_slice(cipher, &material[..cipher.key_size()]).unwrap_or(Key::None)
}

fuzz_target!(|scenario: Scenario| {
    let key = key_for(scenario.family, &scenario.key_material);
    let Ok(mut cipher) = Cipher::from_key(&key) else {
        return;
    };
    let rnd_len = 2 * key.cipher_type().challenge_size();
    cipher.init_session(&scenario.rnd_ab[..rnd_len.min(scenario.rnd_ab.len())]);

    for (mode, response) in scenario.responses.iter().take(16) {
        let mut data = response.clone();
        let result = cipher.confirm_rx(&mut data, mode.into());

        match result {
            Ok(()) => {
                if let Some(&status) = response.last() {
                    assert_eq!(data.last(), Some(&status), "status byte lost");
                }
                assert!(data.len() <= response.len(), "response grew");
            },
            Err(err) => {
                assert!(err.is_integrity_failure(), "unexpected error {err}");
                assert_eq!(&data, response, "rejected response was altered");
            },
        }
    }
});
