//! Session keys from the authentication challenge.
//!
//! After mutual authentication both sides hold `RndA || RndB`. The session
//! key is spliced from 4-byte chunks of the two randoms:
//!
//! ```text
//! DES     A[0..4]  B[0..4]
//! 2K3DES  A[0..4]  B[0..4]  A[4..8]   B[4..8]      (degenerate: first half twice)
//! 3K3DES  A[0..4]  B[0..4]  A[6..10]  B[6..10]  A[12..16]  B[12..16]
//! AES     A[0..4]  B[0..4]  A[12..16] B[12..16]
//! ```
//!
//! DES-family session keys carry key version 0.

use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    key::{CipherType, Key, set_key_version},
};

/// Length of `RndA || RndB` expected by `cipher`.
pub const fn session_random_size(cipher: CipherType) -> usize {
    2 * cipher.challenge_size()
}

/// Splice the session key for `cipher` out of `RndA || RndB`.
///
/// `degenerate` keeps a 2K3DES key collapsed to single DES: the first half is
/// duplicated instead of drawing fresh bytes for the second.
pub fn derive_session_key(
    cipher: CipherType,
    rnd_ab: &[u8],
    degenerate: bool,
) -> Result<Key, CryptoError> {
    let expected = session_random_size(cipher);
    if cipher == CipherType::None {
        return Err(CryptoError::UnsupportedCipher { cipher });
    }
    if rnd_ab.len() != expected {
        return Err(CryptoError::InvalidSessionRandom { cipher, expected, actual: rnd_ab.len() });
    }

    // Offsets of the 4-byte chunks taken from RndA, then RndB, in turn
    let starts: &[usize] = match cipher {
        CipherType::Des => &[0],
        CipherType::Des3_2k if degenerate => &[0, 0],
        CipherType::Des3_2k => &[0, 4],
        CipherType::Des3_3k => &[0, 6, 12],
        CipherType::Aes128 | CipherType::None => &[0, 12],
    };

    let (a, b) = rnd_ab.split_at(expected / 2);
    let mut body = Zeroizing::new(Vec::with_capacity(cipher.key_size()));
    for &start in starts {
        body.extend_from_slice(&a[start..start + 4]);
        body.extend_from_slice(&b[start..start + 4]);
    }
    if cipher.has_parity_version() {
        set_key_version(&mut body, 0);
    }

    Key::from_slice(cipher, &body)
}
