//! DESFire Cryptographic Primitives
//!
//! Building blocks for the DESFire secure channel. Pure functions and small
//! owned state, no I/O and no logging. Callers provide the random challenges,
//! which keeps every transform deterministic under test.
//!
//! # Key Lifecycle
//!
//! A long-lived application key authenticates a session; the challenge
//! exchanged during authentication yields the session key that protects every
//! command until the next authentication.
//!
//! ```text
//! Application Key ──(AN10922, optional)──► Diversified Key
//!        │
//!        ▼
//! Mutual authentication: RndA, RndB
//!        │
//!        ▼
//! Session Key ──► Primitive (CBC with explicit IV)
//!        │
//!        ▼
//! CMAC subkeys (3K3DES, AES) ──► CMAC-8 trailers
//! ```
//!
//! # Families
//!
//! | Cipher  | Key | Block | Framing                    |
//! |---------|-----|-------|----------------------------|
//! | DES     | 8   | 8     | legacy: CRC16, 4-byte MAC  |
//! | 2K3DES  | 16  | 8     | legacy: CRC16, 4-byte MAC  |
//! | 3K3DES  | 24  | 8     | default: CRC32, CMAC-8     |
//! | AES-128 | 16  | 16    | default: CRC32, CMAC-8     |
//!
//! # Security
//!
//! - Key bodies, subkeys and key schedules are zeroized on drop
//! - `Debug` output never includes key material
//! - A degenerate 2K3DES key (equal halves) is flagged, since it only
//!   provides single-DES strength

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cmac;
pub mod error;
pub mod integrity;
pub mod kdf;
pub mod key;
pub mod primitive;
pub mod session_key;

pub use self::cmac::{CMAC_SIZE, Cmac, CmacKeychain};
pub use error::CryptoError;
pub use integrity::{
    CRC16_INIT, CRC16_SIZE, CRC32_INIT, CRC32_SIZE, CrcScan, PADDING_BYTES, ZERO_PADDING, crc16,
    crc32, find_crc_tail, padded_length,
};
pub use kdf::diversify_key;
pub use key::{CipherType, Key};
pub use primitive::{CryptoOperation, MAX_BLOCK_SIZE, Primitive};
pub use session_key::{derive_session_key, session_random_size};
