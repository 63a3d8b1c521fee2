//! Error types for the cipher primitives.

use thiserror::Error;

use crate::key::CipherType;

/// Errors raised while keying or driving a block primitive.
///
/// All of these are raised before any byte is transformed; once a primitive
/// is keyed, block operations do not fail.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material does not match the size mandated by the cipher
    #[error("invalid key length for {cipher}: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Cipher being keyed
        cipher: CipherType,
        /// Required key size in bytes
        expected: usize,
        /// Size that was provided
        actual: usize,
    },

    /// RndA || RndB of the wrong size for the cipher's session key derivation
    #[error("invalid session random length for {cipher}: expected {expected}, got {actual}")]
    InvalidSessionRandom {
        /// Cipher whose session key is being derived
        cipher: CipherType,
        /// Required length of RndA || RndB
        expected: usize,
        /// Length that was provided
        actual: usize,
    },

    /// No block primitive exists for this cipher type
    #[error("no block primitive for cipher {cipher}")]
    UnsupportedCipher {
        /// The offending cipher type
        cipher: CipherType,
    },

    /// Buffer handed to a CBC operation is not a whole number of blocks
    #[error("data of length {len} is not a multiple of the block size {block_size}")]
    MisalignedData {
        /// Length of the buffer
        len: usize,
        /// Block size of the primitive
        block_size: usize,
    },

    /// Chaining vector does not match the block size
    #[error("invalid IV length: expected {expected}, got {actual}")]
    IvLength {
        /// Block size of the primitive
        expected: usize,
        /// Length that was provided
        actual: usize,
    },
}

impl CryptoError {
    /// Returns true if this error comes from bad key material rather than from
    /// a malformed call.
    ///
    /// Key errors abort the session: nothing keyed with that material can be
    /// trusted. Alignment and IV errors are caller bugs on a healthy key.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyLength { .. }
                | Self::InvalidSessionRandom { .. }
                | Self::UnsupportedCipher { .. }
        )
    }
}
