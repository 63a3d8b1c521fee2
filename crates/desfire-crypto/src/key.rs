//! Cipher families and typed key material.

use std::fmt;

use zeroize::Zeroize;

use crate::error::CryptoError;

/// Mask selecting the key bits of a DES key byte (the LSB is parity).
const PARITY_MASK: u8 = 0b1111_1110;

/// Number of leading key bytes whose parity bits carry the key version.
const VERSION_BYTES: usize = 8;

/// Cipher family of a key, and with it the framing of the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherType {
    /// No cipher; only plain communication is possible.
    None,
    /// Single DES, 8-byte key.
    Des,
    /// Two-key triple DES, 16-byte key.
    Des3_2k,
    /// Three-key triple DES, 24-byte key.
    Des3_3k,
    /// AES-128, 16-byte key.
    Aes128,
}

impl CipherType {
    /// Size of the key body in bytes.
    pub const fn key_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Des => 8,
            Self::Des3_2k | Self::Aes128 => 16,
            Self::Des3_3k => 24,
        }
    }

    /// Block size of the underlying primitive; zero for [`CipherType::None`].
    pub const fn block_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Des | Self::Des3_2k | Self::Des3_3k => 8,
            Self::Aes128 => 16,
        }
    }

    /// Size of each party's random challenge (RndA, RndB) in authentication.
    pub const fn challenge_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Des | Self::Des3_2k => 8,
            Self::Des3_3k | Self::Aes128 => 16,
        }
    }

    /// Whether this family uses the legacy (CRC16, 4-byte MAC) framing.
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::None | Self::Des | Self::Des3_2k)
    }

    /// Whether the key version lives in the parity bits of the key body.
    pub const fn has_parity_version(self) -> bool {
        matches!(self, Self::Des | Self::Des3_2k | Self::Des3_3k)
    }
}

impl fmt::Display for CipherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Des => "DES",
            Self::Des3_2k => "2K3DES",
            Self::Des3_3k => "3K3DES",
            Self::Aes128 => "AES128",
        };
        f.write_str(name)
    }
}

/// Store `version` in the parity bits of the first 8 bytes, MSB first.
pub fn set_key_version(body: &mut [u8], version: u8) {
    for (i, byte) in body.iter_mut().take(VERSION_BYTES).enumerate() {
        let bit = (version >> (7 - i)) & 1;
        *byte = (*byte & PARITY_MASK) | bit;
    }
}

/// Read the version stored in the parity bits of the first 8 bytes.
pub fn key_version(body: &[u8]) -> u8 {
    body.iter().take(VERSION_BYTES).fold(0, |v, byte| (v << 1) | (byte & 1))
}

/// True if the two halves of a 16-byte key agree up to parity bits.
///
/// Such a 2K3DES key computes single DES.
pub fn halves_match_except_parity(body: &[u8]) -> bool {
    if body.len() != 16 {
        return false;
    }
    let (first, second) = body.split_at(8);
    first.iter().zip(second).all(|(l, r)| (l & PARITY_MASK) == (r & PARITY_MASK))
}

/// Key material tagged with its cipher family.
///
/// The body of DES-family keys also carries the key version in its parity
/// bits; AES keys carry it alongside. Bodies are zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub enum Key {
    /// No key.
    None,
    /// Single DES key.
    Des([u8; 8]),
    /// Two-key triple DES key.
    Des3_2k([u8; 16]),
    /// Three-key triple DES key.
    Des3_3k([u8; 24]),
    /// AES-128 key.
    Aes128 {
        /// Key body
        body: [u8; 16],
        /// Key version
        version: u8,
    },
}

impl Key {
    /// AES-128 key with version 0.
    pub fn aes128(body: [u8; 16]) -> Self {
        Self::Aes128 { body, version: 0 }
    }

    /// Build a key of the given family from raw bytes.
    ///
    /// The version of DES-family keys is whatever their parity bits say.
    pub fn from_slice(cipher: CipherType, bytes: &[u8]) -> Result<Self, CryptoError> {
        let invalid =
            || CryptoError::InvalidKeyLength { cipher, expected: cipher.key_size(), actual: bytes.len() };

        let key = match cipher {
            CipherType::None if bytes.is_empty() => Self::None,
            CipherType::None => return Err(invalid()),
            CipherType::Des => Self::Des(bytes.try_into().map_err(|_| invalid())?),
            CipherType::Des3_2k => Self::Des3_2k(bytes.try_into().map_err(|_| invalid())?),
            CipherType::Des3_3k => Self::Des3_3k(bytes.try_into().map_err(|_| invalid())?),
            CipherType::Aes128 => Self::aes128(bytes.try_into().map_err(|_| invalid())?),
        };
        Ok(key)
    }

    /// Cipher family of this key.
    pub fn cipher_type(&self) -> CipherType {
        match self {
            Self::None => CipherType::None,
            Self::Des(_) => CipherType::Des,
            Self::Des3_2k(_) => CipherType::Des3_2k,
            Self::Des3_3k(_) => CipherType::Des3_3k,
            Self::Aes128 { .. } => CipherType::Aes128,
        }
    }

    /// Raw key body.
    pub fn body(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Des(body) => body,
            Self::Des3_2k(body) => body,
            Self::Des3_3k(body) => body,
            Self::Aes128 { body, .. } => body,
        }
    }

    /// Key version.
    pub fn version(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Aes128 { version, .. } => *version,
            Self::Des(_) | Self::Des3_2k(_) | Self::Des3_3k(_) => key_version(self.body()),
        }
    }

    /// Same key with a different version.
    ///
    /// For DES-family keys this rewrites the parity bits, which does not
    /// change the cipher output.
    #[must_use]
    pub fn with_version(mut self, new_version: u8) -> Self {
        match &mut self {
            Self::None => {},
            Self::Des(body) => set_key_version(body, new_version),
            Self::Des3_2k(body) => set_key_version(body, new_version),
            Self::Des3_3k(body) => set_key_version(body, new_version),
            Self::Aes128 { version, .. } => *version = new_version,
        }
        self
    }

    /// True for a 2K3DES key whose halves match up to parity.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Self::Des3_2k(body) => halves_match_except_parity(body),
            _ => false,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("cipher", &self.cipher_type())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        match self {
            Self::None => {},
            Self::Des(body) => body.zeroize(),
            Self::Des3_2k(body) => body.zeroize(),
            Self::Des3_3k(body) => body.zeroize(),
            Self::Aes128 { body, .. } => body.zeroize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_per_family() {
        assert_eq!(CipherType::Des.key_size(), 8);
        assert_eq!(CipherType::Des3_2k.key_size(), 16);
        assert_eq!(CipherType::Des3_3k.key_size(), 24);
        assert_eq!(CipherType::Aes128.key_size(), 16);

        assert_eq!(CipherType::Des3_3k.block_size(), 8);
        assert_eq!(CipherType::Aes128.block_size(), 16);

        assert!(CipherType::Des3_2k.is_legacy());
        assert!(!CipherType::Des3_3k.is_legacy());
    }

    #[test]
    fn version_roundtrips_through_parity_bits() {
        let mut body = [0u8; 16];
        for version in [0x00, 0x01, 0x55, 0x80, 0xFF] {
            set_key_version(&mut body, version);
            assert_eq!(key_version(&body), version);
        }
        // Only the first 8 bytes carry version bits
        assert!(body[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn version_of_counting_key() {
        let body = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        assert_eq!(key_version(&body), 0x55);
    }

    #[test]
    fn with_version_keeps_key_bits() {
        let key = Key::Des([0xFE; 8]).with_version(0xA5);
        assert_eq!(key.version(), 0xA5);
        assert!(key.body().iter().all(|b| b & PARITY_MASK == 0xFE));

        let key = Key::aes128([7; 16]).with_version(3);
        assert_eq!(key.version(), 3);
        assert_eq!(key.body(), &[7; 16]);
    }

    #[test]
    fn from_slice_checks_length() {
        let key = Key::from_slice(CipherType::Des3_3k, &[1; 24]).unwrap();
        assert_eq!(key.cipher_type(), CipherType::Des3_3k);

        let err = Key::from_slice(CipherType::Aes128, &[1; 24]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidKeyLength { cipher: CipherType::Aes128, expected: 16, actual: 24 }
        );

        assert!(Key::from_slice(CipherType::None, &[]).is_ok());
        assert!(Key::from_slice(CipherType::None, &[0]).is_err());
    }

    #[test]
    fn degenerate_ignores_parity() {
        let mut body = [0u8; 16];
        body[..8].copy_from_slice(&[0x10, 0x21, 0x32, 0x43, 0x54, 0x65, 0x76, 0x87]);
        body[8..].copy_from_slice(&[0x11, 0x20, 0x33, 0x42, 0x55, 0x64, 0x77, 0x86]);
        assert!(Key::Des3_2k(body).is_degenerate());

        body[15] ^= 0x02;
        assert!(!Key::Des3_2k(body).is_degenerate());

        assert!(!Key::Des([0; 8]).is_degenerate());
    }

    #[test]
    fn debug_redacts_body() {
        let key = Key::aes128([0xAB; 16]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("Aes128"));
        assert!(!rendered.contains("171"));
    }
}
