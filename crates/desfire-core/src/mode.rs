//! Communication modes and per-command channel settings.

use std::fmt;

/// Protection applied to one direction of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommMode {
    /// Bytes travel as they are
    Plain,
    /// Bytes travel in clear with a MAC trailer
    Maced,
    /// Bytes are enciphered together with a CRC trailer
    Ciphered,
    /// Bytes are enciphered without a CRC; used by mutual authentication
    CipheredNoCrc,
}

impl CommMode {
    /// Whether the payload is enciphered.
    pub fn is_ciphered(self) -> bool {
        matches!(self, Self::Ciphered | Self::CipheredNoCrc)
    }

    /// Two-bit encoding used in file and key settings. `CipheredNoCrc` has
    /// none.
    pub fn security_bits(self) -> Option<u8> {
        match self {
            Self::Plain => Some(0b00),
            Self::Maced => Some(0b01),
            Self::Ciphered => Some(0b11),
            Self::CipheredNoCrc => None,
        }
    }
}

impl fmt::Display for CommMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::Maced => "maced",
            Self::Ciphered => "ciphered",
            Self::CipheredNoCrc => "ciphered_no_crc",
        };
        f.write_str(name)
    }
}

/// Default offset of secured data: the command byte stays in clear.
pub const DEFAULT_SECURE_DATA_OFFSET: usize = 1;

/// Channel settings of one command.
///
/// `tx_secure_data_offset` is the number of leading command bytes (command
/// code, file number, offsets) that stay in clear when enciphering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommConfig {
    /// Mode of the command sent to the card
    pub tx: CommMode,
    /// Mode of the card response
    pub rx: CommMode,
    /// First byte of the command that is enciphered or MAC-ed (legacy)
    pub tx_secure_data_offset: usize,
}

impl CommConfig {
    /// Same mode in both directions.
    pub const fn new(mode: CommMode) -> Self {
        Self::split(mode, mode)
    }

    /// Distinct modes for command and response.
    pub const fn split(tx: CommMode, rx: CommMode) -> Self {
        Self { tx, rx, tx_secure_data_offset: DEFAULT_SECURE_DATA_OFFSET }
    }

    /// Same settings with a different secure data offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.tx_secure_data_offset = offset;
        self
    }

    /// Whether either direction needs a session key.
    pub fn requires_session(&self) -> bool {
        self.tx != CommMode::Plain || self.rx != CommMode::Plain
    }
}

impl From<CommMode> for CommConfig {
    fn from(mode: CommMode) -> Self {
        Self::new(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_command_byte_in_clear() {
        let cfg = CommConfig::from(CommMode::Ciphered);
        assert_eq!(cfg.tx, CommMode::Ciphered);
        assert_eq!(cfg.rx, CommMode::Ciphered);
        assert_eq!(cfg.tx_secure_data_offset, 1);
        assert_eq!(cfg.with_offset(7).tx_secure_data_offset, 7);
    }

    #[test]
    fn plain_config_needs_no_session() {
        assert!(!CommConfig::new(CommMode::Plain).requires_session());
        assert!(CommConfig::split(CommMode::Plain, CommMode::Maced).requires_session());
    }

    #[test]
    fn security_bits() {
        assert_eq!(CommMode::Maced.security_bits(), Some(0b01));
        assert_eq!(CommMode::Ciphered.security_bits(), Some(0b11));
        assert_eq!(CommMode::CipheredNoCrc.security_bits(), None);
        assert!(CommMode::CipheredNoCrc.is_ciphered());
        assert!(!CommMode::Maced.is_ciphered());
    }
}
