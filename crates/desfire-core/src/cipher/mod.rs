//! Cipher wrappers and the factory that picks one per key.
//!
//! The set of cipher families is closed, so the wrapper is a closed enum:
//!
//! | Key family      | Wrapper                            |
//! |-----------------|------------------------------------|
//! | none            | [`DummyCipher`]: plain mode only   |
//! | DES, 2K3DES     | [`LegacyCipher`]: CRC16, MAC-4     |
//! | 3K3DES, AES-128 | [`DefaultCipher`]: CRC32, CMAC-8   |
//!
//! Each wrapper exclusively owns its keyed primitive, IV and CMAC subkeys.
//! Buffers are rewritten in place.

mod default;
mod dummy;
mod legacy;

pub use default::DefaultCipher;
use desfire_crypto::{CipherType, Key};
pub use dummy::DummyCipher;
pub use legacy::{LEGACY_BLOCK_SIZE, LEGACY_MAC_SIZE, LegacyCipher, LegacyMac};

use crate::{config::ChannelConfig, error::ChannelError, mode::CommMode};

/// Secure messaging for one key family.
#[derive(Debug)]
pub enum Cipher {
    /// No key
    Dummy(DummyCipher),
    /// DES or 2K3DES key
    Legacy(LegacyCipher),
    /// 3K3DES or AES-128 key
    Default(DefaultCipher),
}

impl Default for Cipher {
    fn default() -> Self {
        Self::Dummy(DummyCipher)
    }
}

impl Cipher {
    /// Wrapper for `key` with the default channel configuration.
    pub fn from_key(key: &Key) -> Result<Self, ChannelError> {
        Self::with_config(key, &ChannelConfig::default())
    }

    /// Wrapper for `key`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::KeySetup`] if the key cannot be installed.
    pub fn with_config(key: &Key, config: &ChannelConfig) -> Result<Self, ChannelError> {
        let cipher = match key.cipher_type() {
            CipherType::None => Self::Dummy(DummyCipher),
            CipherType::Des | CipherType::Des3_2k => Self::Legacy(LegacyCipher::new(key)?),
            CipherType::Des3_3k | CipherType::Aes128 => {
                Self::Default(DefaultCipher::new(key, config)?)
            },
        };
        tracing::debug!(cipher = %key.cipher_type(), "cipher selected");
        Ok(cipher)
    }

    /// Cipher family of the current key.
    pub fn cipher_type(&self) -> CipherType {
        match self {
            Self::Dummy(_) => CipherType::None,
            Self::Legacy(c) => c.cipher_type(),
            Self::Default(c) => c.cipher_type(),
        }
    }

    /// Whether the legacy framing applies. An unkeyed channel counts as legacy.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Dummy(_) | Self::Legacy(_))
    }

    /// Whether the current key is a 2K3DES key with equal halves.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Self::Dummy(_) => false,
            Self::Legacy(c) => c.is_degenerate(),
            Self::Default(c) => c.is_degenerate(),
        }
    }

    /// Chaining value of a 3K3DES or AES channel; legacy channels restart
    /// from zero on every exchange.
    pub fn iv(&self) -> Option<&[u8]> {
        match self {
            Self::Default(c) => Some(c.iv()),
            _ => None,
        }
    }

    /// Secure a command in place for transmission.
    ///
    /// `data` is `[command][payload]`; bytes before `offset` stay in clear.
    pub fn prepare_tx(
        &mut self,
        data: &mut Vec<u8>,
        offset: usize,
        mode: CommMode,
    ) -> Result<(), ChannelError> {
        match self {
            Self::Dummy(c) => c.prepare_tx(mode),
            Self::Legacy(c) => c.prepare_tx(data, offset, mode),
            Self::Default(c) => c.prepare_tx(data, offset, mode),
        }
    }

    /// Verify and unwrap a response in place.
    ///
    /// `data` is `[payload][trailer][status]` and becomes `[payload][status]`.
    /// A status-only response passes unchanged. A rejected response is left
    /// as received.
    pub fn confirm_rx(&mut self, data: &mut Vec<u8>, mode: CommMode) -> Result<(), ChannelError> {
        match self {
            Self::Dummy(c) => c.confirm_rx(mode),
            Self::Legacy(c) => c.confirm_rx(data, mode),
            Self::Default(c) => c.confirm_rx(data, mode),
        }
    }

    /// Start a session from `RndA || RndB`.
    ///
    /// Derives and installs the session key and resets IV and subkeys. A
    /// random of the wrong size is logged and keeps the current key.
    pub fn init_session(&mut self, rnd_ab: &[u8]) {
        match self {
            Self::Dummy(_) => {},
            Self::Legacy(c) => {
                if let Err(err) = c.reinit_with_session_key(rnd_ab) {
                    tracing::warn!(
                        cipher = %c.cipher_type(),
                        error = %err,
                        "session key not derived, keeping current key"
                    );
                }
            },
            Self::Default(c) => c.init_session(rnd_ab),
        }
    }

    /// Start a session from `RndA || RndB`, failing on a bad random.
    ///
    /// # Errors
    ///
    /// [`ChannelError::KeySetup`] if `rnd_ab` does not match the family or
    /// the channel has no key.
    pub fn reinit_with_session_key(&mut self, rnd_ab: &[u8]) -> Result<(), ChannelError> {
        match self {
            Self::Dummy(_) => Err(ChannelError::NotAuthenticated),
            Self::Legacy(c) => c.reinit_with_session_key(rnd_ab),
            Self::Default(c) => c.reinit_with_session_key(rnd_ab),
        }
    }
}

#[cfg(test)]
mod tests {
    use desfire_crypto::{CRC32_INIT, CryptoOperation, Primitive, crc32};

    use super::*;

    #[test]
    fn factory_picks_wrapper_by_family() {
        assert!(matches!(Cipher::from_key(&Key::None).unwrap(), Cipher::Dummy(_)));
        assert!(matches!(Cipher::from_key(&Key::Des([1; 8])).unwrap(), Cipher::Legacy(_)));
        assert!(matches!(Cipher::from_key(&Key::Des3_2k([1; 16])).unwrap(), Cipher::Legacy(_)));
        assert!(matches!(Cipher::from_key(&Key::Des3_3k([1; 24])).unwrap(), Cipher::Default(_)));
        assert!(matches!(Cipher::from_key(&Key::aes128([1; 16])).unwrap(), Cipher::Default(_)));
    }

    #[test]
    fn legacy_flag() {
        assert!(Cipher::default().is_legacy());
        assert!(Cipher::from_key(&Key::Des([1; 8])).unwrap().is_legacy());
        assert!(!Cipher::from_key(&Key::aes128([1; 16])).unwrap().is_legacy());
    }

    #[test]
    fn aes_scenario_ciphered_command() {
        let key: [u8; 16] = (0..16).collect::<Vec<u8>>().try_into().unwrap();
        let mut cipher = Cipher::from_key(&Key::aes128(key)).unwrap();
        cipher.init_session(&[0xAA; 16]);

        let mut data = vec![0x01, 0x02, 0x03];
        cipher.prepare_tx(&mut data, 0, CommMode::Ciphered).unwrap();
        assert_eq!(data.len() % 16, 0);

        let primitive = Primitive::with_key_bytes(CipherType::Aes128, &key).unwrap();
        primitive.do_crypto(&mut data, &mut [0; 16], CryptoOperation::Decrypt).unwrap();
        assert_eq!(data[3..7], crc32(&[0x01, 0x02, 0x03], CRC32_INIT).to_le_bytes());
    }

    #[test]
    fn degenerate_2k3des_scenario() {
        let mut cipher = Cipher::from_key(&Key::Des3_2k([0x3C; 16])).unwrap();
        cipher.init_session(&(0..16).collect::<Vec<u8>>());
        assert!(cipher.is_degenerate());

        let mut distinct = [0x3C; 16];
        distinct[12] = 0x5A;
        let mut cipher = Cipher::from_key(&Key::Des3_2k(distinct)).unwrap();
        cipher.init_session(&(0..16).collect::<Vec<u8>>());
        assert!(!cipher.is_degenerate());
    }

    #[test]
    fn dummy_refuses_sessions_and_secure_modes() {
        let mut cipher = Cipher::default();
        assert_eq!(cipher.reinit_with_session_key(&[0; 16]), Err(ChannelError::NotAuthenticated));

        let mut data = vec![0x60];
        cipher.prepare_tx(&mut data, 1, CommMode::Plain).unwrap();
        let err = cipher.prepare_tx(&mut data, 1, CommMode::Maced).unwrap_err();
        assert!(err.is_integrity_failure());
        assert_eq!(data, [0x60]);
    }
}
