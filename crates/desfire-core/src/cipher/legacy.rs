//! Legacy framing for DES and 2K3DES keys.
//!
//! Every exchange starts from a zero IV. Commands are enciphered in send mode
//! (see [`desfire_crypto::primitive`]), responses deciphered normally.
//!
//! ```text
//! TX maced:     [clear][data][mac4]              mac4 = MAC(data)[0..4]
//! TX ciphered:  [clear][E(data || crc16 || 0..)]
//! RX maced:     [data][mac4][status]
//! RX ciphered:  [E(data || crc16 || 0..)][status]
//! ```
//!
//! The status byte of a maced response is not covered by the MAC.

use desfire_crypto::{
    CRC16_INIT, CRC16_SIZE, CipherType, CrcScan, CryptoError, CryptoOperation, Key, Primitive,
    ZERO_PADDING, crc16, find_crc_tail, padded_length,
};
use subtle::ConstantTimeEq;

use crate::{error::ChannelError, mode::CommMode};

/// Block size of every legacy primitive
pub const LEGACY_BLOCK_SIZE: usize = 8;

/// Size of the truncated legacy MAC
pub const LEGACY_MAC_SIZE: usize = 4;

/// Truncated legacy MAC.
pub type LegacyMac = [u8; LEGACY_MAC_SIZE];

/// Secure messaging with DES and 2K3DES keys.
#[derive(Debug)]
pub struct LegacyCipher {
    primitive: Primitive,
}

impl LegacyCipher {
    /// Wrap a DES or 2K3DES key.
    pub fn new(key: &Key) -> Result<Self, ChannelError> {
        let cipher = key.cipher_type();
        if !matches!(cipher, CipherType::Des | CipherType::Des3_2k) {
            return Err(ChannelError::KeySetup(CryptoError::UnsupportedCipher { cipher }));
        }
        Ok(Self { primitive: Primitive::new(key)? })
    }

    /// Cipher family of the current key.
    pub fn cipher_type(&self) -> CipherType {
        self.primitive.cipher_type()
    }

    /// Whether the current key collapses to single DES.
    pub fn is_degenerate(&self) -> bool {
        self.primitive.is_degenerate()
    }

    /// MAC over `data`, zero padded, with a zero IV.
    pub fn compute_mac(&self, data: &[u8]) -> Result<LegacyMac, ChannelError> {
        let mut buffer = data.to_vec();
        buffer.resize(padded_length(data.len(), LEGACY_BLOCK_SIZE), 0x00);

        let mut iv = [0u8; LEGACY_BLOCK_SIZE];
        self.primitive.do_crypto(&mut buffer, &mut iv, CryptoOperation::Mac)?;

        let mut mac = [0u8; LEGACY_MAC_SIZE];
        mac.copy_from_slice(&iv[..LEGACY_MAC_SIZE]);
        Ok(mac)
    }

    /// Secure `data[offset..]` for transmission.
    pub fn prepare_tx(
        &self,
        data: &mut Vec<u8>,
        offset: usize,
        mode: CommMode,
    ) -> Result<(), ChannelError> {
        if offset >= data.len() || mode == CommMode::Plain {
            return Ok(());
        }

        match mode {
            CommMode::Plain => {},
            CommMode::Maced => {
                let mac = self.compute_mac(&data[offset..])?;
                tracing::debug!(?mac, "legacy TX MAC");
                data.extend_from_slice(&mac);
            },
            CommMode::Ciphered | CommMode::CipheredNoCrc => {
                if mode == CommMode::Ciphered {
                    let crc = crc16(&data[offset..], CRC16_INIT);
                    data.extend_from_slice(&crc.to_le_bytes());
                }
                data.resize(offset + padded_length(data.len() - offset, LEGACY_BLOCK_SIZE), 0x00);

                let mut iv = [0u8; LEGACY_BLOCK_SIZE];
                self.primitive.do_crypto(&mut data[offset..], &mut iv, CryptoOperation::Encrypt)?;
            },
        }
        Ok(())
    }

    /// Verify and unwrap a response `[payload][trailer][status]` in place.
    ///
    /// On success `data` is `[payload][status]`. On failure it is left as
    /// received.
    pub fn confirm_rx(&self, data: &mut Vec<u8>, mode: CommMode) -> Result<(), ChannelError> {
        if data.len() == 1 || mode == CommMode::Plain {
            return Ok(());
        }
        let Some(status) = data.pop() else {
            return Err(ChannelError::IntegrityFailure { reason: "missing status byte" });
        };

        match mode {
            CommMode::Plain => {},
            CommMode::Maced => {
                if data.len() < LEGACY_MAC_SIZE {
                    data.push(status);
                    return Err(ChannelError::IntegrityFailure {
                        reason: "response shorter than MAC",
                    });
                }
                let payload_len = data.len() - LEGACY_MAC_SIZE;
                let computed = self.compute_mac(&data[..payload_len])?;
                tracing::debug!(mac = ?computed, "legacy RX MAC");

                if !bool::from(computed.as_slice().ct_eq(&data[payload_len..])) {
                    tracing::warn!(cipher = %self.cipher_type(), "legacy MAC mismatch");
                    data.push(status);
                    return Err(ChannelError::IntegrityFailure { reason: "MAC mismatch" });
                }
                data.truncate(payload_len);
            },
            CommMode::Ciphered | CommMode::CipheredNoCrc => {
                if data.len() % LEGACY_BLOCK_SIZE != 0 {
                    tracing::warn!(
                        len = data.len(),
                        block_size = LEGACY_BLOCK_SIZE,
                        "enciphered response is not block aligned"
                    );
                    data.push(status);
                    return Err(ChannelError::IntegrityFailure {
                        reason: "ciphertext is not block aligned",
                    });
                }
                let ciphertext = data.clone();
                let mut iv = [0u8; LEGACY_BLOCK_SIZE];
                self.primitive.do_crypto(data, &mut iv, CryptoOperation::Decrypt)?;

                if mode == CommMode::Ciphered {
                    let Some(end) = find_crc_tail(
                        data,
                        LEGACY_BLOCK_SIZE,
                        &ZERO_PADDING,
                        CRC16_INIT,
                        CrcScan::Incremental,
                        crc16,
                    ) else {
                        tracing::warn!(cipher = %self.cipher_type(), "legacy CRC mismatch");
                        *data = ciphertext;
                        data.push(status);
                        return Err(ChannelError::IntegrityFailure { reason: "CRC16 mismatch" });
                    };
                    data.truncate(end.saturating_sub(CRC16_SIZE));
                }
            },
        }

        data.push(status);
        Ok(())
    }

    /// Re-key with the session key spliced from `RndA || RndB`.
    ///
    /// Legacy framing carries no IV or subkeys across exchanges, so nothing
    /// else needs resetting.
    pub fn reinit_with_session_key(&mut self, rnd_ab: &[u8]) -> Result<(), ChannelError> {
        self.primitive.init_session(rnd_ab)?;
        tracing::debug!(
            cipher = %self.cipher_type(),
            degenerate = self.is_degenerate(),
            "legacy session key installed"
        );
        Ok(())
    }
}
