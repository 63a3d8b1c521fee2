//! Default framing for 3K3DES and AES keys.
//!
//! The IV persists across exchanges and every frame moves it forward, MAC-ed
//! or not: plain frames still run through CMAC. Both sides must see exactly
//! the same frames in the same order; a single dropped frame desynchronises
//! the channel until the next authentication.
//!
//! ```text
//! TX plain:     [data]                          CMAC(data) advances IV
//! TX maced:     [data][cmac8]
//! TX ciphered:  [clear][E(data || crc32 || 0..)]   crc32 over the whole command
//! RX plain:     [data][status]                  CMAC(data || status) advances IV
//! RX maced:     [data][cmac8][status]           cmac8 = CMAC(data || status)
//! RX ciphered:  [E(data || crc32 || 0..)][status]
//! ```

use desfire_crypto::{
    CMAC_SIZE, CRC32_INIT, CRC32_SIZE, CipherType, Cmac, CmacKeychain, CrcScan, CryptoError,
    CryptoOperation, Key, MAX_BLOCK_SIZE, PADDING_BYTES, Primitive, crc32, find_crc_tail,
    padded_length,
};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    config::{ChannelConfig, RxCrcLayout, TxChaining},
    error::ChannelError,
    mode::CommMode,
};

/// Secure messaging with 3K3DES and AES keys.
pub struct DefaultCipher {
    primitive: Primitive,
    keychain: CmacKeychain,
    iv: Zeroizing<[u8; MAX_BLOCK_SIZE]>,
    tx_chaining: TxChaining,
    rx_crc_layout: RxCrcLayout,
}

impl DefaultCipher {
    /// Wrap a 3K3DES or AES key.
    pub fn new(key: &Key, config: &ChannelConfig) -> Result<Self, ChannelError> {
        let cipher = key.cipher_type();
        if !matches!(cipher, CipherType::Des3_3k | CipherType::Aes128) {
            return Err(ChannelError::KeySetup(CryptoError::UnsupportedCipher { cipher }));
        }
        let primitive = Primitive::new(key)?;
        let keychain = CmacKeychain::new(&primitive);

        Ok(Self {
            primitive,
            keychain,
            iv: Zeroizing::new([0; MAX_BLOCK_SIZE]),
            tx_chaining: config.tx_ciphertext_chaining,
            rx_crc_layout: config.rx_crc_layout,
        })
    }

    /// Cipher family of the current key.
    pub fn cipher_type(&self) -> CipherType {
        self.primitive.cipher_type()
    }

    /// Block size of the primitive (8 or 16).
    pub fn block_size(&self) -> usize {
        self.primitive.block_size()
    }

    /// Whether the current key collapses to single DES; never for these families.
    pub fn is_degenerate(&self) -> bool {
        self.primitive.is_degenerate()
    }

    /// Current chaining value.
    pub fn iv(&self) -> &[u8] {
        &self.iv[..self.block_size()]
    }

    /// CMAC of `data`, advancing the IV.
    pub fn compute_cmac(&mut self, data: &[u8]) -> Result<Cmac, ChannelError> {
        let block_size = self.block_size();
        Ok(self.keychain.compute_cmac(&self.primitive, &mut self.iv[..block_size], data)?)
    }

    /// Secure `data` for transmission. `offset` only applies to the
    /// enciphered modes; CMAC and CRC always cover the whole command.
    pub fn prepare_tx(
        &mut self,
        data: &mut Vec<u8>,
        offset: usize,
        mode: CommMode,
    ) -> Result<(), ChannelError> {
        match mode {
            CommMode::Plain | CommMode::Maced => {
                let mac = self.compute_cmac(data)?;
                tracing::debug!(?mac, %mode, "TX CMAC");
                if mode == CommMode::Maced {
                    data.extend_from_slice(&mac);
                }
            },
            CommMode::Ciphered | CommMode::CipheredNoCrc => {
                if offset >= data.len() {
                    return Ok(());
                }
                if mode == CommMode::Ciphered {
                    let crc = crc32(data, CRC32_INIT);
                    data.extend_from_slice(&crc.to_le_bytes());
                }
                let block_size = self.block_size();
                data.resize(offset + padded_length(data.len() - offset, block_size), 0x00);
                self.primitive.do_crypto(
                    &mut data[offset..],
                    &mut self.iv[..block_size],
                    CryptoOperation::Encrypt,
                )?;

                if mode == CommMode::Ciphered && self.tx_chaining == TxChaining::CmacCiphertext {
                    self.compute_cmac(&data[offset..])?;
                }
            },
        }
        Ok(())
    }

    /// Verify and unwrap a response `[payload][trailer][status]` in place.
    ///
    /// On success `data` is `[payload][status]`. On failure it is left as
    /// received; the IV has still moved past the response.
    pub fn confirm_rx(&mut self, data: &mut Vec<u8>, mode: CommMode) -> Result<(), ChannelError> {
        if data.len() == 1 {
            return Ok(());
        }

        match mode {
            CommMode::Plain => {
                let mac = self.compute_cmac(data)?;
                tracing::debug!(?mac, "RX CMAC (IV sync)");
            },
            CommMode::Maced => self.verify_cmac(data)?,
            CommMode::Ciphered | CommMode::CipheredNoCrc => {
                let Some(status) = data.pop() else {
                    return Err(ChannelError::IntegrityFailure { reason: "missing status byte" });
                };
                let result = self.decipher(data, status, mode);
                data.push(status);
                result?;
            },
        }
        Ok(())
    }

    /// Re-key with the session key spliced from `RndA || RndB`, then reset the
    /// IV and derive fresh CMAC subkeys.
    pub fn reinit_with_session_key(&mut self, rnd_ab: &[u8]) -> Result<(), ChannelError> {
        self.primitive.init_session(rnd_ab)?;
        self.reset_session_state();
        tracing::debug!(cipher = %self.cipher_type(), "session key installed");
        Ok(())
    }

    /// Like [`Self::reinit_with_session_key`], but a random of the wrong size
    /// keeps the current key. IV and subkeys are reset either way.
    pub fn init_session(&mut self, rnd_ab: &[u8]) {
        if let Err(err) = self.reinit_with_session_key(rnd_ab) {
            tracing::warn!(
                cipher = %self.cipher_type(),
                error = %err,
                "session key not derived, keeping current key"
            );
            self.reset_session_state();
        }
    }

    fn reset_session_state(&mut self) {
        self.iv.fill(0);
        self.keychain.initialize_subkeys(&self.primitive);
    }

    fn verify_cmac(&mut self, data: &mut Vec<u8>) -> Result<(), ChannelError> {
        if data.len() < CMAC_SIZE + 1 {
            return Err(ChannelError::IntegrityFailure { reason: "response shorter than CMAC" });
        }
        // [payload][cmac][status] -> [payload][status][cmac]
        let trailer = data.len() - CMAC_SIZE - 1;
        data[trailer..].rotate_right(1);

        let payload_len = data.len() - CMAC_SIZE;
        let computed = self.compute_cmac(&data[..payload_len])?;
        tracing::debug!(mac = ?computed, "RX CMAC");

        if !bool::from(computed.as_slice().ct_eq(&data[payload_len..])) {
            tracing::warn!(cipher = %self.cipher_type(), "CMAC mismatch");
            data[trailer..].rotate_left(1);
            return Err(ChannelError::IntegrityFailure { reason: "CMAC mismatch" });
        }
        data.truncate(payload_len);
        Ok(())
    }

    fn decipher(
        &mut self,
        data: &mut Vec<u8>,
        status: u8,
        mode: CommMode,
    ) -> Result<(), ChannelError> {
        let block_size = self.block_size();
        if data.len() % block_size != 0 {
            tracing::warn!(
                len = data.len(),
                block_size,
                "enciphered response is not block aligned"
            );
            return Err(ChannelError::IntegrityFailure {
                reason: "ciphertext is not block aligned",
            });
        }
        let ciphertext = data.clone();
        self.primitive.do_crypto(data, &mut self.iv[..block_size], CryptoOperation::Decrypt)?;

        if mode == CommMode::CipheredNoCrc {
            return Ok(());
        }
        let end = match self.rx_crc_layout {
            RxCrcLayout::DataStatus => find_crc_tail(
                data,
                block_size,
                &PADDING_BYTES,
                CRC32_INIT,
                CrcScan::Full,
                |sequence: &[u8], init: u32| crc32_with_status(sequence, status, init),
            ),
            RxCrcLayout::DataOnly => find_crc_tail(
                data,
                block_size,
                &PADDING_BYTES,
                CRC32_INIT,
                CrcScan::Incremental,
                crc32,
            ),
        };
        let Some(end) = end else {
            tracing::warn!(cipher = %self.cipher_type(), "CRC32 mismatch");
            *data = ciphertext;
            return Err(ChannelError::IntegrityFailure { reason: "CRC32 mismatch" });
        };
        data.truncate(end.saturating_sub(CRC32_SIZE));
        Ok(())
    }
}

/// CRC32 of `[data][crc]` with `status` spliced in before the CRC.
fn crc32_with_status(sequence: &[u8], status: u8, init: u32) -> u32 {
    let (payload, crc) = sequence.split_at(sequence.len().saturating_sub(CRC32_SIZE));
    crc32(crc, crc32(&[status], crc32(payload, init)))
}

impl std::fmt::Debug for DefaultCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCipher")
            .field("primitive", &self.primitive)
            .field("tx_chaining", &self.tx_chaining)
            .field("rx_crc_layout", &self.rx_crc_layout)
            .finish_non_exhaustive()
    }
}
