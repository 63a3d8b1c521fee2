//! Card side of the secure channel.
//!
//! Mirrors what a card does with the frames a reader secures: recovers
//! commands (`confirm_tx`) and secures responses (`prepare_rx`). Written
//! against the primitives directly, not against the reader's cipher
//! wrappers, so the two sides check each other.

use desfire_core::{ChannelConfig, CommMode, RxCrcLayout, Status, TxChaining};
use desfire_crypto::{
    CMAC_SIZE, CRC16_INIT, CRC16_SIZE, CRC32_INIT, CRC32_SIZE, CipherType, CmacKeychain, CrcScan,
    CryptoError, CryptoOperation, Key, MAX_BLOCK_SIZE, PADDING_BYTES, Primitive, ZERO_PADDING,
    crc16, crc32, find_crc_tail, padded_length, primitive::xor_in_place,
};

/// Legacy block and MAC sizes.
const LEGACY_BLOCK: usize = 8;
const LEGACY_MAC: usize = 4;

/// Card-side channel state for one session.
pub enum CardChannel {
    /// No session key
    Plain,
    /// DES or 2K3DES session
    Legacy {
        /// Session-keyed primitive
        primitive: Primitive,
    },
    /// 3K3DES or AES session
    Default {
        /// Session-keyed primitive
        primitive: Primitive,
        /// CMAC subkeys of the session key
        keychain: CmacKeychain,
        /// Chaining value shared with the reader
        iv: [u8; MAX_BLOCK_SIZE],
        /// Whether ciphered commands are CMAC-ed after encryption
        tx_chaining: TxChaining,
        /// What the response CRC covers
        rx_crc_layout: RxCrcLayout,
    },
}

impl CardChannel {
    /// Session channel for `key` after an authentication with `rnd_ab`.
    pub fn open(key: &Key, rnd_ab: &[u8], config: &ChannelConfig) -> Result<Self, CryptoError> {
        let mut primitive = Primitive::new(key)?;
        primitive.init_session(rnd_ab)?;

        Ok(match key.cipher_type() {
            CipherType::None => Self::Plain,
            CipherType::Des | CipherType::Des3_2k => Self::Legacy { primitive },
            CipherType::Des3_3k | CipherType::Aes128 => {
                let keychain = CmacKeychain::new(&primitive);
                Self::Default {
                    primitive,
                    keychain,
                    iv: [0; MAX_BLOCK_SIZE],
                    tx_chaining: config.tx_ciphertext_chaining,
                    rx_crc_layout: config.rx_crc_layout,
                }
            },
        })
    }

    /// Whether a session key is installed.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Plain)
    }

    /// Chaining value of a default session.
    pub fn iv(&self) -> Option<&[u8]> {
        match self {
            Self::Default { primitive, iv, .. } => Some(&iv[..primitive.block_size()]),
            _ => None,
        }
    }

    /// Response mode the card uses when a command does not prescribe one.
    pub fn default_rx_mode(&self) -> CommMode {
        match self {
            Self::Default { .. } => CommMode::Maced,
            _ => CommMode::Plain,
        }
    }

    /// Recover a reader command in place. Bytes before `offset` were sent in
    /// clear.
    ///
    /// Fails with `integrity_error` if the trailer does not verify.
    pub fn confirm_tx(
        &mut self,
        frame: &mut Vec<u8>,
        offset: usize,
        mode: CommMode,
    ) -> Result<(), Status> {
        let result = match self {
            Self::Plain if mode == CommMode::Plain => Ok(()),
            Self::Plain => Err(Status::PermissionDenied),
            Self::Legacy { primitive } => legacy_confirm_tx(primitive, frame, offset, mode),
            Self::Default { primitive, keychain, iv, tx_chaining, .. } => {
                let block_size = primitive.block_size();
                let mut state = DefaultState { primitive, keychain, iv: &mut iv[..block_size] };
                state.confirm_tx(frame, offset, mode, *tx_chaining)
            },
        };
        if let Err(status) = result {
            tracing::debug!(%mode, %status, "card rejected command frame");
        }
        result
    }

    /// Wire bytes `[status][payload][trailer]` of a response.
    pub fn prepare_rx(
        &mut self,
        status: Status,
        payload: &[u8],
        mode: CommMode,
    ) -> Result<Vec<u8>, Status> {
        let mut body = match self {
            Self::Plain => payload.to_vec(),
            Self::Legacy { primitive } => legacy_prepare_rx(primitive, payload, mode)?,
            Self::Default { primitive, keychain, iv, rx_crc_layout, .. } => {
                let block_size = primitive.block_size();
                let mut state = DefaultState { primitive, keychain, iv: &mut iv[..block_size] };
                state.prepare_rx(status, payload, mode, *rx_crc_layout)?
            },
        };
        body.insert(0, status.to_byte());
        Ok(body)
    }
}

impl std::fmt::Debug for CardChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("CardChannel::Plain"),
            Self::Legacy { primitive } => {
                f.debug_struct("CardChannel::Legacy").field("primitive", primitive).finish()
            },
            Self::Default { primitive, tx_chaining, rx_crc_layout, .. } => f
                .debug_struct("CardChannel::Default")
                .field("primitive", primitive)
                .field("tx_chaining", tx_chaining)
                .field("rx_crc_layout", rx_crc_layout)
                .finish_non_exhaustive(),
        }
    }
}

/// Standard CBC encryption, as the card enciphers legacy data.
pub(crate) fn legacy_encipher(primitive: &Primitive, data: &mut [u8]) -> Result<(), Status> {
    let mut iv = [0u8; LEGACY_BLOCK];
    primitive.do_crypto(data, &mut iv, CryptoOperation::Mac).map_err(|_| Status::IntegrityError)
}

/// Undo the reader's send-mode encryption: `x_i = E(y_i) ^ y_{i-1}`.
pub(crate) fn legacy_decipher(primitive: &Primitive, data: &mut [u8]) -> Result<(), Status> {
    if data.len() % LEGACY_BLOCK != 0 {
        return Err(Status::IntegrityError);
    }
    let mut previous = [0u8; LEGACY_BLOCK];
    for block in data.chunks_exact_mut(LEGACY_BLOCK) {
        let mut ciphertext = [0u8; LEGACY_BLOCK];
        ciphertext.copy_from_slice(block);
        primitive.encrypt_block(block).map_err(|_| Status::IntegrityError)?;
        xor_in_place(block, &previous);
        previous = ciphertext;
    }
    Ok(())
}

fn legacy_mac(primitive: &Primitive, data: &[u8]) -> Result<[u8; LEGACY_MAC], Status> {
    let mut buffer = data.to_vec();
    buffer.resize(padded_length(data.len(), LEGACY_BLOCK), 0x00);
    let mut iv = [0u8; LEGACY_BLOCK];
    primitive
        .do_crypto(&mut buffer, &mut iv, CryptoOperation::Mac)
        .map_err(|_| Status::IntegrityError)?;

    let mut mac = [0u8; LEGACY_MAC];
    mac.copy_from_slice(&iv[..LEGACY_MAC]);
    Ok(mac)
}

fn legacy_confirm_tx(
    primitive: &Primitive,
    frame: &mut Vec<u8>,
    offset: usize,
    mode: CommMode,
) -> Result<(), Status> {
    if offset >= frame.len() || mode == CommMode::Plain {
        return Ok(());
    }
    match mode {
        CommMode::Plain => {},
        CommMode::Maced => {
            let Some(mac_start) = frame.len().checked_sub(LEGACY_MAC).filter(|&s| s >= offset)
            else {
                return Err(Status::LengthError);
            };
            if legacy_mac(primitive, &frame[offset..mac_start])? != frame[mac_start..] {
                return Err(Status::IntegrityError);
            }
            frame.truncate(mac_start);
        },
        CommMode::Ciphered | CommMode::CipheredNoCrc => {
            legacy_decipher(primitive, &mut frame[offset..])?;
            if mode == CommMode::Ciphered {
                let end = find_crc_tail(
                    &frame[offset..],
                    LEGACY_BLOCK,
                    &ZERO_PADDING,
                    CRC16_INIT,
                    CrcScan::Incremental,
                    crc16,
                )
                .ok_or(Status::IntegrityError)?;
                frame.truncate(offset + end.saturating_sub(CRC16_SIZE));
            }
        },
    }
    Ok(())
}

fn legacy_prepare_rx(
    primitive: &Primitive,
    payload: &[u8],
    mode: CommMode,
) -> Result<Vec<u8>, Status> {
    let mut body = payload.to_vec();
    match mode {
        CommMode::Plain => {},
        CommMode::Maced => body.extend_from_slice(&legacy_mac(primitive, payload)?),
        CommMode::Ciphered | CommMode::CipheredNoCrc => {
            if mode == CommMode::Ciphered {
                body.extend_from_slice(&crc16(payload, CRC16_INIT).to_le_bytes());
            }
            body.resize(padded_length(body.len(), LEGACY_BLOCK), 0x00);
            legacy_encipher(primitive, &mut body)?;
        },
    }
    Ok(body)
}

/// Borrowed state of a default session.
struct DefaultState<'a> {
    primitive: &'a Primitive,
    keychain: &'a CmacKeychain,
    iv: &'a mut [u8],
}

impl DefaultState<'_> {
    fn cmac(&mut self, data: &[u8]) -> Result<[u8; CMAC_SIZE], Status> {
        self.keychain
            .compute_cmac(self.primitive, self.iv, data)
            .map_err(|_| Status::IntegrityError)
    }

    fn crypt(&mut self, data: &mut [u8], op: CryptoOperation) -> Result<(), Status> {
        self.primitive.do_crypto(data, self.iv, op).map_err(|_| Status::IntegrityError)
    }

    fn confirm_tx(
        &mut self,
        frame: &mut Vec<u8>,
        offset: usize,
        mode: CommMode,
        tx_chaining: TxChaining,
    ) -> Result<(), Status> {
        match mode {
            CommMode::Plain => {
                self.cmac(frame)?;
            },
            CommMode::Maced => {
                let Some(mac_start) = frame.len().checked_sub(CMAC_SIZE) else {
                    return Err(Status::LengthError);
                };
                if self.cmac(&frame[..mac_start])? != frame[mac_start..] {
                    return Err(Status::IntegrityError);
                }
                frame.truncate(mac_start);
            },
            CommMode::Ciphered | CommMode::CipheredNoCrc => {
                if offset >= frame.len() {
                    return Ok(());
                }
                let ciphertext = frame[offset..].to_vec();
                self.crypt(&mut frame[offset..], CryptoOperation::Decrypt)?;

                if mode == CommMode::Ciphered {
                    // The CRC also covers the bytes sent in clear
                    let (clear, deciphered) = frame.split_at(offset);
                    let end = find_crc_tail(
                        deciphered,
                        self.primitive.block_size(),
                        &PADDING_BYTES,
                        CRC32_INIT,
                        CrcScan::Full,
                        |sequence: &[u8], init: u32| crc32(sequence, crc32(clear, init)),
                    )
                    .ok_or(Status::IntegrityError)?;
                    frame.truncate(offset + end.saturating_sub(CRC32_SIZE));

                    if tx_chaining == TxChaining::CmacCiphertext {
                        self.cmac(&ciphertext)?;
                    }
                }
            },
        }
        Ok(())
    }

    fn prepare_rx(
        &mut self,
        status: Status,
        payload: &[u8],
        mode: CommMode,
        rx_crc_layout: RxCrcLayout,
    ) -> Result<Vec<u8>, Status> {
        let mut body = payload.to_vec();
        let mut with_status = payload.to_vec();
        with_status.push(status.to_byte());

        match mode {
            // A bare status is never CMAC-ed
            CommMode::Plain if payload.is_empty() => {},
            CommMode::Plain => {
                self.cmac(&with_status)?;
            },
            CommMode::Maced => {
                let mac = self.cmac(&with_status)?;
                body.extend_from_slice(&mac);
            },
            CommMode::Ciphered | CommMode::CipheredNoCrc => {
                if mode == CommMode::Ciphered {
                    let crc = match rx_crc_layout {
                        RxCrcLayout::DataStatus => crc32(&with_status, CRC32_INIT),
                        RxCrcLayout::DataOnly => crc32(payload, CRC32_INIT),
                    };
                    body.extend_from_slice(&crc.to_le_bytes());
                }
                body.resize(padded_length(body.len(), self.primitive.block_size()), 0x00);
                self.crypt(&mut body, CryptoOperation::Encrypt)?;
            },
        }
        Ok(body)
    }
}
