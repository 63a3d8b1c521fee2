//! Channel configuration.
//!
//! Two details of the default (3K3DES/AES) framing are not pinned down by card
//! documentation and differ between card generations: how the IV moves on
//! after an enciphered command, and whether the status byte is covered by the
//! CRC of an enciphered response. Both are configurable here; the card side
//! must be configured the same way.

/// Largest response `Session` accepts, in bytes.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1024;

/// IV update after an enciphered command.
pub const DEFAULT_TX_CIPHERTEXT_CHAINING: TxChaining = TxChaining::CmacCiphertext;

/// CRC coverage of an enciphered response.
pub const DEFAULT_RX_CRC_LAYOUT: RxCrcLayout = RxCrcLayout::DataStatus;

/// How the default wrapper advances its IV after enciphering a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxChaining {
    /// Run the ciphertext through CMAC; the IV becomes its last chaining value
    CmacCiphertext,
    /// Leave the IV at the last ciphertext block
    LastBlock,
}

/// What the CRC32 of an enciphered response covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxCrcLayout {
    /// `crc32(data || status)`
    DataStatus,
    /// `crc32(data)`
    DataOnly,
}

/// Secure channel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// IV update after an enciphered command (default wrapper only)
    pub tx_ciphertext_chaining: TxChaining,
    /// CRC coverage of enciphered responses (default wrapper only)
    pub rx_crc_layout: RxCrcLayout,
    /// Upper bound on the length of a response, status byte included
    pub max_response_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            tx_ciphertext_chaining: DEFAULT_TX_CIPHERTEXT_CHAINING,
            rx_crc_layout: DEFAULT_RX_CRC_LAYOUT,
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
        }
    }
}
