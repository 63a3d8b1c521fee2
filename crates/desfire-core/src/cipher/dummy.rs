//! Cipher of an unauthenticated channel.

use crate::{error::ChannelError, mode::CommMode};

/// Passes plain frames through and refuses every other mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyCipher;

impl DummyCipher {
    /// Accept `data` as is if `mode` is plain.
    pub fn prepare_tx(&self, mode: CommMode) -> Result<(), ChannelError> {
        Self::require_plain(mode)
    }

    /// Accept `data` as is if `mode` is plain.
    pub fn confirm_rx(&self, mode: CommMode) -> Result<(), ChannelError> {
        Self::require_plain(mode)
    }

    fn require_plain(mode: CommMode) -> Result<(), ChannelError> {
        if mode == CommMode::Plain {
            Ok(())
        } else {
            tracing::warn!(%mode, "secure mode requested without a session key");
            Err(ChannelError::ModeViolation { mode })
        }
    }
}
