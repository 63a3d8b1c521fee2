//! Error types for the DESFire secure channel.
//!
//! Two layers: transport errors (the link to the card failed) and channel
//! errors (key setup, integrity of the exchanged bytes, authentication and
//! card status). Integrity failures are never retried here; the caller decides
//! whether to authenticate again.

use desfire_crypto::CryptoError;
use thiserror::Error;

use crate::{mode::CommMode, status::Status};

/// Failures of the link below the secure channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No answer from the card within the link timeout
    #[error("card did not answer in time")]
    Timeout,

    /// Card left the field
    #[error("card removed from the field")]
    CardRemoved,

    /// Reader or link failure
    #[error("link error: {0}")]
    Link(String),
}

impl TransportError {
    /// Returns true if the exchange may succeed when repeated.
    ///
    /// Repeating an exchange is only meaningful after authenticating again:
    /// the channel state cannot be resumed after a partial exchange.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Errors of the secure channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Key could not be installed into the cipher
    #[error("key setup failed: {0}")]
    KeySetup(CryptoError),

    /// MAC or CRC mismatch, or malformed ciphertext
    #[error("integrity check failed: {reason}")]
    IntegrityFailure {
        /// What did not verify
        reason: &'static str,
    },

    /// Communication mode not available without a session key
    #[error("communication mode {mode} requires an authenticated session")]
    ModeViolation {
        /// Requested mode
        mode: CommMode,
    },

    /// Underlying transport error, unchanged
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Secure mode requested before authentication
    #[error("not authenticated")]
    NotAuthenticated,

    /// Mutual authentication did not complete
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        /// Step that failed
        reason: &'static str,
    },

    /// Card answered with an error status
    #[error("card returned status {0}")]
    CardStatus(Status),
}

impl ChannelError {
    /// Returns true if the session key can no longer be used.
    ///
    /// After a fatal error both sides have lost IV synchronisation or never
    /// had it; the only way forward is a new authentication.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::KeySetup(_)
                | Self::IntegrityFailure { .. }
                | Self::ModeViolation { .. }
                | Self::Transport(_)
                | Self::AuthenticationFailed { .. }
        )
    }

    /// Returns true for integrity failures, mode violations included.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::IntegrityFailure { .. } | Self::ModeViolation { .. })
    }
}

/// Misaligned buffers only reach the primitive from received ciphertext;
/// everything else is a key problem.
impl From<CryptoError> for ChannelError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::MisalignedData { .. } => {
                Self::IntegrityFailure { reason: "ciphertext is not block aligned" }
            },
            err => Self::KeySetup(err),
        }
    }
}
