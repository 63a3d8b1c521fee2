//! DESFire Secure Channel
//!
//! Secures command/response exchanges with a DESFire card. Plaintext
//! commands go in, integrity-checked plaintext responses come out; the
//! session key, IV chaining, CRCs and MACs stay inside.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Session: commands, authentication        │
//! └────────────────────┬─────────────────────┘
//!                      │ prepare_tx / confirm_rx
//! ┌────────────────────▼─────────────────────┐
//! │ Cipher: Dummy | Legacy | Default         │
//! └────────────────────┬─────────────────────┘
//!                      │ CBC, CMAC, CRC
//! ┌────────────────────▼─────────────────────┐
//! │ desfire-crypto                           │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The card is reached through the [`Transport`] trait and challenges are
//! drawn from a [`RandomSource`], so the whole channel runs against a
//! simulated card in tests.
//!
//! # Communication Modes
//!
//! | Mode              | Command                 | Response                |
//! |-------------------|-------------------------|-------------------------|
//! | `Plain`           | clear                   | clear                   |
//! | `Maced`           | MAC or CMAC appended    | MAC or CMAC verified    |
//! | `Ciphered`        | CRC appended, enciphered| deciphered, CRC checked |
//! | `CipheredNoCrc`   | enciphered              | deciphered              |
//!
//! # Failure Handling
//!
//! Any integrity, transport or card error ends the session: the key is
//! dropped and the caller must authenticate again.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod config;
pub mod env;
pub mod error;
pub mod mode;
pub mod session;
pub mod status;
pub mod transport;

pub use cipher::{Cipher, DefaultCipher, DummyCipher, LegacyCipher};
pub use config::{ChannelConfig, RxCrcLayout, TxChaining};
pub use env::RandomSource;
pub use error::{ChannelError, TransportError};
pub use mode::{CommConfig, CommMode};
pub use session::{ActiveKey, Response, Session, auth_command};
pub use status::Status;
pub use transport::Transport;
