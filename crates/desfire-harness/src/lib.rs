//! Deterministic simulation harness for the DESFire secure channel.
//!
//! A [`SimCard`] plays the card: it answers authentication, recovers secured
//! commands with its own [`CardChannel`], serves a small [`FileStore`]
//! application and secures the responses. It implements
//! [`desfire_core::Transport`], so the real reader session runs against it
//! unchanged.
//!
//! # Model-Based Testing
//!
//! [`SimDriver`] applies [`Operation`]s to a reader session and to a
//! [`FileStore`] oracle and reports any disagreement as a [`Violation`].
//!
//! # Fault Injection
//!
//! [`FaultConfig`] drops or bit-flips card responses. Every random choice is
//! drawn from a seeded ChaCha RNG, so a failure replays from its seed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod application;
pub mod card_channel;
pub mod operation;
pub mod sim_card;
pub mod sim_driver;

pub use application::{DataFile, FileStore};
pub use card_channel::CardChannel;
pub use operation::{Operation, SmallPayload};
pub use sim_card::{CardStats, FaultConfig, SimCard, SimCardConfig};
pub use sim_driver::{SimDriver, Violation};
