//! Command/response driver and mutual authentication.
//!
//! A [`Session`] owns the transport and the active cipher. Every exchange runs
//! the command through `prepare_tx`, the response through `confirm_rx`, and
//! splits off the status byte. Any failed exchange drops the session key, as
//! the card does on its side.
//!
//! # Authentication
//!
//! ```text
//! Reader                                   Card
//!   │ [auth cmd][key no]                     │
//!   │───────────────────────────────────────>│
//!   │            [AF][E(RndB)]               │
//!   │<───────────────────────────────────────│
//!   │ [AF][E(RndA || RndB[1..] || RndB[0])]  │
//!   │───────────────────────────────────────>│
//!   │      [00][E(RndA[1..] || RndA[0])]     │
//!   │<───────────────────────────────────────│
//!   session key from RndA || RndB
//! ```

use desfire_crypto::{CipherType, Key};
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    cipher::Cipher,
    config::ChannelConfig,
    env::RandomSource,
    error::ChannelError,
    mode::{CommConfig, CommMode},
    status::Status,
    transport::Transport,
};

/// Authentication with a DES or 2K3DES key
pub const CMD_AUTHENTICATE_LEGACY: u8 = 0x0A;

/// Authentication with a 3K3DES key
pub const CMD_AUTHENTICATE_ISO: u8 = 0x1A;

/// Authentication with an AES key
pub const CMD_AUTHENTICATE_AES: u8 = 0xAA;

/// Continuation of a multi-frame exchange
pub const CMD_ADDITIONAL_FRAME: u8 = 0xAF;

/// Authentication command for a key family; none for an empty key.
pub const fn auth_command(cipher: CipherType) -> Option<u8> {
    match cipher {
        CipherType::None => None,
        CipherType::Des | CipherType::Des3_2k => Some(CMD_AUTHENTICATE_LEGACY),
        CipherType::Des3_3k => Some(CMD_AUTHENTICATE_ISO),
        CipherType::Aes128 => Some(CMD_AUTHENTICATE_AES),
    }
}

/// Verified response of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status byte
    pub status: Status,
    /// Payload without trailer or status
    pub data: Vec<u8>,
}

/// Key a session is authenticated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveKey {
    /// Key number within the selected application
    pub number: u8,
    /// Key family
    pub cipher: CipherType,
}

/// Secure channel to one card.
pub struct Session<T, R = OsRng> {
    transport: T,
    random: R,
    config: ChannelConfig,
    cipher: Cipher,
    active_key: Option<ActiveKey>,
}

impl<T: Transport> Session<T> {
    /// Unauthenticated session over `transport`, drawing challenges from the
    /// OS.
    pub fn new(transport: T) -> Self {
        Self::with_random(transport, OsRng, ChannelConfig::default())
    }

    /// Unauthenticated session with a custom configuration.
    pub fn with_config(transport: T, config: ChannelConfig) -> Self {
        Self::with_random(transport, OsRng, config)
    }
}

impl<T: Transport, R: RandomSource> Session<T, R> {
    /// Unauthenticated session with an explicit challenge source.
    pub fn with_random(transport: T, random: R, config: ChannelConfig) -> Self {
        Self { transport, random, config, cipher: Cipher::default(), active_key: None }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Active cipher; [`Cipher::Dummy`] when not authenticated.
    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Key of the current session, if any.
    pub fn active_key(&self) -> Option<ActiveKey> {
        self.active_key
    }

    /// Whether a session key is installed.
    pub fn is_authenticated(&self) -> bool {
        self.active_key.is_some()
    }

    /// Modes used when a command does not ask for specific ones: plain for
    /// legacy sessions, plain commands with maced responses otherwise.
    pub fn default_comm_config(&self) -> CommConfig {
        if self.cipher.is_legacy() {
            CommConfig::new(CommMode::Plain)
        } else {
            CommConfig::split(CommMode::Plain, CommMode::Maced)
        }
    }

    /// Drop the session key.
    pub fn logout(&mut self) {
        self.cipher = Cipher::default();
        self.active_key = None;
    }

    /// Send `cmd || payload` and return the verified response.
    ///
    /// `ok`, `no_changes` and `additional_frame` are returned to the caller;
    /// any other status is an error.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotAuthenticated`] if `cfg` needs a session key and
    ///   there is none; nothing is sent
    /// - [`ChannelError::CardStatus`] for an error status
    /// - integrity and transport errors of the exchange
    ///
    /// Every error but the first drops the session key.
    pub fn command(
        &mut self,
        cmd: u8,
        payload: &[u8],
        cfg: impl Into<CommConfig>,
    ) -> Result<Response, ChannelError> {
        let cfg = cfg.into();
        if cfg.requires_session() && !self.is_authenticated() {
            return Err(ChannelError::NotAuthenticated);
        }

        let result = exchange(
            &mut self.cipher,
            &mut self.transport,
            &self.config,
            cmd,
            payload,
            cfg,
        )
        .and_then(|response| match response.status {
            Status::Ok | Status::NoChanges | Status::AdditionalFrame => Ok(response),
            status => Err(ChannelError::CardStatus(status)),
        });

        if let Err(err) = &result {
            tracing::warn!(cmd, error = %err, "command failed");
            self.logout_due_to_error();
        }
        result
    }

    /// Mutually authenticate with key `key_no`, holding `key`.
    ///
    /// Any previous session is dropped first; on failure the session stays
    /// unauthenticated.
    pub fn authenticate(&mut self, key_no: u8, key: &Key) -> Result<(), ChannelError> {
        self.logout();

        let cipher_type = key.cipher_type();
        let Some(auth_cmd) = auth_command(cipher_type) else {
            return Err(ChannelError::AuthenticationFailed { reason: "no key to authenticate with" });
        };
        let mut cipher = Cipher::with_config(key, &self.config)?;

        // The command itself stays in clear and out of the CMAC
        tracing::debug!(key_no, cipher = %cipher_type, "authentication: requesting RndB");
        let challenge = exchange(
            &mut cipher,
            &mut self.transport,
            &self.config,
            auth_cmd,
            &[key_no],
            CommConfig::new(CommMode::CipheredNoCrc).with_offset(2),
        )?;
        if challenge.status != Status::AdditionalFrame {
            tracing::warn!(key_no, status = %challenge.status, "authentication refused");
            return Err(ChannelError::CardStatus(challenge.status));
        }

        let rnd_b = Zeroizing::new(challenge.data);
        let Some((&rnd_b_first, rnd_b_rest)) = rnd_b.split_first() else {
            return Err(ChannelError::AuthenticationFailed { reason: "empty RndB" });
        };
        if rnd_b.len() != cipher_type.challenge_size() {
            tracing::warn!(key_no, len = rnd_b.len(), "RndB has the wrong size");
            return Err(ChannelError::AuthenticationFailed { reason: "RndB has the wrong size" });
        }

        let mut rnd_a = Zeroizing::new(vec![0u8; rnd_b.len()]);
        self.random.fill_random(&mut rnd_a);

        let mut answer = Zeroizing::new(Vec::with_capacity(2 * rnd_a.len()));
        answer.extend_from_slice(&rnd_a);
        answer.extend_from_slice(rnd_b_rest);
        answer.push(rnd_b_first);

        tracing::debug!(key_no, "authentication: sending RndA || RndB'");
        let confirmation = exchange(
            &mut cipher,
            &mut self.transport,
            &self.config,
            CMD_ADDITIONAL_FRAME,
            &answer,
            CommConfig::new(CommMode::CipheredNoCrc),
        )?;
        if !confirmation.status.is_success() {
            tracing::warn!(key_no, status = %confirmation.status, "authentication refused");
            return Err(ChannelError::CardStatus(confirmation.status));
        }

        let rnd_a_rotated = Zeroizing::new(rotate_left(&rnd_a));
        let card_rnd_a = Zeroizing::new(confirmation.data);
        if !bool::from(card_rnd_a.as_slice().ct_eq(rnd_a_rotated.as_slice())) {
            tracing::warn!(key_no, cipher = %cipher_type, "RndA mismatch");
            return Err(ChannelError::AuthenticationFailed { reason: "RndA mismatch" });
        }

        let mut rnd_ab = Zeroizing::new(Vec::with_capacity(2 * rnd_a.len()));
        rnd_ab.extend_from_slice(&rnd_a);
        rnd_ab.extend_from_slice(&rnd_b);
        cipher.reinit_with_session_key(&rnd_ab)?;

        tracing::debug!(key_no, cipher = %cipher_type, "authenticated");
        self.cipher = cipher;
        self.active_key = Some(ActiveKey { number: key_no, cipher: cipher_type });
        Ok(())
    }

    fn logout_due_to_error(&mut self) {
        if let Some(key) = self.active_key {
            tracing::warn!(key_no = key.number, "session dropped, authenticate again");
        }
        self.logout();
    }
}

impl<T, R> std::fmt::Debug for Session<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cipher", &self.cipher)
            .field("active_key", &self.active_key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One secured round trip with an explicit cipher.
fn exchange<T: Transport>(
    cipher: &mut Cipher,
    transport: &mut T,
    config: &ChannelConfig,
    cmd: u8,
    payload: &[u8],
    cfg: CommConfig,
) -> Result<Response, ChannelError> {
    tracing::debug!(
        cmd,
        tx = %cfg.tx,
        rx = %cfg.rx,
        offset = cfg.tx_secure_data_offset,
        "exchange"
    );

    let mut frame = Vec::with_capacity(1 + payload.len() + 2 * desfire_crypto::MAX_BLOCK_SIZE);
    frame.push(cmd);
    frame.extend_from_slice(payload);
    cipher.prepare_tx(&mut frame, cfg.tx_secure_data_offset, cfg.tx)?;

    let mut response = transport.exchange(&frame)?;
    if response.is_empty() {
        tracing::warn!("card sent an empty answer");
        return Err(ChannelError::IntegrityFailure { reason: "empty response" });
    }
    if response.len() > config.max_response_len {
        tracing::warn!(len = response.len(), max = config.max_response_len, "response too long");
        return Err(ChannelError::IntegrityFailure { reason: "response exceeds maximum length" });
    }

    // [status][payload][trailer] -> [payload][trailer][status]
    response.rotate_left(1);
    cipher.confirm_rx(&mut response, cfg.rx)?;

    let Some(status) = response.pop() else {
        return Err(ChannelError::IntegrityFailure { reason: "missing status byte" });
    };
    let status = Status::from(status);
    tracing::debug!(%status, len = response.len(), "exchange completed");
    Ok(Response { status, data: response })
}

fn rotate_left(bytes: &[u8]) -> Vec<u8> {
    let mut rotated = bytes.to_vec();
    if !rotated.is_empty() {
        rotated.rotate_left(1);
    }
    rotated
}
