//! Simulated DESFire card.
//!
//! `SimCard` answers frames the way a card would: it runs the authentication
//! responder, recovers secured commands through a [`CardChannel`], executes
//! them against a [`FileStore`] and secures the response. It implements
//! [`Transport`], so a reader [`desfire_core::Session`] talks to it directly.
//!
//! All randomness (RndB and fault injection) comes from a ChaCha RNG seeded
//! from [`SimCardConfig::seed`], so a failing run replays exactly.
//!
//! Like a real card, any error status ends the session on the card side.

use std::collections::BTreeMap;

use desfire_core::{
    ChannelConfig, CommMode, Status, Transport, TransportError, auth_command,
    session::{
        CMD_ADDITIONAL_FRAME, CMD_AUTHENTICATE_AES, CMD_AUTHENTICATE_ISO, CMD_AUTHENTICATE_LEGACY,
    },
};
use desfire_crypto::{CryptoOperation, Key, MAX_BLOCK_SIZE, Primitive};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    application::{DataFile, FileStore},
    card_channel::{CardChannel, legacy_decipher, legacy_encipher},
};

/// Select an application; ends any session
pub const CMD_SELECT_APPLICATION: u8 = 0x5A;

/// Response faults injected by the card's link.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability that one bit of a response is flipped
    pub corrupt_rate: f64,
    /// Probability that a response is lost after the card processed the
    /// command
    pub drop_rate: f64,
}

impl FaultConfig {
    /// Perfect link.
    pub const NONE: Self = Self { corrupt_rate: 0.0, drop_rate: 0.0 };

    /// Whether any fault can be injected.
    pub fn is_active(&self) -> bool {
        self.corrupt_rate > 0.0 || self.drop_rate > 0.0
    }
}

/// Configuration of a simulated card.
#[derive(Debug, Clone, PartialEq)]
pub struct SimCardConfig {
    /// Seed of every random choice the card makes
    pub seed: u64,
    /// Channel variants; must match the reader's
    pub channel: ChannelConfig,
    /// Link faults
    pub faults: FaultConfig,
}

impl SimCardConfig {
    /// Fault-free card with the default channel.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, channel: ChannelConfig::default(), faults: FaultConfig::NONE }
    }
}

/// Counters of what the card saw and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardStats {
    /// Frames received
    pub frames: u64,
    /// Frames answered with an error status
    pub rejected: u64,
    /// Responses with a flipped bit
    pub corrupted: u64,
    /// Responses lost
    pub dropped: u64,
}

/// Authentication between the challenge and the reader's answer.
struct PendingAuth {
    key_no: u8,
    key: Key,
    primitive: Primitive,
    iv: [u8; MAX_BLOCK_SIZE],
    rnd_b: Vec<u8>,
}

/// Simulated card with one selected application.
pub struct SimCard {
    keys: BTreeMap<u8, Key>,
    files: FileStore,
    channel: CardChannel,
    session_key_no: Option<u8>,
    pending: Option<PendingAuth>,
    config: SimCardConfig,
    rng: ChaCha8Rng,
    stats: CardStats,
}

impl SimCard {
    /// Card without keys or files.
    pub fn new(config: SimCardConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            keys: BTreeMap::new(),
            files: FileStore::new(),
            channel: CardChannel::Plain,
            session_key_no: None,
            pending: None,
            config,
            rng,
            stats: CardStats::default(),
        }
    }

    /// Install `key` as key `key_no`.
    #[must_use]
    pub fn with_key(mut self, key_no: u8, key: Key) -> Self {
        self.keys.insert(key_no, key);
        self
    }

    /// Create data file `file_no`.
    #[must_use]
    pub fn with_file(mut self, file_no: u8, mode: CommMode, data: Vec<u8>) -> Self {
        self.files.insert(file_no, mode, data);
        self
    }

    /// File `file_no` as currently stored.
    pub fn file(&self, file_no: u8) -> Option<&DataFile> {
        self.files.get(file_no)
    }

    /// Card side of the channel.
    pub fn channel(&self) -> &CardChannel {
        &self.channel
    }

    /// Key of the card's current session.
    pub fn session_key_no(&self) -> Option<u8> {
        self.session_key_no
    }

    /// Counters since creation.
    pub fn stats(&self) -> CardStats {
        self.stats
    }

    /// Replace the link faults.
    pub fn set_faults(&mut self, faults: FaultConfig) {
        self.config.faults = faults;
    }

    /// Drop the RF field: the card forgets its session.
    pub fn power_cycle(&mut self) {
        tracing::debug!("card power cycled");
        self.logout();
    }

    /// Answer one frame, without link faults. The response is
    /// `[status][payload][trailer]`.
    pub fn process(&mut self, frame: &[u8]) -> Vec<u8> {
        self.stats.frames += 1;
        let Some(&cmd) = frame.first() else {
            return self.reject(Status::LengthError);
        };

        let result = match cmd {
            CMD_AUTHENTICATE_LEGACY | CMD_AUTHENTICATE_ISO | CMD_AUTHENTICATE_AES => {
                self.begin_auth(cmd, &frame[1..])
            },
            CMD_ADDITIONAL_FRAME => match self.pending.take() {
                Some(pending) => self.finish_auth(pending, &frame[1..]),
                None => self.command(cmd, frame),
            },
            CMD_SELECT_APPLICATION => {
                self.logout();
                Ok(vec![Status::Ok.to_byte()])
            },
            _ => self.command(cmd, frame),
        };
        result.unwrap_or_else(|status| self.reject(status))
    }

    fn reject(&mut self, status: Status) -> Vec<u8> {
        tracing::debug!(%status, key_no = ?self.session_key_no, "card rejected command");
        self.stats.rejected += 1;
        self.logout();
        vec![status.to_byte()]
    }

    fn logout(&mut self) {
        self.channel = CardChannel::Plain;
        self.session_key_no = None;
        self.pending = None;
    }

    fn command(&mut self, cmd: u8, frame: &[u8]) -> Result<Vec<u8>, Status> {
        self.pending = None;
        let cfg = self.files.comm_config(cmd, frame, self.channel.default_rx_mode());
        let mut frame = frame.to_vec();
        self.channel.confirm_tx(&mut frame, cfg.tx_secure_data_offset, cfg.tx)?;
        self.execute(cmd, &frame, cfg.rx)
    }

    /// Run a recovered command frame against the files.
    fn execute(&mut self, cmd: u8, frame: &[u8], rx: CommMode) -> Result<Vec<u8>, Status> {
        // A maced frame can verify down to nothing
        let Some((_, args)) = frame.split_first() else {
            return Err(Status::LengthError);
        };
        let (status, data) = self.files.handle(cmd, args, self.channel.is_authenticated());
        if !status.is_success() {
            return Err(status);
        }
        self.channel.prepare_rx(status, &data, rx)
    }

    fn begin_auth(&mut self, cmd: u8, args: &[u8]) -> Result<Vec<u8>, Status> {
        self.logout();
        let &[key_no] = args else {
            return Err(Status::LengthError);
        };
        let key = self.keys.get(&key_no).cloned().ok_or(Status::NoSuchKey)?;
        if auth_command(key.cipher_type()) != Some(cmd) {
            return Err(Status::AuthenticationError);
        }
        let primitive = Primitive::new(&key).map_err(|_| Status::AuthenticationError)?;

        let mut rnd_b = vec![0u8; key.cipher_type().challenge_size()];
        self.rng.fill_bytes(&mut rnd_b);

        let mut pending = PendingAuth { key_no, key, primitive, iv: [0; MAX_BLOCK_SIZE], rnd_b };
        let mut challenge = pending.rnd_b.clone();
        pending.encipher(&mut challenge)?;
        tracing::debug!(key_no, "card sent RndB");
        self.pending = Some(pending);

        let mut response = vec![Status::AdditionalFrame.to_byte()];
        response.extend_from_slice(&challenge);
        Ok(response)
    }

    fn finish_auth(&mut self, mut pending: PendingAuth, args: &[u8]) -> Result<Vec<u8>, Status> {
        let size = pending.rnd_b.len();
        if args.len() != 2 * size {
            return Err(Status::LengthError);
        }
        let mut answer = args.to_vec();
        pending.decipher(&mut answer)?;

        let (rnd_a, rnd_b_rotated) = answer.split_at(size);
        if rnd_b_rotated != rotate_left(&pending.rnd_b).as_slice() {
            tracing::debug!(key_no = pending.key_no, "reader does not hold the key");
            return Err(Status::AuthenticationError);
        }

        let mut confirmation = rotate_left(rnd_a);
        pending.encipher(&mut confirmation)?;

        let mut rnd_ab = rnd_a.to_vec();
        rnd_ab.extend_from_slice(&pending.rnd_b);
        self.channel = CardChannel::open(&pending.key, &rnd_ab, &self.config.channel)
            .map_err(|_| Status::AuthenticationError)?;
        self.session_key_no = Some(pending.key_no);
        tracing::debug!(key_no = pending.key_no, "card authenticated reader");

        let mut response = vec![Status::Ok.to_byte()];
        response.extend_from_slice(&confirmation);
        Ok(response)
    }

    fn inject_faults(&mut self, response: &mut [u8]) -> Result<(), TransportError> {
        let faults = self.config.faults;
        if faults.drop_rate > 0.0 && self.rng.gen_bool(faults.drop_rate.clamp(0.0, 1.0)) {
            self.stats.dropped += 1;
            tracing::warn!(len = response.len(), "response dropped");
            return Err(TransportError::Timeout);
        }
        if faults.corrupt_rate > 0.0
            && !response.is_empty()
            && self.rng.gen_bool(faults.corrupt_rate.clamp(0.0, 1.0))
        {
            let index = self.rng.gen_range(0..response.len());
            let bit = self.rng.gen_range(0..8u32);
            response[index] ^= 1 << bit;
            self.stats.corrupted += 1;
            tracing::warn!(index, bit, "response corrupted");
        }
        Ok(())
    }
}

impl PendingAuth {
    fn encipher(&mut self, data: &mut [u8]) -> Result<(), Status> {
        if self.key.cipher_type().is_legacy() {
            return legacy_encipher(&self.primitive, data);
        }
        let block_size = self.primitive.block_size();
        self.primitive
            .do_crypto(data, &mut self.iv[..block_size], CryptoOperation::Encrypt)
            .map_err(|_| Status::IntegrityError)
    }

    fn decipher(&mut self, data: &mut [u8]) -> Result<(), Status> {
        if self.key.cipher_type().is_legacy() {
            return legacy_decipher(&self.primitive, data);
        }
        let block_size = self.primitive.block_size();
        self.primitive
            .do_crypto(data, &mut self.iv[..block_size], CryptoOperation::Decrypt)
            .map_err(|_| Status::IntegrityError)
    }
}

impl Transport for SimCard {
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut response = self.process(frame);
        self.inject_faults(&mut response)?;
        Ok(response)
    }
}

impl std::fmt::Debug for SimCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCard")
            .field("key_numbers", &self.keys.keys().collect::<Vec<_>>())
            .field("files", &self.files.file_ids())
            .field("channel", &self.channel)
            .field("session_key_no", &self.session_key_no)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn rotate_left(bytes: &[u8]) -> Vec<u8> {
    let mut rotated = bytes.to_vec();
    if !rotated.is_empty() {
        rotated.rotate_left(1);
    }
    rotated
}

#[cfg(test)]
mod tests {
    use desfire_core::{ChannelError, Session};

    use super::*;
    use crate::application::{CMD_GET_FILE_IDS, CMD_READ_DATA, data_header};

    fn card(key: Key) -> SimCard {
        SimCard::new(SimCardConfig::with_seed(7))
            .with_key(0, key)
            .with_file(1, CommMode::Ciphered, (0..20).collect())
    }

    #[test]
    fn authenticates_every_family() {
        let keys = [
            Key::Des([0x10; 8]),
            Key::Des3_2k((0..16).collect::<Vec<u8>>().try_into().unwrap()),
            Key::Des3_3k([0x33; 24]),
            Key::aes128([0xAE; 16]),
        ];
        for key in keys {
            let random = ChaCha8Rng::seed_from_u64(1);
            let mut session =
                Session::with_random(card(key.clone()), random, ChannelConfig::default());

            session.authenticate(0, &key).unwrap();
            assert!(session.is_authenticated());
            assert_eq!(session.transport().session_key_no(), Some(0));
            assert_eq!(session.cipher().iv(), session.transport().channel().iv());
        }
    }

    #[test]
    fn emptied_frame_is_a_length_error() {
        let mut card = card(Key::aes128([0xAE; 16]));
        assert_eq!(card.execute(CMD_READ_DATA, &[], CommMode::Plain), Err(Status::LengthError));

        let header = data_header(1, 0, 0);
        let mut frame = vec![CMD_READ_DATA];
        frame.extend_from_slice(&header);
        assert_eq!(
            card.execute(CMD_READ_DATA, &frame, CommMode::Plain),
            Err(Status::PermissionDenied)
        );
    }

    #[test]
    fn wrong_key_is_refused() {
        let random = ChaCha8Rng::seed_from_u64(2);
        let card = card(Key::aes128([0xAE; 16]));
        let mut session = Session::with_random(card, random, ChannelConfig::default());

        let err = session.authenticate(0, &Key::aes128([0xAF; 16])).unwrap_err();
        assert_eq!(err, ChannelError::CardStatus(Status::AuthenticationError));
        assert!(session.transport().session_key_no().is_none());
    }

    #[test]
    fn unknown_key_number() {
        let mut card = card(Key::aes128([0; 16]));
        assert_eq!(card.process(&[CMD_AUTHENTICATE_AES, 5]), [Status::NoSuchKey.to_byte()]);
        assert_eq!(card.stats().rejected, 1);
    }

    #[test]
    fn mismatched_auth_command() {
        let mut card = card(Key::aes128([0; 16]));
        assert_eq!(
            card.process(&[CMD_AUTHENTICATE_LEGACY, 0]),
            [Status::AuthenticationError.to_byte()]
        );
    }

    #[test]
    fn protected_read_without_session() {
        let mut card = card(Key::aes128([0; 16]));
        let mut frame = vec![CMD_READ_DATA];
        frame.extend_from_slice(&data_header(1, 0, 4));
        assert_eq!(card.process(&frame), [Status::PermissionDenied.to_byte()]);
        assert_eq!(card.process(&[CMD_GET_FILE_IDS]), [0x00, 0x01]);
    }

    #[test]
    fn dropped_responses_surface_as_timeouts() {
        let mut card = card(Key::aes128([0; 16]));
        card.set_faults(FaultConfig { corrupt_rate: 0.0, drop_rate: 1.0 });

        assert_eq!(card.exchange(&[CMD_GET_FILE_IDS]), Err(TransportError::Timeout));
        assert_eq!(card.stats().dropped, 1);
        assert_eq!(card.stats().frames, 1);
    }

    #[test]
    fn corruption_flips_exactly_one_bit() {
        let mut card = card(Key::aes128([0; 16]));
        card.set_faults(FaultConfig { corrupt_rate: 1.0, drop_rate: 0.0 });

        let response = card.exchange(&[CMD_GET_FILE_IDS]).unwrap();
        let flipped: u32 =
            response.iter().zip([0x00u8, 0x01]).map(|(a, b)| (a ^ b).count_ones()).sum();
        assert_eq!(flipped, 1);
    }
}
