//! Model-checked driver: a reader session against a simulated card.
//!
//! Every [`Operation`] runs through the real [`Session`] and through a
//! [`FileStore`] oracle. Without link faults both must agree exactly. With
//! faults the driver checks the properties that must survive a hostile link:
//!
//! - A protected response (maced, or ciphered under 3K3DES or AES) is either
//!   rejected or correct
//! - A failed exchange leaves the reader unauthenticated
//!
//! After every operation the reader and card must agree on whether a session
//! is open and, for 3K3DES and AES, on the chaining value.

use desfire_core::{ChannelConfig, ChannelError, CommConfig, CommMode, Session, Status};
use desfire_crypto::Key;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    application::{
        CMD_GET_FILE_IDS, CMD_READ_DATA, CMD_WRITE_DATA, DATA_HEADER_LEN, FileStore, data_header,
    },
    operation::Operation,
    sim_card::{CMD_SELECT_APPLICATION, FaultConfig, SimCard, SimCardConfig},
};

/// Keys installed on the card, in slot order
fn standard_keys() -> Vec<Key> {
    vec![
        Key::aes128([0xA0; 16]),
        Key::Des3_3k(std::array::from_fn(|i| i as u8)),
        Key::Des3_2k([0x2D; 16]),
        Key::Des([0xDE, 0x5E, 0xDE, 0x5E, 0xDE, 0x5E, 0xDE, 0x5E]),
    ]
}

/// Files of the application: one per secured mode
fn standard_files() -> FileStore {
    let mut files = FileStore::new();
    files.insert(1, CommMode::Plain, vec![0x11; 32]);
    files.insert(2, CommMode::Maced, vec![0x22; 32]);
    files.insert(3, CommMode::Ciphered, (0..40).collect());
    files
}

/// A property the driver found broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated property
    pub invariant: &'static str,
    /// What went wrong
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Reader session plus simulated card, checked against an oracle.
pub struct SimDriver {
    session: Session<SimCard, ChaCha8Rng>,
    keys: Vec<Key>,
    model: FileStore,
    faults: FaultConfig,
}

impl SimDriver {
    /// Driver over the standard key and file layout.
    pub fn new(seed: u64, channel: ChannelConfig, faults: FaultConfig) -> Self {
        let keys = standard_keys();
        let model = standard_files();

        let card_config = SimCardConfig { seed, channel: channel.clone(), faults };
        let mut card = SimCard::new(card_config);
        for (slot, key) in keys.iter().enumerate() {
            card = card.with_key(slot as u8, key.clone());
        }
        for file_no in model.file_ids() {
            if let Some(file) = model.get(file_no) {
                card = card.with_file(file_no, file.mode, file.data.clone());
            }
        }

        let random = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        Self { session: Session::with_random(card, random, channel), keys, model, faults }
    }

    /// The reader session.
    pub fn session(&self) -> &Session<SimCard, ChaCha8Rng> {
        &self.session
    }

    /// The simulated card.
    pub fn card(&self) -> &SimCard {
        self.session.transport()
    }

    /// Apply `op` and check every property that must hold afterwards.
    pub fn apply(&mut self, op: &Operation) -> Result<(), Violation> {
        let outcome = match op {
            Operation::Authenticate { key } => self.authenticate(*key),
            Operation::ListFiles => self.list_files(),
            Operation::Read { file, offset, len } => {
                self.read(*file % 4, usize::from(*offset % 48), usize::from(*len % 48))
            },
            Operation::Write { file, offset, content } => {
                self.write(*file % 4, usize::from(*offset % 48), &content.to_bytes())
            },
            Operation::Logout => self.logout(),
        };
        outcome.map_err(|message| Violation { invariant: "oracle_agreement", message })?;
        self.check_lockstep()
    }

    fn authenticate(&mut self, key: u8) -> Result<(), String> {
        let key_no = key % (self.keys.len() as u8 + 1);
        let secret = self.keys[usize::from(key_no) % self.keys.len()].clone();

        let result = self.session.authenticate(key_no, &secret);
        let expected = if usize::from(key_no) < self.keys.len() {
            Ok(())
        } else {
            Err(ChannelError::CardStatus(Status::NoSuchKey))
        };
        self.compare("authenticate", result, expected, true)
    }

    fn list_files(&mut self) -> Result<(), String> {
        let cfg = self.session.default_comm_config();
        let protected = self.is_protected(cfg.rx);
        let result = self.session.command(CMD_GET_FILE_IDS, &[], cfg).map(|r| r.data);
        self.compare("list_files", result, Ok(self.model.file_ids()), protected)
    }

    fn read(&mut self, file_no: u8, offset: usize, len: usize) -> Result<(), String> {
        let mode = self.model.get(file_no).map_or(CommMode::Plain, |f| f.mode);
        let cfg = CommConfig::split(CommMode::Plain, mode);
        let header = data_header(file_no, offset, len);

        let expected = self.expect(cfg, CMD_READ_DATA, &header);
        let result = self.session.command(CMD_READ_DATA, &header, cfg).map(|r| r.data);
        let protected = self.is_protected(mode);
        self.compare("read", result, expected, protected)
    }

    fn write(&mut self, file_no: u8, offset: usize, content: &[u8]) -> Result<(), String> {
        let mode = self.model.get(file_no).map_or(CommMode::Plain, |f| f.mode);
        let cfg = CommConfig::split(mode, self.session.default_comm_config().rx)
            .with_offset(DATA_HEADER_LEN);
        let mut payload = data_header(file_no, offset, content.len());
        payload.extend_from_slice(content);

        let expected = self.expect(cfg, CMD_WRITE_DATA, &payload);
        let result = self.session.command(CMD_WRITE_DATA, &payload, cfg).map(|r| r.data);
        let protected = self.is_protected(cfg.rx);
        let outcome = self.compare("write", result, expected, protected);

        if self.faults.is_active() {
            // Only responses are faulted, so the card's copy is authoritative
            if let Some(file) = self.card().file(file_no).cloned() {
                self.model.insert(file_no, file.mode, file.data);
            }
        }
        outcome
    }

    fn logout(&mut self) -> Result<(), String> {
        let cfg = self.session.default_comm_config();
        let result =
            self.session.command(CMD_SELECT_APPLICATION, &[0, 0, 0], cfg).map(|r| r.data);
        self.session.logout();
        self.compare("logout", result, Ok(Vec::new()), false)
    }

    /// Whether a response in `mode` can only be accepted intact. Legacy
    /// enciphered responses carry a CRC16 only.
    fn is_protected(&self, mode: CommMode) -> bool {
        match mode {
            CommMode::Plain => false,
            CommMode::Maced => true,
            CommMode::Ciphered | CommMode::CipheredNoCrc => !self.session.cipher().is_legacy(),
        }
    }

    /// Oracle answer for a command, including the reader's own refusal.
    fn expect(
        &mut self,
        cfg: CommConfig,
        cmd: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, ChannelError> {
        let authenticated = self.session.is_authenticated();
        if cfg.requires_session() && !authenticated {
            return Err(ChannelError::NotAuthenticated);
        }
        match self.model.handle(cmd, payload, authenticated) {
            (status, data) if status.is_success() => Ok(data),
            (status, _) => Err(ChannelError::CardStatus(status)),
        }
    }

    fn compare<T: PartialEq + std::fmt::Debug>(
        &mut self,
        what: &str,
        result: Result<T, ChannelError>,
        expected: Result<T, ChannelError>,
        protected: bool,
    ) -> Result<(), String> {
        if !self.faults.is_active() {
            return if result == expected {
                Ok(())
            } else {
                Err(format!("{what}: got {result:?}, expected {expected:?}"))
            };
        }

        match result {
            Ok(value) => match expected {
                Ok(expected) if protected && value != expected => Err(format!(
                    "{what}: protected response accepted with {value:?}, expected {expected:?}"
                )),
                _ => Ok(()),
            },
            Err(ChannelError::NotAuthenticated) => Ok(()),
            Err(err) => {
                if self.session.is_authenticated() {
                    return Err(format!("{what}: session survived {err}"));
                }
                tracing::debug!(%err, "exchange failed under faults, resetting card");
                self.session.transport_mut().power_cycle();
                Ok(())
            },
        }
    }

    fn check_lockstep(&self) -> Result<(), Violation> {
        let reader = self.session.active_key().map(|k| k.number);
        let card = self.card().session_key_no();
        if reader != card {
            return Err(Violation {
                invariant: "session_lockstep",
                message: format!("reader holds key {reader:?}, card holds {card:?}"),
            });
        }

        // An undetected flip in a plain response moves only the reader's IV
        if !self.faults.is_active() && self.session.cipher().iv() != self.card().channel().iv() {
            return Err(Violation {
                invariant: "iv_lockstep",
                message: format!(
                    "reader IV {:?}, card IV {:?}",
                    self.session.cipher().iv(),
                    self.card().channel().iv()
                ),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDriver")
            .field("session", &self.session)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::SmallPayload;

    fn driver() -> SimDriver {
        SimDriver::new(11, ChannelConfig::default(), FaultConfig::NONE)
    }

    #[test]
    fn protected_files_need_a_session() {
        let mut driver = driver();
        driver.apply(&Operation::Read { file: 3, offset: 0, len: 4 }).unwrap();
        assert!(!driver.session().is_authenticated());
    }

    #[test]
    fn every_key_reads_every_file() {
        let mut driver = driver();
        for key in 0..4 {
            driver.apply(&Operation::Authenticate { key }).unwrap();
            for file in 1..4 {
                driver.apply(&Operation::Read { file, offset: 3, len: 0 }).unwrap();
                let content = SmallPayload { seed: key, len: 5 };
                driver.apply(&Operation::Write { file, offset: 1, content }).unwrap();
            }
            driver.apply(&Operation::ListFiles).unwrap();
        }
        assert_eq!(driver.card().file(3).unwrap().data[1..6], [3, 4, 5, 6, 7]);
    }

    #[test]
    fn missing_key_and_file() {
        let mut driver = driver();
        driver.apply(&Operation::Authenticate { key: 4 }).unwrap();
        driver.apply(&Operation::Authenticate { key: 0 }).unwrap();
        driver.apply(&Operation::Read { file: 0, offset: 0, len: 1 }).unwrap();
        assert!(!driver.session().is_authenticated());
    }

    #[test]
    fn logout_ends_both_sides() {
        let mut driver = driver();
        driver.apply(&Operation::Authenticate { key: 1 }).unwrap();
        driver.apply(&Operation::Logout).unwrap();
        assert!(driver.card().session_key_no().is_none());
        driver.apply(&Operation::ListFiles).unwrap();
    }
}
