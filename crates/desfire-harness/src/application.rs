//! Data files of the simulated application.
//!
//! A small subset of the DESFire file commands, enough to drive every
//! communication mode in both directions:
//!
//! | Command        | Code | Command frame                         | Response       |
//! |----------------|------|---------------------------------------|----------------|
//! | `GetFileIds`   | 0x6F | plain                                 | session default|
//! | `ReadData`     | 0xBD | plain `[file][offset:3][len:3]`       | file mode      |
//! | `WriteData`    | 0x3D | file mode, header in clear            | session default|
//!
//! Offsets and lengths are 24-bit little endian. A read length of zero reads
//! to the end of the file.

use std::collections::BTreeMap;

use desfire_core::{CommConfig, CommMode, Status};

/// List the file numbers
pub const CMD_GET_FILE_IDS: u8 = 0x6F;

/// Read from a data file
pub const CMD_READ_DATA: u8 = 0xBD;

/// Write to a data file
pub const CMD_WRITE_DATA: u8 = 0x3D;

/// Command byte and `[file][offset:3][len:3]`, sent in clear by `WriteData`
pub const DATA_HEADER_LEN: usize = 8;

/// Build the `[file][offset:3][len:3]` header of a data command.
pub fn data_header(file_no: u8, offset: usize, len: usize) -> Vec<u8> {
    let mut header = vec![file_no];
    header.extend_from_slice(&u24(offset));
    header.extend_from_slice(&u24(len));
    header
}

fn u24(value: usize) -> [u8; 3] {
    let bytes = (value as u32).to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

fn read_u24(bytes: &[u8]) -> usize {
    bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | usize::from(b))
}

/// A standard data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Mode of `ReadData` responses and `WriteData` commands
    pub mode: CommMode,
    /// File contents; the length is fixed at creation
    pub data: Vec<u8>,
}

/// Files of the selected application.
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    files: BTreeMap<u8, DataFile>,
}

impl FileStore {
    /// Empty application.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace file `file_no`.
    pub fn insert(&mut self, file_no: u8, mode: CommMode, data: Vec<u8>) {
        self.files.insert(file_no, DataFile { mode, data });
    }

    /// File `file_no`, if present.
    pub fn get(&self, file_no: u8) -> Option<&DataFile> {
        self.files.get(&file_no)
    }

    /// File numbers in ascending order.
    pub fn file_ids(&self) -> Vec<u8> {
        self.files.keys().copied().collect()
    }

    /// Modes the card expects for a command, judged from the bytes sent in
    /// clear. `default_rx` is the response mode of the current session.
    pub fn comm_config(&self, cmd: u8, frame: &[u8], default_rx: CommMode) -> CommConfig {
        let file_mode = frame.get(1).and_then(|no| self.get(*no)).map(|f| f.mode);
        match (cmd, file_mode) {
            (CMD_READ_DATA, Some(mode)) => CommConfig::split(CommMode::Plain, mode),
            (CMD_WRITE_DATA, Some(mode)) => {
                CommConfig::split(mode, default_rx).with_offset(DATA_HEADER_LEN)
            },
            _ => CommConfig::split(CommMode::Plain, default_rx),
        }
    }

    /// Execute a recovered command. `authenticated` gates access to files
    /// that are not plain.
    pub fn handle(&mut self, cmd: u8, payload: &[u8], authenticated: bool) -> (Status, Vec<u8>) {
        match cmd {
            CMD_GET_FILE_IDS => (Status::Ok, self.file_ids()),
            CMD_READ_DATA => self.read(payload, authenticated),
            CMD_WRITE_DATA => self.write(payload, authenticated),
            _ => (Status::IllegalCommand, Vec::new()),
        }
    }

    fn read(&self, payload: &[u8], authenticated: bool) -> (Status, Vec<u8>) {
        if payload.len() != DATA_HEADER_LEN - 1 {
            return (Status::LengthError, Vec::new());
        }
        let Some(file) = self.files.get(&payload[0]) else {
            return (Status::FileNotFound, Vec::new());
        };
        if file.mode != CommMode::Plain && !authenticated {
            return (Status::PermissionDenied, Vec::new());
        }

        let offset = read_u24(&payload[1..4]);
        let len = match read_u24(&payload[4..7]) {
            0 => file.data.len().saturating_sub(offset),
            len => len,
        };
        match file.data.get(offset..offset.saturating_add(len)) {
            Some(bytes) => (Status::Ok, bytes.to_vec()),
            None => (Status::BoundaryError, Vec::new()),
        }
    }

    fn write(&mut self, payload: &[u8], authenticated: bool) -> (Status, Vec<u8>) {
        if payload.len() < DATA_HEADER_LEN - 1 {
            return (Status::LengthError, Vec::new());
        }
        let (header, data) = payload.split_at(DATA_HEADER_LEN - 1);
        let Some(file) = self.files.get_mut(&header[0]) else {
            return (Status::FileNotFound, Vec::new());
        };
        if file.mode != CommMode::Plain && !authenticated {
            return (Status::PermissionDenied, Vec::new());
        }

        let offset = read_u24(&header[1..4]);
        if read_u24(&header[4..7]) != data.len() {
            return (Status::LengthError, Vec::new());
        }
        match file.data.get_mut(offset..offset.saturating_add(data.len())) {
            Some(target) => {
                target.copy_from_slice(data);
                (Status::Ok, Vec::new())
            },
            None => (Status::BoundaryError, Vec::new()),
        }
    }
}
