//! Card status codes.
//!
//! Every response ends with one status byte. The channel only needs to tell
//! success from failure and to recognise `additional_frame`; the rest is
//! carried for diagnostics.

use std::fmt;

/// Status byte closing a card response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Command completed
    Ok,
    /// No changes were done to backup files
    NoChanges,
    /// Not enough EEPROM memory
    OutOfEeprom,
    /// Command code not supported
    IllegalCommand,
    /// CRC or MAC does not match, or invalid padding
    IntegrityError,
    /// Invalid key number
    NoSuchKey,
    /// Length of command string invalid
    LengthError,
    /// Current configuration or status does not allow the command
    PermissionDenied,
    /// Value of a parameter invalid
    ParameterError,
    /// Requested application not present
    AppNotFound,
    /// Unrecoverable error within the application
    AppIntegrityError,
    /// Current authentication status does not allow the command
    AuthenticationError,
    /// More frames follow
    AdditionalFrame,
    /// Attempt to read or write beyond the file limits
    BoundaryError,
    /// Unrecoverable error within the card
    PiccIntegrityError,
    /// Previous command was not fully completed
    CommandAborted,
    /// Card was disabled by an unrecoverable error
    PiccDisabledError,
    /// Number of applications limited to 28
    CountError,
    /// File or application already exists
    DuplicateError,
    /// Could not complete a non-volatile write
    EepromError,
    /// Specified file number does not exist
    FileNotFound,
    /// Unrecoverable error within a file
    FileIntegrityError,
    /// Byte not assigned to any status
    Unknown(u8),
}

impl Status {
    /// Whether the command completed; `no_changes` counts as completed.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::NoChanges)
    }

    /// Wire value.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::NoChanges => 0x0C,
            Self::OutOfEeprom => 0x0E,
            Self::IllegalCommand => 0x1C,
            Self::IntegrityError => 0x1E,
            Self::NoSuchKey => 0x40,
            Self::LengthError => 0x7E,
            Self::PermissionDenied => 0x9D,
            Self::ParameterError => 0x9E,
            Self::AppNotFound => 0xA0,
            Self::AppIntegrityError => 0xA1,
            Self::AuthenticationError => 0xAE,
            Self::AdditionalFrame => 0xAF,
            Self::BoundaryError => 0xBE,
            Self::PiccIntegrityError => 0xC1,
            Self::CommandAborted => 0xCA,
            Self::PiccDisabledError => 0xCD,
            Self::CountError => 0xCE,
            Self::DuplicateError => 0xDE,
            Self::EepromError => 0xEE,
            Self::FileNotFound => 0xF0,
            Self::FileIntegrityError => 0xF1,
            Self::Unknown(byte) => byte,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoChanges => "no_changes",
            Self::OutOfEeprom => "out_of_eeprom",
            Self::IllegalCommand => "illegal_command",
            Self::IntegrityError => "integrity_error",
            Self::NoSuchKey => "no_such_key",
            Self::LengthError => "length_error",
            Self::PermissionDenied => "permission_denied",
            Self::ParameterError => "parameter_error",
            Self::AppNotFound => "app_not_found",
            Self::AppIntegrityError => "app_integrity_error",
            Self::AuthenticationError => "authentication_error",
            Self::AdditionalFrame => "additional_frame",
            Self::BoundaryError => "boundary_error",
            Self::PiccIntegrityError => "picc_integrity_error",
            Self::CommandAborted => "command_aborted",
            Self::PiccDisabledError => "picc_disabled_error",
            Self::CountError => "count_error",
            Self::DuplicateError => "duplicate_error",
            Self::EepromError => "eeprom_error",
            Self::FileNotFound => "file_not_found",
            Self::FileIntegrityError => "file_integrity_error",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for Status {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x0C => Self::NoChanges,
            0x0E => Self::OutOfEeprom,
            0x1C => Self::IllegalCommand,
            0x1E => Self::IntegrityError,
            0x40 => Self::NoSuchKey,
            0x7E => Self::LengthError,
            0x9D => Self::PermissionDenied,
            0x9E => Self::ParameterError,
            0xA0 => Self::AppNotFound,
            0xA1 => Self::AppIntegrityError,
            0xAE => Self::AuthenticationError,
            0xAF => Self::AdditionalFrame,
            0xBE => Self::BoundaryError,
            0xC1 => Self::PiccIntegrityError,
            0xCA => Self::CommandAborted,
            0xCD => Self::PiccDisabledError,
            0xCE => Self::CountError,
            0xDE => Self::DuplicateError,
            0xEE => Self::EepromError,
            0xF0 => Self::FileNotFound,
            0xF1 => Self::FileIntegrityError,
            other => Self::Unknown(other),
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.to_byte()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.to_byte())
    }
}
