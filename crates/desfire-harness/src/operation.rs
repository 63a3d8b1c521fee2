//! Operations for model-based testing.
//!
//! Operations are generated by proptest or a fuzzer and applied through a
//! [`crate::SimDriver`]. Field values are raw and get clamped by the driver,
//! so any generated value is a valid operation.

use arbitrary::Arbitrary;

/// Operations a reader can perform against the simulated card.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Authenticate with one of the driver's keys.
    Authenticate {
        /// Key slot; one past the installed keys names a missing key
        key: u8,
    },

    /// List the application's files.
    ListFiles,

    /// Read a range of a file.
    Read {
        /// File slot; slot 0 does not exist
        file: u8,
        /// Start of the range
        offset: u8,
        /// Length of the range; zero reads to the end
        len: u8,
    },

    /// Overwrite a range of a file.
    Write {
        /// File slot; slot 0 does not exist
        file: u8,
        /// Start of the range
        offset: u8,
        /// Bytes to write
        content: SmallPayload,
    },

    /// Reselect the application, ending the session on both sides.
    Logout,
}

/// Compact payload description; expanded deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub struct SmallPayload {
    /// First byte; later bytes count up from it
    pub seed: u8,
    /// Length hint
    pub len: u8,
}

impl SmallPayload {
    /// Longest expanded payload
    pub const MAX_LEN: usize = 24;

    /// Expand to the payload bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = usize::from(self.len) % (Self::MAX_LEN + 1);
        (0..len).map(|i| self.seed.wrapping_add(i as u8)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_expansion_is_bounded() {
        assert_eq!(SmallPayload { seed: 0xFE, len: 3 }.to_bytes(), [0xFE, 0xFF, 0x00]);
        assert_eq!(SmallPayload { seed: 0, len: 25 }.to_bytes(), Vec::<u8>::new());
        assert!(SmallPayload { seed: 0, len: 255 }.to_bytes().len() <= SmallPayload::MAX_LEN);
    }
}
