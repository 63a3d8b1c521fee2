//! Link to the card.
//!
//! The channel hands fully secured frames to a [`Transport`] and gets raw card
//! responses back. Framing below that (reader protocol, chaining of long
//! frames, link-level retries) is the transport's business.

use crate::error::TransportError;

/// Exchanges one frame with the card.
///
/// # Invariants
///
/// - A response is returned as the card sent it: status byte first, then the
///   payload and any trailer
/// - A failed exchange leaves no partial response behind; the caller drops
///   the session
pub trait Transport {
    /// Send `frame` and wait for the card's answer.
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).exchange(frame)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).exchange(frame)
    }
}
