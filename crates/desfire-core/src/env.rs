//! Randomness for authentication challenges.
//!
//! Decouples the session from the system RNG so simulations can replay an
//! authentication byte for byte from a seed.

/// Source of the reader's challenge (`RndA`).
///
/// # Invariants
///
/// - Uses cryptographically secure entropy in production
/// - Given the same seed, a simulated source yields the same bytes
pub trait RandomSource {
    /// Fill `buffer` with random bytes.
    fn fill_random(&mut self, buffer: &mut [u8]);
}

impl<R: rand::RngCore> RandomSource for R {
    fn fill_random(&mut self, buffer: &mut [u8]) {
        self.fill_bytes(buffer);
    }
}
