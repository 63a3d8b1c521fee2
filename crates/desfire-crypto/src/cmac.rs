//! CMAC subkeys and CMAC-8 over a [`Primitive`].
//!
//! Follows NIST SP800-38B: `L = E(0^b)`, `K1 = L << 1` (XOR `R` into the last
//! byte if the MSB of `L` was set), `K2` derived from `K1` the same way. A
//! message that fills its last block is XOR-ed with `K1`; otherwise it gets a
//! `0x80` marker, zero fill and `K2`. The MAC is the first 8 bytes of the last
//! CBC-MAC chaining value, which is left in the caller's IV.
//!
//! Unlike the textbook algorithm, the IV is an input: DESFire chains it
//! across commands.

use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::CryptoError,
    integrity::{padded_length, shift_left_bits},
    key::CipherType,
    primitive::{CryptoOperation, MAX_BLOCK_SIZE, Primitive, xor_in_place},
};

/// Size of a DESFire CMAC (8 bytes)
pub const CMAC_SIZE: usize = 8;

/// A truncated CMAC.
pub type Cmac = [u8; CMAC_SIZE];

/// Subkey constant `R` for 128-bit blocks
pub const CMAC_R_AES: u8 = 0x87;

/// Subkey constant `R` for 64-bit blocks
pub const CMAC_R_DES: u8 = 0x1B;

/// Subkey constant `R` for a cipher family.
pub const fn subkey_constant(cipher: CipherType) -> u8 {
    match cipher {
        CipherType::Aes128 => CMAC_R_AES,
        _ => CMAC_R_DES,
    }
}

/// The two CMAC subkeys of one keyed primitive.
///
/// Subkeys depend only on the key: they must be derived again after every
/// re-key of the primitive. Zeroized on drop.
pub struct CmacKeychain {
    block_size: usize,
    last_byte_xor: u8,
    subkey_nopad: [u8; MAX_BLOCK_SIZE],
    subkey_pad: [u8; MAX_BLOCK_SIZE],
}

impl CmacKeychain {
    /// Derive the subkeys of `primitive`.
    pub fn new(primitive: &Primitive) -> Self {
        let mut keychain = Self {
            block_size: primitive.block_size(),
            last_byte_xor: subkey_constant(primitive.cipher_type()),
            subkey_nopad: [0; MAX_BLOCK_SIZE],
            subkey_pad: [0; MAX_BLOCK_SIZE],
        };
        keychain.initialize_subkeys(primitive);
        keychain
    }

    /// Recompute both subkeys from the current key of `primitive`.
    pub fn initialize_subkeys(&mut self, primitive: &Primitive) {
        self.block_size = primitive.block_size();
        self.last_byte_xor = subkey_constant(primitive.cipher_type());
        let block_size = self.block_size;

        // L = E(0) with a zero IV is a single forward transform
        let mut l = Zeroizing::new([0u8; MAX_BLOCK_SIZE]);
        let Ok(()) = primitive.encrypt_block(&mut l[..block_size]) else {
            unreachable!("slice is exactly one block long");
        };

        self.subkey_nopad = *l;
        derive_next_subkey(&mut self.subkey_nopad[..block_size], self.last_byte_xor);

        self.subkey_pad = self.subkey_nopad;
        derive_next_subkey(&mut self.subkey_pad[..block_size], self.last_byte_xor);
    }

    /// Block size the subkeys were derived for.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Subkey for messages that end on a block boundary (K1).
    pub fn subkey_nopad(&self) -> &[u8] {
        &self.subkey_nopad[..self.block_size]
    }

    /// Subkey for padded messages (K2).
    pub fn subkey_pad(&self) -> &[u8] {
        &self.subkey_pad[..self.block_size]
    }

    /// Pad `data` to `desired_len` rounded up to whole blocks and mask the last
    /// block with the matching subkey.
    ///
    /// The result is never shorter than `data` or one block.
    pub fn prepare_cmac_data(&self, data: &mut Vec<u8>, desired_len: usize) {
        let block_size = self.block_size;
        let original_len = data.len();
        let target = padded_length(desired_len.max(original_len), block_size).max(block_size);

        data.resize(target, 0x00);
        let last_block = target - block_size;
        if original_len == target {
            xor_in_place(&mut data[last_block..], self.subkey_nopad());
        } else {
            data[original_len] = 0x80;
            xor_in_place(&mut data[last_block..], self.subkey_pad());
        }
    }

    /// CMAC of `data`, chaining through `iv`.
    ///
    /// On return `iv` holds the full last chaining value; the MAC is its first
    /// [`CMAC_SIZE`] bytes.
    pub fn compute_cmac(
        &self,
        primitive: &Primitive,
        iv: &mut [u8],
        data: &[u8],
    ) -> Result<Cmac, CryptoError> {
        let mut buffer =
            Zeroizing::new(Vec::with_capacity(padded_length(data.len() + 1, self.block_size)));
        buffer.extend_from_slice(data);
        self.prepare_cmac_data(&mut buffer, data.len());

        primitive.do_crypto(&mut buffer, iv, CryptoOperation::Mac)?;

        let mut mac = [0u8; CMAC_SIZE];
        mac.copy_from_slice(&iv[..CMAC_SIZE]);
        Ok(mac)
    }
}

impl Drop for CmacKeychain {
    fn drop(&mut self) {
        self.subkey_nopad.zeroize();
        self.subkey_pad.zeroize();
    }
}

impl std::fmt::Debug for CmacKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmacKeychain").field("block_size", &self.block_size).finish_non_exhaustive()
    }
}

fn derive_next_subkey(subkey: &mut [u8], last_byte_xor: u8) {
    let msb_set = subkey.first().is_some_and(|b| b & 0x80 != 0);
    shift_left_bits(subkey, 1);
    if let Some(last) = subkey.last_mut().filter(|_| msb_set) {
        *last ^= last_byte_xor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    fn nist_aes() -> Primitive {
        Primitive::with_key_bytes(CipherType::Aes128, &unhex("2b7e151628aed2a6abf7158809cf4f3c"))
            .unwrap()
    }

    #[test]
    fn aes_subkeys_match_nist() {
        let keychain = CmacKeychain::new(&nist_aes());
        assert_eq!(keychain.subkey_nopad(), unhex("fbeed618357133667c85e08f7236a8de").as_slice());
        assert_eq!(keychain.subkey_pad(), unhex("f7ddac306ae266ccf90bc11ee46d513b").as_slice());
    }

    #[test]
    fn aes_cmac_matches_nist() {
        let primitive = nist_aes();
        let keychain = CmacKeychain::new(&primitive);

        let mut iv = [0u8; 16];
        let mac = keychain.compute_cmac(&primitive, &mut iv, &[]).unwrap();
        assert_eq!(iv.as_slice(), unhex("bb1d6929e95937287fa37d129b756746").as_slice());
        assert_eq!(mac.as_slice(), &iv[..8]);

        let mut iv = [0u8; 16];
        keychain
            .compute_cmac(&primitive, &mut iv, &unhex("6bc1bee22e409f96e93d7e117393172a"))
            .unwrap();
        assert_eq!(iv.as_slice(), unhex("070a16b46b4d4144f79bdd9dd04a287c").as_slice());
    }

    #[test]
    fn subkeys_are_deterministic() {
        let key = unhex("000102030405060708090a0b0c0d0e0f1011121314151617");
        let primitive = Primitive::with_key_bytes(CipherType::Des3_3k, &key).unwrap();
        let first = CmacKeychain::new(&primitive);
        let mut second = CmacKeychain::new(&primitive);
        second.initialize_subkeys(&primitive);

        assert_eq!(first.subkey_nopad(), second.subkey_nopad());
        assert_eq!(first.subkey_pad(), second.subkey_pad());
        assert_eq!(first.subkey_nopad().len(), 8);
    }

    #[test]
    fn subkeys_follow_rekey() {
        let mut primitive = Primitive::with_key_bytes(CipherType::Aes128, &[0; 16]).unwrap();
        let mut keychain = CmacKeychain::new(&primitive);
        let before = keychain.subkey_nopad().to_vec();

        primitive.setup_with_key(&[1; 16]).unwrap();
        keychain.initialize_subkeys(&primitive);

        assert_ne!(keychain.subkey_nopad(), before.as_slice());
    }

    #[test]
    fn prepare_pads_with_marker() {
        let primitive = Primitive::with_key_bytes(CipherType::Des3_3k, &[0x11; 24]).unwrap();
        let keychain = CmacKeychain::new(&primitive);

        let mut data = vec![0xAA; 3];
        keychain.prepare_cmac_data(&mut data, 3);
        assert_eq!(data.len(), 8);

        let mut expected = vec![0xAA, 0xAA, 0xAA, 0x80, 0, 0, 0, 0];
        xor_in_place(&mut expected, keychain.subkey_pad());
        assert_eq!(data, expected);
    }

    #[test]
    fn prepare_full_block_uses_nopad_subkey() {
        let primitive = Primitive::with_key_bytes(CipherType::Aes128, &[0x22; 16]).unwrap();
        let keychain = CmacKeychain::new(&primitive);

        let mut data = vec![0x00; 16];
        keychain.prepare_cmac_data(&mut data, 16);
        assert_eq!(data.as_slice(), keychain.subkey_nopad());

        let mut empty = Vec::new();
        keychain.prepare_cmac_data(&mut empty, 0);
        assert_eq!(empty.len(), 16);
        assert_eq!(empty[0] ^ keychain.subkey_pad()[0], 0x80);
    }

    #[test]
    fn prepare_to_longer_length() {
        let primitive = Primitive::with_key_bytes(CipherType::Aes128, &[0x22; 16]).unwrap();
        let keychain = CmacKeychain::new(&primitive);

        let mut data = vec![0x01; 18];
        keychain.prepare_cmac_data(&mut data, 32);
        assert_eq!(data.len(), 32);
        assert_eq!(data[..16], [0x01; 16]);
    }

    #[test]
    fn cmac_chains_through_iv() {
        let primitive = nist_aes();
        let keychain = CmacKeychain::new(&primitive);

        let mut iv = [0u8; 16];
        let first = keychain.compute_cmac(&primitive, &mut iv, b"status").unwrap();
        let second = keychain.compute_cmac(&primitive, &mut iv, b"status").unwrap();
        assert_ne!(first, second, "chained IV must change the MAC");
    }
}
