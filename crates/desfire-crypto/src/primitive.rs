//! Block primitives with explicit CBC chaining.
//!
//! A [`Primitive`] wraps one keyed block cipher of the DES family or AES-128
//! and runs CBC over whole blocks with a caller-owned IV. Three operations
//! exist:
//!
//! ```text
//! Encrypt:  y_i = E(x_i ^ y_{i-1})      (DES/2K3DES: y_i = D(x_i ^ y_{i-1}))
//! Decrypt:  x_i = D(y_i) ^ y_{i-1}
//! Mac:      y_i = E(x_i ^ y_{i-1})      (always the forward transform)
//! ```
//!
//! The DES/2K3DES encrypt quirk is the DESFire native "send mode": the reader
//! only ever applies the decipher transform, the card only ever enciphers.
//! After every call the IV holds the last chaining value.

use aes::Aes128;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use des::{Des, TdesEde2, TdesEde3};

use crate::{
    error::CryptoError,
    key::{CipherType, Key, halves_match_except_parity},
    session_key::derive_session_key,
};

/// Largest block size of any supported primitive (16 bytes, AES)
pub const MAX_BLOCK_SIZE: usize = 16;

/// Direction of a CBC pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoOperation {
    /// Encipher outgoing data
    Encrypt,
    /// Decipher incoming data
    Decrypt,
    /// CBC-MAC pass; never uses the decipher transform
    Mac,
}

enum Engine {
    Des(Des),
    Des3_2k(TdesEde2),
    Des3_3k(TdesEde3),
    Aes128(Aes128),
}

impl Engine {
    fn new(cipher: CipherType, key: &[u8]) -> Result<Self, CryptoError> {
        let invalid =
            |_| CryptoError::InvalidKeyLength { cipher, expected: cipher.key_size(), actual: key.len() };

        Ok(match cipher {
            CipherType::Des => Self::Des(Des::new_from_slice(key).map_err(invalid)?),
            CipherType::Des3_2k => Self::Des3_2k(TdesEde2::new_from_slice(key).map_err(invalid)?),
            CipherType::Des3_3k => Self::Des3_3k(TdesEde3::new_from_slice(key).map_err(invalid)?),
            CipherType::Aes128 => Self::Aes128(Aes128::new_from_slice(key).map_err(invalid)?),
            CipherType::None => return Err(CryptoError::UnsupportedCipher { cipher }),
        })
    }

    // `block` is exactly one block long; checked by the callers
    fn encrypt_block(&self, block: &mut [u8]) {
        match self {
            Self::Des(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des3_2k(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des3_3k(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        match self {
            Self::Des(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des3_2k(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des3_3k(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes128(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
        }
    }
}

/// A keyed block primitive for one cipher family.
///
/// Key schedules are zeroized on drop by the cipher backends.
pub struct Primitive {
    cipher: CipherType,
    engine: Engine,
    degenerate: bool,
}

impl Primitive {
    /// Instantiate the primitive for `key`'s family and key it.
    pub fn new(key: &Key) -> Result<Self, CryptoError> {
        Self::with_key_bytes(key.cipher_type(), key.body())
    }

    /// Instantiate a primitive of family `cipher` keyed with raw bytes.
    pub fn with_key_bytes(cipher: CipherType, key: &[u8]) -> Result<Self, CryptoError> {
        let engine = Engine::new(cipher, key)?;
        let degenerate = cipher == CipherType::Des3_2k && halves_match_except_parity(key);
        Ok(Self { cipher, engine, degenerate })
    }

    /// Cipher family.
    pub fn cipher_type(&self) -> CipherType {
        self.cipher
    }

    /// Block size in bytes (8 or 16).
    pub fn block_size(&self) -> usize {
        self.cipher.block_size()
    }

    /// Re-key with raw bytes of the exact size the family requires.
    ///
    /// On error the previous key stays in place.
    pub fn setup_with_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        self.engine = Engine::new(self.cipher, key)?;
        self.degenerate = self.cipher == CipherType::Des3_2k && halves_match_except_parity(key);
        Ok(())
    }

    /// Whether the current key is a 2K3DES key that collapses to single DES.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Derive the session key from `RndA || RndB` and re-key with it.
    ///
    /// A degenerate 2K3DES key yields a degenerate session key.
    pub fn init_session(&mut self, rnd_ab: &[u8]) -> Result<(), CryptoError> {
        let session_key = derive_session_key(self.cipher, rnd_ab, self.degenerate)?;
        self.setup_with_key(session_key.body())
    }

    /// Forward block transform of exactly one block.
    ///
    /// # Errors
    ///
    /// [`CryptoError::MisalignedData`] if `block` is not one block long.
    pub fn encrypt_block(&self, block: &mut [u8]) -> Result<(), CryptoError> {
        self.check_single_block(block)?;
        self.engine.encrypt_block(block);
        Ok(())
    }

    /// Inverse block transform of exactly one block.
    ///
    /// # Errors
    ///
    /// [`CryptoError::MisalignedData`] if `block` is not one block long.
    pub fn decrypt_block(&self, block: &mut [u8]) -> Result<(), CryptoError> {
        self.check_single_block(block)?;
        self.engine.decrypt_block(block);
        Ok(())
    }

    /// Run `op` over `data` in place, chaining through `iv`.
    ///
    /// # Errors
    ///
    /// [`CryptoError::IvLength`] if `iv` is not one block long,
    /// [`CryptoError::MisalignedData`] if `data` is not whole blocks.
    pub fn do_crypto(
        &self,
        data: &mut [u8],
        iv: &mut [u8],
        op: CryptoOperation,
    ) -> Result<(), CryptoError> {
        let block_size = self.block_size();
        if iv.len() != block_size {
            return Err(CryptoError::IvLength { expected: block_size, actual: iv.len() });
        }
        if data.len() % block_size != 0 {
            return Err(CryptoError::MisalignedData { len: data.len(), block_size });
        }

        let send_mode = matches!(self.cipher, CipherType::Des | CipherType::Des3_2k);
        for block in data.chunks_exact_mut(block_size) {
            match op {
                CryptoOperation::Encrypt | CryptoOperation::Mac => {
                    xor_in_place(block, iv);
                    if op == CryptoOperation::Encrypt && send_mode {
                        self.engine.decrypt_block(block);
                    } else {
                        self.engine.encrypt_block(block);
                    }
                    iv.copy_from_slice(block);
                },
                CryptoOperation::Decrypt => {
                    let mut next_iv = [0u8; MAX_BLOCK_SIZE];
                    next_iv[..block_size].copy_from_slice(block);
                    self.engine.decrypt_block(block);
                    xor_in_place(block, iv);
                    iv.copy_from_slice(&next_iv[..block_size]);
                },
            }
        }
        Ok(())
    }

    fn check_single_block(&self, block: &[u8]) -> Result<(), CryptoError> {
        let block_size = self.block_size();
        if block.len() == block_size {
            Ok(())
        } else {
            Err(CryptoError::MisalignedData { len: block.len(), block_size })
        }
    }
}

impl std::fmt::Debug for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Primitive")
            .field("cipher", &self.cipher)
            .field("degenerate", &self.degenerate)
            .finish_non_exhaustive()
    }
}

/// `dst ^= src`, byte by byte over the shorter of the two.
pub fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    #[test]
    fn des_encrypt_uses_send_mode() {
        let primitive = Primitive::with_key_bytes(CipherType::Des, &unhex("c86db44f0552b69b")).unwrap();
        let mut data = unhex("0002040708 0a0c0e 0002040708 0a0c0e 2aec000000000000");
        let mut iv = [0u8; 8];

        primitive.do_crypto(&mut data, &mut iv, CryptoOperation::Encrypt).unwrap();

        assert_eq!(data, unhex("ae992bd72b90324f 3e2cf2f35e4fd79a 99bea561ad0424bc"));
        assert_eq!(iv.as_slice(), &data[16..]);
    }

    #[test]
    fn des_decrypt_zero_key() {
        let primitive = Primitive::with_key_bytes(CipherType::Des, &[0; 8]).unwrap();
        let mut data = unhex("5D994CE085F24089");
        let mut iv = [0u8; 8];

        primitive.do_crypto(&mut data, &mut iv, CryptoOperation::Decrypt).unwrap();

        assert_eq!(data, unhex("4fd1b75942a8b8e1"));
        assert_eq!(iv.as_slice(), unhex("5D994CE085F24089").as_slice());
    }

    #[test]
    fn aes_exchange_chains_iv_across_calls() {
        let primitive = Primitive::with_key_bytes(CipherType::Aes128, &[0; 16]).unwrap();
        let mut iv = [0u8; 16];

        // Card challenge, deciphered
        let mut rnd_b = unhex("B969FDFE56FD91FC9DE6F6F213B8FD1E");
        primitive.do_crypto(&mut rnd_b, &mut iv, CryptoOperation::Decrypt).unwrap();
        assert_eq!(rnd_b, unhex("C05DDD714FD788A6B7B754F3C4D066E8"));

        // Reader answer, enciphered with the IV left by the previous step
        let mut answer =
            unhex("F44B26F5686F3A391CD38EBD10772281 5DDD714FD788A6B7B754F3C4D066E8C0");
        primitive.do_crypto(&mut answer, &mut iv, CryptoOperation::Encrypt).unwrap();
        assert_eq!(
            answer,
            unhex("36AAD7DF6E436BA08D18613830A70D5A D43E3D3F4A8D47541EEE623A934E4774")
        );
    }

    #[test]
    fn des3_3k_decrypt_zero_key() {
        let primitive = Primitive::with_key_bytes(CipherType::Des3_3k, &[0; 24]).unwrap();
        let mut data = unhex("BC1C570BC948156187132364E4DCE176");
        let mut iv = [0u8; 8];

        primitive.do_crypto(&mut data, &mut iv, CryptoOperation::Decrypt).unwrap();

        assert_eq!(data, unhex("316E6D76A449F925BA304FB2653656A2"));
    }

    #[test]
    fn encrypt_then_decrypt_restores_for_modern_ciphers() {
        for (cipher, key) in [(CipherType::Aes128, vec![3u8; 16]), (CipherType::Des3_3k, vec![9u8; 24])] {
            let primitive = Primitive::with_key_bytes(cipher, &key).unwrap();
            let plain: Vec<u8> = (0..32).collect();
            let mut data = plain.clone();

            let mut iv = vec![0u8; primitive.block_size()];
            primitive.do_crypto(&mut data, &mut iv, CryptoOperation::Encrypt).unwrap();
            assert_ne!(data, plain);

            let mut iv = vec![0u8; primitive.block_size()];
            primitive.do_crypto(&mut data, &mut iv, CryptoOperation::Decrypt).unwrap();
            assert_eq!(data, plain);
        }
    }

    #[test]
    fn mac_never_uses_send_mode() {
        let primitive = Primitive::with_key_bytes(CipherType::Des3_2k, &[0x42; 16]).unwrap();
        let mut mac = [0x17u8; 8];
        let mut expected = mac;
        let mut iv = [0u8; 8];

        primitive.do_crypto(&mut mac, &mut iv, CryptoOperation::Mac).unwrap();
        primitive.encrypt_block(&mut expected).unwrap();

        assert_eq!(mac, expected);
    }

    #[test]
    fn rejects_bad_lengths() {
        let err = Primitive::with_key_bytes(CipherType::Des3_3k, &[0; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::InvalidKeyLength { cipher: CipherType::Des3_3k, expected: 24, actual: 16 }
        );
        assert_eq!(
            Primitive::with_key_bytes(CipherType::None, &[]).unwrap_err(),
            CryptoError::UnsupportedCipher { cipher: CipherType::None }
        );

        let primitive = Primitive::with_key_bytes(CipherType::Aes128, &[0; 16]).unwrap();
        let mut iv = [0u8; 16];
        let mut short = [0u8; 15];
        assert_eq!(
            primitive.do_crypto(&mut short, &mut iv, CryptoOperation::Encrypt),
            Err(CryptoError::MisalignedData { len: 15, block_size: 16 })
        );
        let mut small_iv = [0u8; 8];
        assert_eq!(
            primitive.do_crypto(&mut [0u8; 16], &mut small_iv, CryptoOperation::Mac),
            Err(CryptoError::IvLength { expected: 16, actual: 8 })
        );
    }

    #[test]
    fn failed_setup_keeps_previous_key() {
        let mut primitive = Primitive::with_key_bytes(CipherType::Aes128, &[1; 16]).unwrap();
        let mut before = [0u8; 16];
        primitive.encrypt_block(&mut before).unwrap();

        assert!(primitive.setup_with_key(&[1; 8]).is_err());

        let mut after = [0u8; 16];
        primitive.encrypt_block(&mut after).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn degenerate_flag_follows_key() {
        let mut primitive = Primitive::with_key_bytes(CipherType::Des3_2k, &[0x20; 16]).unwrap();
        assert!(primitive.is_degenerate());

        let mut distinct = [0x20u8; 16];
        distinct[9] = 0x44;
        primitive.setup_with_key(&distinct).unwrap();
        assert!(!primitive.is_degenerate());
    }

    #[test]
    fn degenerate_key_survives_session_init() {
        let mut primitive = Primitive::with_key_bytes(CipherType::Des3_2k, &[0x20; 16]).unwrap();
        let rnd_ab: Vec<u8> = (1..=16).collect();

        primitive.init_session(&rnd_ab).unwrap();

        assert!(primitive.is_degenerate());
    }
}
