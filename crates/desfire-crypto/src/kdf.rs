//! AN10922 key diversification.
//!
//! Each block of the diversified key is the last block of a CMAC-style pass
//! over `constant || input`, padded and masked to two blocks, with a zero IV.
//! The number of constants fixes the diversified key length.

use zeroize::Zeroizing;

use crate::{
    cmac::CmacKeychain,
    error::CryptoError,
    key::{CipherType, Key},
    primitive::{CryptoOperation, MAX_BLOCK_SIZE, Primitive},
};

/// Diversification constants for AES-128
pub const KDF_AES_CONST: [u8; 1] = [0x01];

/// Diversification constants for 3K3DES
pub const KDF_3K3DES_CONST: [u8; 3] = [0x31, 0x32, 0x33];

/// Diversification constants for 2K3DES
pub const KDF_2K3DES_CONST: [u8; 2] = [0x21, 0x22];

/// Diversification constants for DES
pub const KDF_DES_CONST: [u8; 1] = [0x11];

/// Longest diversification input used for a family; longer input is cut.
pub const fn max_diversification_input(cipher: CipherType) -> usize {
    (2 * cipher.block_size()).saturating_sub(1)
}

fn constants(cipher: CipherType) -> &'static [u8] {
    match cipher {
        CipherType::None => &[],
        CipherType::Des => &KDF_DES_CONST,
        CipherType::Des3_2k => &KDF_2K3DES_CONST,
        CipherType::Des3_3k => &KDF_3K3DES_CONST,
        CipherType::Aes128 => &KDF_AES_CONST,
    }
}

/// Diversify `key` with `input` (typically UID, application ID, system id).
///
/// The diversified key keeps the version of `key`.
pub fn diversify_key(key: &Key, input: &[u8]) -> Result<Key, CryptoError> {
    let cipher = key.cipher_type();
    let primitive = Primitive::new(key)?;
    let keychain = CmacKeychain::new(&primitive);
    let block_size = primitive.block_size();

    let input = &input[..input.len().min(max_diversification_input(cipher))];

    let mut body = Zeroizing::new(Vec::with_capacity(cipher.key_size()));
    for &constant in constants(cipher) {
        let mut data = Zeroizing::new(Vec::with_capacity(2 * block_size));
        data.push(constant);
        data.extend_from_slice(input);
        keychain.prepare_cmac_data(&mut data, 2 * block_size);

        let mut iv = [0u8; MAX_BLOCK_SIZE];
        primitive.do_crypto(&mut data, &mut iv[..block_size], CryptoOperation::Mac)?;
        body.extend_from_slice(&data[block_size..2 * block_size]);
    }

    Ok(Key::from_slice(cipher, &body)?.with_version(key.version()))
}
