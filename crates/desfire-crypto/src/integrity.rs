//! CRC trailers, padding arithmetic and bit shifting.
//!
//! Both CRCs are the bit-reflected variants used by ISO 14443 and DESFire,
//! with no final XOR: the CRC32 is the bitwise negation of the zlib CRC-32.
//! Appending the CRC (least significant byte first) to the data it covers
//! yields a running CRC of zero, which is what [`find_crc_tail`] looks for.

/// Initial value of a DESFire CRC16 (CRC_A)
pub const CRC16_INIT: u16 = 0x6363;

/// Initial value of a DESFire CRC32
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Size of the CRC16 trailer (2 bytes)
pub const CRC16_SIZE: usize = 2;

/// Size of the CRC32 trailer (4 bytes)
pub const CRC32_SIZE: usize = 4;

/// Bytes that may follow a CRC32 as padding
pub const PADDING_BYTES: [u8; 2] = [0x00, 0x80];

/// Padding of legacy enciphered frames
pub const ZERO_PADDING: [u8; 1] = [0x00];

const CRC16_POLY: u16 = 0x8408;
const CRC32_POLY: u32 = 0xEDB8_8320;

/// CRC16 of `data`, continuing from `init`.
///
/// Chaining holds: `crc16(a ++ b, init) == crc16(b, crc16(a, init))`.
pub fn crc16(data: &[u8], init: u16) -> u16 {
    data.iter().fold(init, |mut crc, &byte| {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ CRC16_POLY } else { crc >> 1 };
        }
        crc
    })
}

/// CRC32 of `data`, continuing from `init`.
///
/// Chaining holds: `crc32(a ++ b, init) == crc32(b, crc32(a, init))`.
pub fn crc32(data: &[u8], init: u32) -> u32 {
    data.iter().fold(init, |mut crc, &byte| {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ CRC32_POLY } else { crc >> 1 };
        }
        crc
    })
}

/// Smallest multiple of `block_size` that is at least `len`.
///
/// Zero stays zero. A `block_size` of zero leaves `len` untouched.
pub fn padded_length(len: usize, block_size: usize) -> usize {
    if block_size == 0 {
        return len;
    }
    len.div_ceil(block_size) * block_size
}

/// Shift a big-endian bit string left by `bits` (< 8), in place.
///
/// Bits shifted out of the first byte are lost; zeros enter at the end.
pub fn shift_left_bits(bytes: &mut [u8], bits: u32) {
    debug_assert!(bits < 8, "shift of {bits} bits spans bytes");
    let carry_shift = 8 - bits;
    for i in 0..bytes.len() {
        let carry = bytes.get(i + 1).map_or(0, |next| {
            if bits == 0 { 0 } else { next >> carry_shift }
        });
        bytes[i] = (bytes[i] << bits) | carry;
    }
}

/// How [`find_crc_tail`] extends the CRC while scanning forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcScan {
    /// Feed one more byte into the running CRC.
    Incremental,
    /// Recompute the CRC over the whole prefix at each step. Needed when the
    /// CRC function splices extra bytes between message and CRC.
    Full,
}

/// Locate the end of a `[message][crc]` sequence that was padded to a
/// multiple of `block_size`.
///
/// Scans the last block backwards past `padding` bytes to the earliest
/// candidate end, then advances one byte at a time until the CRC of the prefix
/// is zero. Returns the length of `message || crc`, or `None` if no position
/// verifies, the padding would fill the whole last block, or `data` is not
/// block aligned.
///
/// A garbled block passes a CRC16 check with probability about 2^-16 and a
/// CRC32 check with probability about 2^-32.
pub fn find_crc_tail<N, F>(
    data: &[u8],
    block_size: usize,
    padding: &[u8],
    init: N,
    scan: CrcScan,
    crc_fn: F,
) -> Option<usize>
where
    N: Copy + Default + PartialEq,
    F: Fn(&[u8], N) -> N,
{
    if data.is_empty() || block_size == 0 || data.len() % block_size != 0 {
        return None;
    }

    let last_block = data.len() - block_size;
    let mut end = data[last_block..]
        .iter()
        .rposition(|b| !padding.contains(b))
        .map_or(last_block, |i| last_block + i + 1);

    let zero = N::default();
    let mut crc = crc_fn(&data[..end], init);
    while crc != zero && end < data.len() {
        crc = match scan {
            CrcScan::Incremental => crc_fn(&data[end..=end], crc),
            CrcScan::Full => crc_fn(&data[..=end], init),
        };
        end += 1;
    }

    (crc == zero && end > last_block).then_some(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc16_payload() -> Vec<u8> {
        let pattern = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0x00];
        pattern.iter().cycle().take(47).copied().collect()
    }

    #[test]
    fn crc16_known_answer() {
        assert_eq!(crc16(&crc16_payload(), CRC16_INIT), 0x5530);
    }

    #[test]
    fn crc32_known_answers() {
        let a = hex::decode("c40000102031405060708090a0b0b0a09080").unwrap();
        assert_eq!(crc32(&a, CRC32_INIT), 0x5001_FFC5);

        let b = hex::decode("c4000010203040506070809 0a0b0b0a0908010".replace(' ', "")).unwrap();
        assert_eq!(crc32(&b, CRC32_INIT), 0x6BE6_C6D2);
    }

    #[test]
    fn crc32_is_negated_zlib() {
        // zlib CRC-32 of "123456789" is 0xCBF43926
        assert_eq!(crc32(b"123456789", CRC32_INIT), !0xCBF4_3926);
    }

    #[test]
    fn appended_crc_leaves_zero_residue() {
        let data = crc16_payload();

        let mut with_crc16 = data.clone();
        with_crc16.extend_from_slice(&crc16(&data, CRC16_INIT).to_le_bytes());
        assert_eq!(crc16(&with_crc16, CRC16_INIT), 0);

        let mut with_crc32 = data.clone();
        with_crc32.extend_from_slice(&crc32(&data, CRC32_INIT).to_le_bytes());
        assert_eq!(crc32(&with_crc32, CRC32_INIT), 0);
    }

    #[test]
    fn crc_chains_across_splits() {
        let data = crc16_payload();
        let (a, b) = data.split_at(13);
        assert_eq!(crc16(b, crc16(a, CRC16_INIT)), crc16(&data, CRC16_INIT));
        assert_eq!(crc32(b, crc32(a, CRC32_INIT)), crc32(&data, CRC32_INIT));
    }

    #[test]
    fn padded_length_rounds_up() {
        assert_eq!(padded_length(0, 8), 0);
        assert_eq!(padded_length(1, 8), 8);
        assert_eq!(padded_length(8, 8), 8);
        assert_eq!(padded_length(9, 8), 16);
        assert_eq!(padded_length(17, 16), 32);
        assert_eq!(padded_length(5, 0), 5);
    }

    #[test]
    fn shift_left_carries_across_bytes() {
        let mut bytes = [0x80, 0x01, 0xFF];
        shift_left_bits(&mut bytes, 1);
        assert_eq!(bytes, [0x00, 0x03, 0xFE]);

        let mut bytes = [0x0F, 0xF0];
        shift_left_bits(&mut bytes, 4);
        assert_eq!(bytes, [0xFF, 0x00]);

        let mut bytes = [0xAB];
        shift_left_bits(&mut bytes, 0);
        assert_eq!(bytes, [0xAB]);
    }

    fn crc16_tail(data: &[u8]) -> Option<usize> {
        find_crc_tail(data, 8, &ZERO_PADDING, CRC16_INIT, CrcScan::Incremental, crc16)
    }

    #[test]
    fn crc_tail_found_behind_padding() {
        let message = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut data = message.to_vec();
        data.extend_from_slice(&crc16(&message, CRC16_INIT).to_le_bytes());
        data.resize(padded_length(data.len(), 8), 0x00);

        assert_eq!(crc16_tail(&data), Some(message.len() + CRC16_SIZE));
    }

    #[test]
    fn crc_tail_with_trailing_zero_in_message() {
        // The message itself ends in a padding byte
        let message = [0xAA, 0x00, 0x80];
        let mut data = message.to_vec();
        data.extend_from_slice(&crc32(&message, CRC32_INIT).to_le_bytes());
        let framed = data.len();
        data.resize(padded_length(data.len(), 16), 0x00);

        let end = find_crc_tail(&data, 16, &PADDING_BYTES, CRC32_INIT, CrcScan::Full, crc32);
        assert_eq!(end, Some(framed));
    }

    #[test]
    fn crc_tail_advances_over_crc_ending_in_zero() {
        let message = [0x01, 0x02, 0x6A];
        let crc = crc16(&message, CRC16_INIT);
        assert_eq!(crc.to_le_bytes()[1], 0x00);

        let mut data = message.to_vec();
        data.extend_from_slice(&crc.to_le_bytes());
        data.resize(8, 0x00);

        assert_eq!(crc16_tail(&data), Some(5));
    }

    #[test]
    fn crc_tail_rejects_corruption() {
        let message = [0x10, 0x20, 0x30];
        let mut data = message.to_vec();
        data.extend_from_slice(&crc16(&message, CRC16_INIT).to_le_bytes());
        data.resize(8, 0x00);
        data[1] ^= 0x01;

        assert_eq!(crc16_tail(&data), None);
    }

    #[test]
    fn crc_tail_rejects_misaligned_or_empty() {
        assert_eq!(crc16_tail(&[]), None);
        assert_eq!(crc16_tail(&[0u8; 7]), None);
    }

    #[test]
    fn padding_never_fills_a_block() {
        let message = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut data = message.to_vec();
        data.extend_from_slice(&crc16(&message, CRC16_INIT).to_le_bytes());
        assert_eq!(crc16_tail(&data), Some(8));

        data.extend_from_slice(&[0x00; 8]);
        assert_eq!(crc16_tail(&data), None);
    }

    #[test]
    fn padding_set_is_honoured() {
        let message = [0x01, 0x02, 0x03];
        let mut data = message.to_vec();
        data.extend_from_slice(&crc16(&message, CRC16_INIT).to_le_bytes());
        data.extend_from_slice(&[0x80, 0x00, 0x00]);

        assert_eq!(crc16_tail(&data), None);
        let end = find_crc_tail(&data, 8, &PADDING_BYTES, CRC16_INIT, CrcScan::Incremental, crc16);
        assert_eq!(end, Some(5));
    }
}
