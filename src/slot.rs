// ABOUTME: Computes the cluster slot for a key using CRC-16/XMODEM and the hash-tag convention
// ABOUTME: Pure and deterministic; the same bytes always hash to the same slot on every platform

pub const SLOT_COUNT: u16 = 16384;

const POLYNOMIAL: u16 = 0x1021;

/// Returns the 14-bit slot `crc16_xmodem(key) mod 16384`.
///
/// If `key` contains a `{` followed later by a `}` with at least one byte
/// between them, only the bytes strictly between the first such pair are
/// hashed (the "hash tag" convention, used to force co-location of related
/// keys on one shard).
pub fn key_slot(key: &[u8]) -> u16 {
    let hashed = hash_tag(key).unwrap_or(key);
    crc16_xmodem(hashed) % SLOT_COUNT
}

/// Extracts the substring strictly between the first `{` and the next `}`,
/// provided at least one byte lies between them. Returns `None` otherwise,
/// in which case the whole key should be hashed.
pub fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let close_rel = key[open + 1..].iter().position(|&b| b == b'}')?;
    if close_rel == 0 {
        return None;
    }
    Some(&key[open + 1..open + 1 + close_rel])
}

/// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection, no final xor.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}
