// src/core/client/slot.rs

//! The cluster hash slot algorithm, used to route key-addressed commands.

use crc::{CRC_16_XMODEM, Crc};

/// The total number of hash slots in a cluster.
pub const NUM_SLOTS: u16 = 16384;

/// Cluster servers hash keys with CRC16/XMODEM.
const CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the hash slot for a key.
///
/// If the key contains a non-empty hash tag (`{...}`), only the tag is hashed, so
/// keys sharing a tag land in the same slot.
pub fn key_slot(key: &[u8]) -> u16 {
    if let Some(start) = key.iter().position(|&b| b == b'{')
        && let Some(end_offset) = key[start + 1..].iter().position(|&b| b == b'}')
        && end_offset > 0
    {
        let end = start + 1 + end_offset;
        return CRC16_ALGO.checksum(&key[start + 1..end]) % NUM_SLOTS;
    }
    CRC16_ALGO.checksum(key) % NUM_SLOTS
}
