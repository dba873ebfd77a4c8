use std::fmt;

use crc::{Algorithm, Crc, CRC_32_ISCSI, CRC_32_ISO_HDLC};

/// Drives segment placement (tic-tac trees, segment-restricted folds).
const SEGMENT_ALGORITHM: Algorithm<u32> = CRC_32_ISCSI;

/// Drives membership filter placement.
const FULL_ALGORITHM: Algorithm<u32> = CRC_32_ISO_HDLC;

const SEGMENT_CRC: Crc<u32> = Crc::<u32>::new(&SEGMENT_ALGORITHM);
const FULL_CRC: Crc<u32> = Crc::<u32>::new(&FULL_ALGORITHM);

/// The two independent 32-bit hashes carried by every stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashPair {
    pub segment: u32,
    pub full: u32,
}

impl HashPair {
    pub fn new(segment: u32, full: u32) -> Self {
        Self { segment, full }
    }

    /// Hashes an arbitrary byte string.
    pub fn of(data: &[u8]) -> Self {
        Self {
            segment: SEGMENT_CRC.checksum(data),
            full: FULL_CRC.checksum(data),
        }
    }

    /// Hashes a bucket/key pair. The length prefix keeps ("ab", "c") and
    /// ("a", "bc") apart.
    pub fn of_key(bucket: &[u8], key: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.write(&(bucket.len() as u32).to_be_bytes());
        hasher.write(bucket);
        hasher.write(key);
        hasher.finish()
    }
}

/// Incremental builder for a [`HashPair`].
#[derive(Clone)]
pub struct Hasher {
    buffer: Vec<u8>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn finish(&self) -> HashPair {
        HashPair::of(&self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash of a stored object, as recorded in the ledger value.
pub fn content_hash(object: &[u8]) -> u32 {
    FULL_CRC.checksum(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_hash() {
        let mut hasher1 = Hasher::new();
        hasher1.write(b"hello ");
        hasher1.write(b"world");

        let mut hasher2 = Hasher::new();
        hasher2.write(b"hello world");

        assert_eq!(
            hasher1.finish(),
            hasher2.finish(),
            "Incremental and single-write hashes should match"
        );
    }

    #[test]
    fn test_reset_hasher() {
        let mut hasher = Hasher::new();
        hasher.write(b"hello");
        let first = hasher.finish();

        hasher.reset();
        hasher.write(b"hello");
        assert_eq!(first, hasher.finish());
    }

    #[test]
    fn test_halves_are_independent() {
        let pair = HashPair::of(b"bucket/key");
        assert_ne!(pair.segment, pair.full);
    }

    #[test]
    fn test_key_boundary_matters() {
        assert_ne!(HashPair::of_key(b"ab", b"c"), HashPair::of_key(b"a", b"bc"));
        assert_eq!(HashPair::of_key(b"a", b"bc"), HashPair::of_key(b"a", b"bc"));
    }
}
