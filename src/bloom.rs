//! Segmented membership filter over record hash pairs.
//!
//! A filter is built once from a complete batch of [`HashPair`]s (typically
//! the keys of one block, up to ~128 of them) and never updated. It is split
//! into 2, 4 or 8 independent 128-bit words; the low bits of the full hash
//! pick the word and four disjoint 7-bit slices of the same hash pick the
//! bits set inside it, so every insert and probe touches a single word.
//!
//! ```text
//!  full hash (u32)
//!  ┌───────┬───────┬───────┬───────┬────┬───┐
//!  │ 31-25 │ 24-18 │ 17-11 │ 10-4  │ .. │2-0│
//!  └───┬───┴───┬───┴───┬───┴───┬───┴────┴─┬─┘
//!      bit     bit     bit     bit        slot
//! ```
//!
//! The serialized form is the words in slot order, each a big-endian `u128`.
//! An empty hash list yields an empty filter, which never reports a match.

use byteorder::{BigEndian, ByteOrder};

use crate::hasher::HashPair;

/// Size of one filter word in bytes.
pub const WORD_SIZE: usize = 16;

/// Bit offsets of the four 7-bit slices used as in-word bit positions.
const BIT_SHIFTS: [u32; 4] = [4, 11, 18, 25];

const BIT_MASK: u32 = 127;

/// Number of words used for a batch of `count` hashes.
fn word_count(count: usize) -> usize {
    match count {
        0 => 0,
        1..=16 => 2,
        17..=32 => 4,
        _ => 8,
    }
}

/// The word index and in-word mask for a hash.
fn position(full: u32, words: usize) -> (usize, u128) {
    let slot = (full & (words as u32 - 1)) as usize;
    let mask = BIT_SHIFTS
        .iter()
        .fold(0u128, |mask, shift| mask | 1u128 << ((full >> shift) & BIT_MASK));
    (slot, mask)
}

/// Builds a filter from the full list of hashes.
pub fn create(hashes: &[HashPair]) -> Vec<u8> {
    let words = word_count(hashes.len());
    if words == 0 {
        return Vec::new();
    }

    let mut accumulators = vec![0u128; words];
    for hash in hashes {
        let (slot, mask) = position(hash.full, words);
        accumulators[slot] |= mask;
    }

    let mut filter = vec![0u8; words * WORD_SIZE];
    for (chunk, word) in filter.chunks_exact_mut(WORD_SIZE).zip(&accumulators) {
        BigEndian::write_u128(chunk, *word);
    }
    filter
}

/// Tests a hash against a filter produced by [`create`].
///
/// Never yields a false negative. Filters of a length `create` cannot produce
/// are a caller bug; they are reported as not containing anything.
pub fn check(hash: HashPair, filter: &[u8]) -> bool {
    let words = filter.len() / WORD_SIZE;
    if !matches!(words, 2 | 4 | 8) || filter.len() % WORD_SIZE != 0 {
        return false;
    }

    let (slot, mask) = position(hash.full, words);
    let offset = slot * WORD_SIZE;
    let word = BigEndian::read_u128(&filter[offset..offset + WORD_SIZE]);
    word & mask == mask
}
