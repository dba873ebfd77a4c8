//! Tic-tac Merkle trees for anti-entropy comparison.
//!
//! A tree is a flat array of segment hashes. Every `(bucket, key, hash)`
//! entry is XOR-ed into the segment selected by its key's segment hash, so a
//! tree is independent of insertion order and two trees built over the same
//! data match segment for segment. Comparing trees yields the segments whose
//! keys need repair, and a [`SegmentFilter`] built from those segments lets a
//! head fold revisit only the affected keys.

use std::collections::BTreeSet;

use crate::hasher::{HashPair, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeSize {
    XSmall,
    Small,
    Medium,
    Large,
}

impl TreeSize {
    /// Number of segments, always a power of two.
    pub fn segments(self) -> usize {
        match self {
            TreeSize::XSmall => 1 << 8,
            TreeSize::Small => 1 << 10,
            TreeSize::Medium => 1 << 12,
            TreeSize::Large => 1 << 14,
        }
    }

    /// Segment a key belongs to in trees of this size.
    pub fn segment_of(self, bucket: &[u8], key: &[u8]) -> u32 {
        HashPair::of_key(bucket, key).segment & (self.segments() as u32 - 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicTacTree {
    size: TreeSize,
    segments: Vec<u32>,
    count: u64,
}

impl TicTacTree {
    pub fn new(size: TreeSize) -> Self {
        Self {
            size,
            segments: vec![0; size.segments()],
            count: 0,
        }
    }

    pub fn size(&self) -> TreeSize {
        self.size
    }

    /// Number of entries added (merges add the other tree's count).
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// XORs an entry into its segment.
    pub fn add(&mut self, bucket: &[u8], key: &[u8], hash: u32) {
        let segment = self.size.segment_of(bucket, key) as usize;

        let mut hasher = Hasher::new();
        hasher.write(&(bucket.len() as u32).to_be_bytes());
        hasher.write(bucket);
        hasher.write(key);
        hasher.write(&hash.to_be_bytes());
        self.segments[segment] ^= hasher.finish().full;
        self.count += 1;
    }

    pub fn segment(&self, index: usize) -> Option<u32> {
        self.segments.get(index).copied()
    }

    /// Hash over all segments.
    pub fn root(&self) -> u32 {
        let mut hasher = Hasher::new();
        for segment in &self.segments {
            hasher.write(&segment.to_be_bytes());
        }
        hasher.finish().full
    }

    /// Combines a tree built over a disjoint key set. Returns `false` and
    /// leaves `self` untouched when the sizes differ.
    pub fn merge(&mut self, other: &TicTacTree) -> bool {
        if self.size != other.size {
            return false;
        }
        for (mine, theirs) in self.segments.iter_mut().zip(&other.segments) {
            *mine ^= theirs;
        }
        self.count += other.count;
        true
    }

    /// Segments whose hashes differ. Trees of different sizes differ
    /// everywhere.
    pub fn dirty_segments(&self, other: &TicTacTree) -> Vec<u32> {
        if self.size != other.size {
            return (0..self.segments.len() as u32).collect();
        }
        self.segments
            .iter()
            .zip(&other.segments)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// Restricts a fold to keys falling into the listed segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFilter {
    size: TreeSize,
    segments: BTreeSet<u32>,
}

impl SegmentFilter {
    pub fn new(size: TreeSize, segments: impl IntoIterator<Item = u32>) -> Self {
        Self {
            size,
            segments: segments.into_iter().collect(),
        }
    }

    pub fn matches(&self, bucket: &[u8], key: &[u8]) -> bool {
        self.segments.contains(&self.size.segment_of(bucket, key))
    }
}
