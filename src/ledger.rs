//! Ledger records: keys, metadata values and the helpers folds use to
//! interpret them.
//!
//! A ledger key is either an object key `(tag, bucket, key)` or a secondary
//! index key `(bucket, field, term, key)`. Any trailing component may be left
//! out (`None`) to form a range bound: a missing component sorts before every
//! present one, and as an end bound it matches every continuation of the
//! components that are present.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// Kind of ledger entry. Each tag occupies its own contiguous key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Head-only objects: metadata in the ledger, body in the journal.
    Head,
    /// Secondary index entries.
    Index,
    /// Standard objects.
    Std,
}

impl Tag {
    pub fn to_byte(self) -> u8 {
        match self {
            Tag::Head => b'h',
            Tag::Index => b'i',
            Tag::Std => b'o',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'h' => Some(Tag::Head),
            b'i' => Some(Tag::Index),
            b'o' => Some(Tag::Std),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LedgerKey {
    Object {
        tag: Tag,
        bucket: Option<Vec<u8>>,
        key: Option<Vec<u8>>,
    },
    Index {
        bucket: Option<Vec<u8>>,
        field: Option<Vec<u8>>,
        term: Option<Vec<u8>>,
        key: Option<Vec<u8>>,
    },
}

impl LedgerKey {
    /// A complete object key.
    pub fn object(tag: Tag, bucket: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        LedgerKey::Object {
            tag,
            bucket: Some(bucket.into()),
            key: Some(key.into()),
        }
    }

    /// An object key usable as a range bound.
    pub fn object_bound(tag: Tag, bucket: Option<&[u8]>, key: Option<&[u8]>) -> Self {
        LedgerKey::Object {
            tag,
            bucket: bucket.map(<[u8]>::to_vec),
            key: key.map(<[u8]>::to_vec),
        }
    }

    /// A complete index key.
    pub fn index(
        bucket: impl Into<Vec<u8>>,
        field: impl Into<Vec<u8>>,
        term: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        LedgerKey::Index {
            bucket: Some(bucket.into()),
            field: Some(field.into()),
            term: Some(term.into()),
            key: Some(key.into()),
        }
    }

    /// An index key usable as a range bound.
    pub fn index_bound(
        bucket: Option<&[u8]>,
        field: Option<&[u8]>,
        term: Option<&[u8]>,
        key: Option<&[u8]>,
    ) -> Self {
        LedgerKey::Index {
            bucket: bucket.map(<[u8]>::to_vec),
            field: field.map(<[u8]>::to_vec),
            term: term.map(<[u8]>::to_vec),
            key: key.map(<[u8]>::to_vec),
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            LedgerKey::Object { tag, .. } => *tag,
            LedgerKey::Index { .. } => Tag::Index,
        }
    }

    /// Components in key order, starting after the tag.
    pub(crate) fn components(&self) -> Vec<Option<&[u8]>> {
        match self {
            LedgerKey::Object { bucket, key, .. } => vec![bucket.as_deref(), key.as_deref()],
            LedgerKey::Index {
                bucket,
                field,
                term,
                key,
            } => vec![
                bucket.as_deref(),
                field.as_deref(),
                term.as_deref(),
                key.as_deref(),
            ],
        }
    }

    /// True when no component is a wildcard.
    pub fn is_complete(&self) -> bool {
        self.components().iter().all(Option::is_some)
    }

    pub fn bucket(&self) -> Option<&[u8]> {
        match self {
            LedgerKey::Object { bucket, .. } | LedgerKey::Index { bucket, .. } => bucket.as_deref(),
        }
    }

    /// `(bucket, object key)` of a complete key of either kind.
    pub fn bucket_and_key(&self) -> Option<(&[u8], &[u8])> {
        match self {
            LedgerKey::Object {
                bucket: Some(bucket),
                key: Some(key),
                ..
            }
            | LedgerKey::Index {
                bucket: Some(bucket),
                key: Some(key),
                ..
            } => Some((bucket.as_slice(), key.as_slice())),
            _ => None,
        }
    }

    /// `(bucket, field, term, key)` of a complete index key.
    pub fn index_parts(&self) -> Option<(&[u8], &[u8], &[u8], &[u8])> {
        match self {
            LedgerKey::Index {
                bucket: Some(bucket),
                field: Some(field),
                term: Some(term),
                key: Some(key),
            } => Some((
                bucket.as_slice(),
                field.as_slice(),
                term.as_slice(),
                key.as_slice(),
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Active { expires: Option<Timestamp> },
    Tombstone,
}

/// Ledger metadata for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerValue {
    /// Journal sequence number of the write.
    pub sqn: u64,
    pub status: Status,
    /// Content hash of the object.
    pub hash: u32,
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: Timestamp,
    pub metadata: Vec<u8>,
}

impl LedgerValue {
    /// Live at `now`: not tombstoned, and any expiry is not yet passed.
    pub fn is_active(&self, now: Timestamp) -> bool {
        match self.status {
            Status::Active { expires: None } => true,
            Status::Active { expires: Some(ts) } => ts >= now,
            Status::Tombstone => false,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Location of an object in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JournalKey {
    pub sqn: u64,
    pub key: LedgerKey,
}

/// `(bucket, key, hash)` for a complete key.
pub fn key_and_hash(key: &LedgerKey, value: &LedgerValue) -> Option<(Vec<u8>, Vec<u8>, u32)> {
    key.bucket_and_key()
        .map(|(bucket, key)| (bucket.to_vec(), key.to_vec(), value.hash))
}

/// The journal location of the object a ledger entry refers to. Index
/// entries point at the standard object carrying the same sequence number.
pub fn journal_key(key: &LedgerKey, value: &LedgerValue) -> Option<JournalKey> {
    match key {
        LedgerKey::Object { .. } if key.is_complete() => Some(JournalKey {
            sqn: value.sqn,
            key: key.clone(),
        }),
        LedgerKey::Index { .. } => key.bucket_and_key().map(|(bucket, object)| JournalKey {
            sqn: value.sqn,
            key: LedgerKey::object(Tag::Std, bucket, object),
        }),
        _ => None,
    }
}

/// Wall-clock time in seconds.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(status: Status) -> LedgerValue {
        LedgerValue {
            sqn: 1,
            status,
            hash: 0,
            size: 10,
            last_modified: 0,
            metadata: Vec::new(),
        }
    }

    #[test]
    fn test_is_active() {
        assert!(value(Status::Active { expires: None }).is_active(100));
        assert!(value(Status::Active { expires: Some(100) }).is_active(100));
        assert!(!value(Status::Active { expires: Some(99) }).is_active(100));
        assert!(!value(Status::Tombstone).is_active(0));
    }

    #[test]
    fn test_bucket_and_key() {
        let key = LedgerKey::object(Tag::Std, "b", "k");
        assert_eq!(key.bucket_and_key(), Some((&b"b"[..], &b"k"[..])));

        let idx = LedgerKey::index("b", "f_bin", "t", "k");
        assert_eq!(idx.bucket_and_key(), Some((&b"b"[..], &b"k"[..])));

        let bound = LedgerKey::object_bound(Tag::Std, Some(b"b"), None);
        assert_eq!(bound.bucket_and_key(), None);
        assert!(!bound.is_complete());
    }

    #[test]
    fn test_index_journal_key_points_at_object() {
        let idx = LedgerKey::index("b", "f_bin", "t", "k");
        let jk = journal_key(&idx, &value(Status::Active { expires: None })).unwrap();
        assert_eq!(jk.key, LedgerKey::object(Tag::Std, "b", "k"));
        assert_eq!(jk.sqn, 1);
    }
}
