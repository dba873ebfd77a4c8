//! Order-preserving byte encoding of ledger keys.
//!
//! ```text
//! <tag byte> ( 0x01 <escaped component> 0x00 0x00 )*
//! ```
//!
//! Inside a component `0x00` is escaped as `0x00 0xFF`, so the `0x00 0x00`
//! terminator sorts below any continuation of the component. Wildcard
//! components are simply not written: the encoding of a bound is the prefix
//! shared by every key it covers.

use super::{EncodingError, Key};
use crate::error::Result;
use crate::ledger::{LedgerKey, Tag};
use std::ops::Bound;

const COMPONENT_MARKER: u8 = 0x01;

/// Append one escaped, terminated component.
fn encode_component(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(COMPONENT_MARKER);

    for &byte in bytes {
        if byte == 0x00 {
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(byte);
        }
    }

    out.extend_from_slice(&[0x00, 0x00]);
}

/// Decode one component, returning it and the number of bytes consumed.
fn decode_component(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
    if bytes.first() != Some(&COMPONENT_MARKER) {
        return Err(EncodingError::InvalidFormat("Missing component marker".to_string()).into());
    }

    let mut result = Vec::new();
    let mut i = 1;

    while i < bytes.len() {
        if bytes[i] == 0x00 {
            match bytes.get(i + 1) {
                Some(0xFF) => {
                    result.push(0x00);
                    i += 2;
                }
                Some(0x00) => return Ok((result, i + 2)),
                Some(_) => {
                    return Err(
                        EncodingError::InvalidFormat("Invalid null byte escape".to_string()).into(),
                    )
                }
                None => return Err(EncodingError::TruncatedData.into()),
            }
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    Err(EncodingError::TruncatedData.into())
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` when no such string exists (all bytes are 0xFF).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    prefix.iter().rposition(|b| *b != 0xff).map(|i| {
        prefix[..i]
            .iter()
            .chain(std::iter::once(&(prefix[i] + 1)))
            .copied()
            .collect::<Vec<u8>>()
    })
}

/// Encoded bounds covering every complete key between `start` and `end`.
///
/// An `end` with wildcards covers all keys sharing its present components.
pub fn encode_range(start: &LedgerKey, end: &LedgerKey) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = Bound::Included(start.encode());
    let upper = if end.is_complete() {
        Bound::Included(end.encode())
    } else {
        match prefix_successor(&end.encode()) {
            Some(successor) => Bound::Excluded(successor),
            None => Bound::Unbounded,
        }
    };
    (lower, upper)
}

impl Key for LedgerKey {
    fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag().to_byte()];
        for component in self.components() {
            match component {
                Some(bytes) => encode_component(&mut out, bytes),
                None => break,
            }
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag_byte, mut rest) = bytes.split_first().ok_or(EncodingError::TruncatedData)?;
        let tag = Tag::from_byte(tag_byte).ok_or(EncodingError::UnknownTag(tag_byte))?;
        let arity = if tag == Tag::Index { 4 } else { 2 };

        let mut parts: Vec<Option<Vec<u8>>> = Vec::with_capacity(arity);
        while !rest.is_empty() {
            if parts.len() == arity {
                return Err(
                    EncodingError::InvalidFormat("Trailing bytes after key".to_string()).into(),
                );
            }
            let (component, used) = decode_component(rest)?;
            parts.push(Some(component));
            rest = &rest[used..];
        }
        parts.resize(arity, None);

        let mut parts = parts.into_iter();
        let mut next = || parts.next().flatten();
        Ok(if tag == Tag::Index {
            LedgerKey::Index {
                bucket: next(),
                field: next(),
                term: next(),
                key: next(),
            }
        } else {
            LedgerKey::Object {
                tag,
                bucket: next(),
                key: next(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_range(key: &LedgerKey, range: &(Bound<Vec<u8>>, Bound<Vec<u8>>)) -> bool {
        use std::ops::RangeBounds;
        range.contains(&key.encode())
    }

    #[test]
    fn test_object_key_ordering() {
        let keys = [
            LedgerKey::object(Tag::Std, "a", "z"),
            LedgerKey::object(Tag::Std, "ab", ""),
            LedgerKey::object(Tag::Std, "ab", "a"),
            LedgerKey::object(Tag::Std, "ab", "a\0"),
            LedgerKey::object(Tag::Std, "ab", "b"),
            LedgerKey::object(Tag::Std, "b", "a"),
        ];
        let encoded: Vec<_> = keys.iter().map(|k| k.encode()).collect();

        for i in 1..encoded.len() {
            assert!(encoded[i - 1] < encoded[i], "{:?} >= {:?}", keys[i - 1], keys[i]);
        }
    }

    #[test]
    fn test_tags_are_disjoint() {
        let head = LedgerKey::object(Tag::Head, "zzz", "zzz").encode();
        let index = LedgerKey::index("a", "f", "t", "k").encode();
        let std = LedgerKey::object(Tag::Std, "a", "a").encode();
        assert!(head < index);
        assert!(index < std);
    }

    #[test]
    fn test_round_trip() {
        let keys = [
            LedgerKey::object(Tag::Std, "bucket", "key"),
            LedgerKey::object(Tag::Head, vec![0x00, 0xFF], vec![0xFF, 0x00]),
            LedgerKey::index("b", "f_bin", "term", "k"),
            LedgerKey::object_bound(Tag::Std, Some(b"b"), None),
            LedgerKey::index_bound(Some(b"b"), Some(b"f"), None, None),
        ];
        for key in keys {
            assert_eq!(LedgerKey::decode(&key.encode()).unwrap(), key);
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(LedgerKey::decode(&[]).is_err());
        assert!(LedgerKey::decode(&[b'x']).is_err());
        assert!(LedgerKey::decode(&[b'o', 0x01, b'a']).is_err());
        assert!(LedgerKey::decode(&[b'o', 0x01, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_bucket_range() {
        let bound = LedgerKey::object_bound(Tag::Std, Some(b"B1"), None);
        let range = encode_range(&bound, &bound);

        assert!(in_range(&LedgerKey::object(Tag::Std, "B1", ""), &range));
        assert!(in_range(&LedgerKey::object(Tag::Std, "B1", "\u{ff}zz"), &range));
        assert!(!in_range(&LedgerKey::object(Tag::Std, "B1\0", "a"), &range));
        assert!(!in_range(&LedgerKey::object(Tag::Std, "B10", "a"), &range));
        assert!(!in_range(&LedgerKey::object(Tag::Std, "B0", "a"), &range));
        assert!(!in_range(&LedgerKey::object(Tag::Head, "B1", "a"), &range));
    }

    #[test]
    fn test_tag_range() {
        let bound = LedgerKey::object_bound(Tag::Std, None, None);
        let range = encode_range(&bound, &bound);

        assert!(in_range(&LedgerKey::object(Tag::Std, "", ""), &range));
        assert!(in_range(&LedgerKey::object(Tag::Std, "zz", "zz"), &range));
        assert!(!in_range(&LedgerKey::index("a", "f", "t", "k"), &range));
    }

    #[test]
    fn test_index_term_range_is_inclusive() {
        let start = LedgerKey::index_bound(Some(b"B"), Some(b"F"), Some(b"b"), None);
        let end = LedgerKey::index_bound(Some(b"B"), Some(b"F"), Some(b"d"), None);
        let range = encode_range(&start, &end);

        assert!(!in_range(&LedgerKey::index("B", "F", "a", "k"), &range));
        assert!(in_range(&LedgerKey::index("B", "F", "b", "k"), &range));
        assert!(in_range(&LedgerKey::index("B", "F", "d", "zzz"), &range));
        assert!(!in_range(&LedgerKey::index("B", "F", "da", "k"), &range));
        assert!(!in_range(&LedgerKey::index("B", "G", "c", "k"), &range));
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }
}
