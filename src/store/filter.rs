//! Iterator adapter turning raw encoded entries into a bounded ledger scan.
//!
//! Backends iterate encoded `(key, value)` pairs from the start bound
//! onwards; [`RangeFilter`] decodes them, stops at the end bound and drops
//! keys outside the requested segments.

use crate::encoding::format::{Formatter, Ledger, Raw};
use crate::encoding::{Key, Value};
use crate::error::{Error, Result};
use crate::ledger::{LedgerKey, LedgerValue};
use crate::tictac::SegmentFilter;
use std::ops::{Bound, RangeBounds};

use super::LedgerEntry;

pub struct RangeFilter<I, R>
where
    I: Iterator<Item = (Vec<u8>, Vec<u8>)>,
    R: RangeBounds<Vec<u8>>,
{
    inner: I,
    range: R,
    segments: Option<SegmentFilter>,
    done: bool,
}

impl<I, R> RangeFilter<I, R>
where
    I: Iterator<Item = (Vec<u8>, Vec<u8>)>,
    R: RangeBounds<Vec<u8>>,
{
    /// Create a new range filter that wraps the given iterator.
    pub fn new(inner: I, range: R, segments: Option<SegmentFilter>) -> Self {
        Self {
            inner,
            range,
            segments,
            done: false,
        }
    }

    fn is_key_before_start(&self, key: &[u8]) -> bool {
        match self.range.start_bound() {
            Bound::Included(start) => key < start.as_slice(),
            Bound::Excluded(start) => key <= start.as_slice(),
            Bound::Unbounded => false,
        }
    }

    /// Check if a key is beyond the end bound (used for early termination).
    fn is_key_beyond_end(&self, key: &[u8]) -> bool {
        match self.range.end_bound() {
            Bound::Included(end) => key > end.as_slice(),
            Bound::Excluded(end) => key >= end.as_slice(),
            Bound::Unbounded => false,
        }
    }

    fn decode(key: &[u8], value: &[u8]) -> Result<LedgerEntry> {
        let ledger_key = LedgerKey::decode(key)
            .map_err(|e| Error::Corruption(format!("ledger key {}: {}", Raw::key(key), e)))?;
        let ledger_value = LedgerValue::decode(value)
            .map_err(|e| Error::Corruption(format!("ledger value {}: {}", Ledger::key(key), e)))?;
        Ok((ledger_key, ledger_value))
    }
}

impl<I, R> Iterator for RangeFilter<I, R>
where
    I: Iterator<Item = (Vec<u8>, Vec<u8>)>,
    R: RangeBounds<Vec<u8>>,
{
    type Item = Result<LedgerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let (key, value) = self.inner.next()?;
            if self.is_key_before_start(&key) {
                continue;
            }
            if self.is_key_beyond_end(&key) {
                self.done = true;
                return None;
            }

            let entry = match Self::decode(&key, &value) {
                Ok(entry) => entry,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if let Some(segments) = &self.segments {
                match entry.0.bucket_and_key() {
                    Some((bucket, key)) if segments.matches(bucket, key) => {}
                    _ => continue,
                }
            }
            return Some(Ok(entry));
        }
        None
    }
}
