//! In-memory ledger and journal backed by concurrent skip lists.
//!
//! [`MemoryStore`] is a reference implementation of [`SnapshotProvider`]:
//! the ledger maps encoded [`LedgerKey`]s to bincode [`LedgerValue`]s and the
//! journal maps `(sqn, key)` to object bodies. A snapshot copies both maps
//! under an exclusive lock, so it sees every completed write and none of the
//! in-flight ones. Every snapshot open and close is counted, which lets tests
//! assert that queries release what they acquire.

use std::ops::Bound;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crossbeam_skiplist::SkipMap;

use super::{
    filter::RangeFilter, JournalSnapshot, KeyCheck, LedgerIter, LedgerSnapshot, Snapshot,
    SnapshotProvider, SnapshotScope,
};
use crate::encoding::{bincode, keycode::encode_range, Key};
use crate::error::{Error, Result};
use crate::hasher::content_hash;
use crate::ledger::{self, JournalKey, LedgerKey, LedgerValue, Status, Tag, Timestamp};
use crate::tictac::SegmentFilter;

/// Snapshot open/close counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub ledger_opened: usize,
    pub ledger_closed: usize,
    pub journal_opened: usize,
    pub journal_closed: usize,
}

impl SnapshotStats {
    /// Snapshots acquired but not yet released.
    pub fn open(&self) -> usize {
        self.ledger_opened.saturating_sub(self.ledger_closed)
            + self.journal_opened.saturating_sub(self.journal_closed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    ledger_opened: AtomicUsize,
    ledger_closed: AtomicUsize,
    journal_opened: AtomicUsize,
    journal_closed: AtomicUsize,
}

/// Optional attributes of a write.
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    pub metadata: Vec<u8>,
    pub expires: Option<Timestamp>,
    /// Defaults to the current time when `None`.
    pub last_modified: Option<Timestamp>,
    /// `(field, term)` index entries pointing at this object.
    pub indexes: Vec<(Vec<u8>, Vec<u8>)>,
}

pub struct MemoryStore {
    ledger: SkipMap<Vec<u8>, Vec<u8>>,
    journal: SkipMap<Vec<u8>, Vec<u8>>,
    next_sqn: AtomicU64,
    closed: AtomicBool,
    // Writers share, snapshots exclude.
    snapshot_lock: RwLock<()>,
    counters: Arc<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            ledger: SkipMap::new(),
            journal: SkipMap::new(),
            next_sqn: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            snapshot_lock: RwLock::new(()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Stores an object with default attributes. Returns its sequence number.
    pub fn put(&self, tag: Tag, bucket: &[u8], key: &[u8], object: Vec<u8>) -> Result<u64> {
        self.put_object(tag, bucket, key, object, ObjectMeta::default())
    }

    /// Stores an object that stops being active after `expires`.
    pub fn put_with_ttl(
        &self,
        tag: Tag,
        bucket: &[u8],
        key: &[u8],
        object: Vec<u8>,
        expires: Timestamp,
    ) -> Result<u64> {
        let meta = ObjectMeta {
            expires: Some(expires),
            ..Default::default()
        };
        self.put_object(tag, bucket, key, object, meta)
    }

    /// Stores a standard object together with its `(field, term)` index
    /// entries, all under one sequence number.
    pub fn put_indexed(
        &self,
        bucket: &[u8],
        key: &[u8],
        object: Vec<u8>,
        indexes: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<u64> {
        let meta = ObjectMeta {
            indexes,
            ..Default::default()
        };
        self.put_object(Tag::Std, bucket, key, object, meta)
    }

    pub fn put_object(
        &self,
        tag: Tag,
        bucket: &[u8],
        key: &[u8],
        object: Vec<u8>,
        meta: ObjectMeta,
    ) -> Result<u64> {
        check_object_tag(tag)?;
        if tag != Tag::Std && !meta.indexes.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "index entries need a {:?} object, got {:?}",
                Tag::Std,
                tag
            )));
        }
        let _write = self.write_guard()?;
        let sqn = self.next_sqn.fetch_add(1, Ordering::SeqCst);
        let ledger_key = LedgerKey::object(tag, bucket, key);
        let value = LedgerValue {
            sqn,
            status: Status::Active {
                expires: meta.expires,
            },
            hash: content_hash(&object),
            size: object.len() as u64,
            last_modified: meta.last_modified.unwrap_or_else(ledger::now),
            metadata: meta.metadata,
        };

        for (field, term) in &meta.indexes {
            let index_value = LedgerValue {
                hash: content_hash(term),
                size: 0,
                metadata: Vec::new(),
                ..value.clone()
            };
            self.ledger.insert(
                LedgerKey::index(bucket, field.as_slice(), term.as_slice(), key).encode(),
                bincode::serialize(&index_value)?,
            );
        }

        self.journal
            .insert(journal_key_bytes(sqn, &ledger_key), object);
        self.ledger
            .insert(ledger_key.encode(), bincode::serialize(&value)?);
        Ok(sqn)
    }

    /// Replaces the ledger entry with a tombstone.
    pub fn delete(&self, tag: Tag, bucket: &[u8], key: &[u8]) -> Result<u64> {
        check_object_tag(tag)?;
        self.tombstone(LedgerKey::object(tag, bucket, key))
    }

    /// Replaces an index entry with a tombstone.
    pub fn remove_index(&self, bucket: &[u8], field: &[u8], term: &[u8], key: &[u8]) -> Result<u64> {
        self.tombstone(LedgerKey::index(bucket, field, term, key))
    }

    fn tombstone(&self, ledger_key: LedgerKey) -> Result<u64> {
        let _write = self.write_guard()?;
        let sqn = self.next_sqn.fetch_add(1, Ordering::SeqCst);
        let value = LedgerValue {
            sqn,
            status: Status::Tombstone,
            hash: 0,
            size: 0,
            last_modified: ledger::now(),
            metadata: Vec::new(),
        };
        self.ledger
            .insert(ledger_key.encode(), bincode::serialize(&value)?);
        Ok(sqn)
    }

    /// Drops every journal entry written with `sqn`, as journal compaction
    /// would. The ledger is left untouched. Returns whether anything was
    /// removed.
    pub fn compact_journal(&self, sqn: u64) -> bool {
        let start = Bound::Included(sqn.to_be_bytes().to_vec());
        let end = match sqn.checked_add(1) {
            Some(next) => Bound::Excluded(next.to_be_bytes().to_vec()),
            None => Bound::Unbounded,
        };
        let doomed: Vec<Vec<u8>> = self
            .journal
            .range((start, end))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &doomed {
            self.journal.remove(key);
        }
        !doomed.is_empty()
    }

    /// Refuses all further writes and snapshots.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SnapshotStats {
        // Closes are read before opens so a concurrent release never shows
        // more closed than opened.
        let ledger_closed = self.counters.ledger_closed.load(Ordering::SeqCst);
        let journal_closed = self.counters.journal_closed.load(Ordering::SeqCst);
        SnapshotStats {
            ledger_opened: self.counters.ledger_opened.load(Ordering::SeqCst),
            ledger_closed,
            journal_opened: self.counters.journal_opened.load(Ordering::SeqCst),
            journal_closed,
        }
    }

    fn write_guard(&self) -> Result<RwLockReadGuard<'_, ()>> {
        if self.is_closed() {
            return Err(Error::StoreClosed);
        }
        self.snapshot_lock
            .read()
            .map_err(|_| Error::InvalidState("snapshot lock poisoned".to_string()))
    }

    fn snapshot_guard(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        if self.is_closed() {
            return Err(Error::StoreClosed);
        }
        self.snapshot_lock
            .write()
            .map_err(|_| Error::InvalidState("snapshot lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_map(map: &SkipMap<Vec<u8>, Vec<u8>>) -> SkipMap<Vec<u8>, Vec<u8>> {
    let copy = SkipMap::new();
    for entry in map.iter() {
        copy.insert(entry.key().clone(), entry.value().clone());
    }
    copy
}

/// Journal entries sort by sequence number first.
fn journal_key_bytes(sqn: u64, key: &LedgerKey) -> Vec<u8> {
    let mut bytes = sqn.to_be_bytes().to_vec();
    bytes.extend_from_slice(&key.encode());
    bytes
}

impl SnapshotProvider for MemoryStore {
    fn snapshot(&self, scope: SnapshotScope) -> Result<Snapshot> {
        let _exclusive = self.snapshot_guard()?;

        let ledger = MemoryLedgerSnapshot {
            data: copy_map(&self.ledger),
            closed: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        };
        self.counters.ledger_opened.fetch_add(1, Ordering::SeqCst);

        let journal = if scope.needs_journal() {
            self.counters.journal_opened.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(MemoryJournalSnapshot {
                data: copy_map(&self.journal),
                closed: AtomicBool::new(false),
                counters: Arc::clone(&self.counters),
            }) as Arc<dyn JournalSnapshot>)
        } else {
            None
        };

        tracing::debug!(
            ledger_entries = ledger.data.len(),
            journal = journal.is_some(),
            "Memory snapshot taken"
        );

        Ok(Snapshot {
            ledger: Box::new(ledger),
            journal,
        })
    }
}

struct MemoryLedgerSnapshot {
    data: SkipMap<Vec<u8>, Vec<u8>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl LedgerSnapshot for MemoryLedgerSnapshot {
    fn scan<'a>(
        &'a self,
        start: &LedgerKey,
        end: &LedgerKey,
        segments: Option<&SegmentFilter>,
    ) -> Result<LedgerIter<'a>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SnapshotClosed);
        }

        let (lower, upper) = encode_range(start, end);
        let raw = self
            .data
            .range((lower.clone(), Bound::Unbounded))
            .map(|entry| (entry.key().clone(), entry.value().clone()));
        Ok(Box::new(RangeFilter::new(
            raw,
            (lower, upper),
            segments.cloned(),
        )))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.ledger_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MemoryJournalSnapshot {
    data: SkipMap<Vec<u8>, Vec<u8>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl MemoryJournalSnapshot {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SnapshotClosed);
        }
        Ok(())
    }
}

impl JournalSnapshot for MemoryJournalSnapshot {
    fn key_check(&self, key: &LedgerKey, sqn: u64) -> Result<KeyCheck> {
        self.ensure_open()?;
        Ok(if self.data.contains_key(&journal_key_bytes(sqn, key)) {
            KeyCheck::Present
        } else {
            KeyCheck::Missing
        })
    }

    fn fetch(&self, key: &JournalKey) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self
            .data
            .get(&journal_key_bytes(key.sqn, &key.key))
            .map(|entry| entry.value().clone()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.journal_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn check_object_tag(tag: Tag) -> Result<()> {
    match tag {
        Tag::Index => Err(Error::InvalidOperation(
            "index entries are written through their object".to_string(),
        )),
        Tag::Head | Tag::Std => Ok(()),
    }
}
