//! Interfaces to the ledger and journal snapshots that queries run against.
//!
//! The query core owns no storage. A [`SnapshotProvider`] hands out a
//! point-in-time [`Snapshot`]: a ledger view (the sorted index of key
//! metadata) and, when the query needs object bodies or presence checks, a
//! journal view. [`SnapshotGuard`] closes both sides exactly once when it is
//! dropped, whichever way the query exits.

pub mod filter;
pub mod memory;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ledger::{JournalKey, LedgerKey, LedgerValue};
use crate::tictac::SegmentFilter;

pub type LedgerEntry = (LedgerKey, LedgerValue);

/// Iterator over ledger entries in ascending key order.
pub type LedgerIter<'a> = Box<dyn Iterator<Item = Result<LedgerEntry>> + 'a>;

/// Which snapshots a query needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    Ledger,
    LedgerAndJournal,
}

impl SnapshotScope {
    pub fn needs_journal(self) -> bool {
        self == SnapshotScope::LedgerAndJournal
    }
}

/// Read-only, point-in-time view of the ledger.
pub trait LedgerSnapshot: Send + Sync {
    /// Entries between `start` and `end` (see [`LedgerKey`] for wildcard
    /// bounds), optionally restricted to keys in the given segments.
    fn scan<'a>(
        &'a self,
        start: &LedgerKey,
        end: &LedgerKey,
        segments: Option<&SegmentFilter>,
    ) -> Result<LedgerIter<'a>>;

    /// The first entry at or after `start` and within `end`.
    fn next_key(&self, start: &LedgerKey, end: &LedgerKey) -> Result<Option<LedgerEntry>> {
        self.scan(start, end, None)?.next().transpose()
    }

    /// Releases the snapshot. Reads after close fail with `SnapshotClosed`.
    fn close(&self);
}

/// Result of asking the journal whether an object is still stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Present,
    Missing,
}

/// Read-only, point-in-time view of the journal.
pub trait JournalSnapshot: Send + Sync {
    fn key_check(&self, key: &LedgerKey, sqn: u64) -> Result<KeyCheck>;

    fn fetch(&self, key: &JournalKey) -> Result<Option<Vec<u8>>>;

    fn close(&self);
}

pub struct Snapshot {
    pub ledger: Box<dyn LedgerSnapshot>,
    pub journal: Option<Arc<dyn JournalSnapshot>>,
}

/// Source of consistent snapshots, typically the store itself.
pub trait SnapshotProvider: Send + Sync {
    /// Fails with `StoreClosed` once the store has shut down.
    fn snapshot(&self, scope: SnapshotScope) -> Result<Snapshot>;
}

/// Owns an acquired snapshot pair and closes it on drop.
pub struct SnapshotGuard {
    ledger: Box<dyn LedgerSnapshot>,
    journal: Option<Arc<dyn JournalSnapshot>>,
}

impl SnapshotGuard {
    pub fn acquire(provider: &dyn SnapshotProvider, scope: SnapshotScope) -> Result<Self> {
        let Snapshot { ledger, journal } = provider.snapshot(scope)?;
        let guard = Self { ledger, journal };
        tracing::debug!(?scope, journal = guard.journal.is_some(), "Snapshot acquired");

        if scope.needs_journal() && guard.journal.is_none() {
            return Err(Error::SnapshotUnavailable(
                "provider returned no journal snapshot".to_string(),
            ));
        }
        Ok(guard)
    }

    pub fn ledger(&self) -> &dyn LedgerSnapshot {
        self.ledger.as_ref()
    }

    pub fn journal(&self) -> Option<&Arc<dyn JournalSnapshot>> {
        self.journal.as_ref()
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.ledger.close();
        if let Some(journal) = self.journal.take() {
            journal.close();
        }
        tracing::debug!("Snapshot released");
    }
}

/// Fetches an object body from the journal; `None` once it has been
/// compacted away.
pub fn fetch_value(journal: &dyn JournalSnapshot, key: &JournalKey) -> Result<Option<Vec<u8>>> {
    journal.fetch(key)
}

/// Folds every entry of a bounded scan into an accumulator, in key order.
pub fn range_fold<A, F>(
    ledger: &dyn LedgerSnapshot,
    start: &LedgerKey,
    end: &LedgerKey,
    segments: Option<&SegmentFilter>,
    init: A,
    mut fold: F,
) -> Result<A>
where
    F: FnMut(A, LedgerKey, LedgerValue) -> Result<A>,
{
    let mut acc = init;
    for entry in ledger.scan(start, end, segments)? {
        let (key, value) = entry?;
        acc = fold(acc, key, value)?;
    }
    Ok(acc)
}
