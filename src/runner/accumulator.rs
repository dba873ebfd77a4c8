//! Per-record fold logic for each query kind.
//!
//! An [`Accumulator`] is built once per query and applied to every ledger
//! entry of the scan, in key order. Inactive records (tombstoned or expired
//! at the runner's `now`) never reach the caller's fold. Records that have
//! been compacted out of the journal are skipped by the kinds that look at
//! the journal. A key of the wrong shape for the fold is a corrupted read and
//! aborts the query.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use regex::bytes::Regex;

use super::proxy::{ObjectValue, ProxyObject};
use crate::config::QueryConfig;
use crate::encoding::format::Ledger;
use crate::error::{Error, Result};
use crate::ledger::{self, LedgerKey, LedgerValue, Timestamp};
use crate::store::{fetch_value, JournalSnapshot, KeyCheck, SnapshotScope};

/// Total size and number of active records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeStats {
    pub size: u64,
    pub count: u64,
}

impl SizeStats {
    pub fn add(self, size: u64) -> Self {
        Self {
            size: self.size + size,
            count: self.count + 1,
        }
    }
}

/// Output shape of an index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEntry {
    /// The object key alone.
    Key(Vec<u8>),
    /// `(term, object key)`.
    Term(Vec<u8>, Vec<u8>),
}

/// Verdict of a tree filter on a `(bucket, key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Accumulate,
    Pass,
}

pub type SizeFold<A> = Box<dyn FnMut(u64, A) -> A + Send>;
pub type KeyFold<A> = Box<dyn FnMut(&[u8], &[u8], A) -> A + Send>;
pub type IndexFold<A> = Box<dyn FnMut(&[u8], IndexEntry, A) -> A + Send>;
pub type HashFold<A> = Box<dyn FnMut(&[u8], &[u8], u32, A) -> A + Send>;
pub type ObjectFold<A> = Box<dyn FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send>;
pub type TreeFilter = Box<dyn FnMut(&[u8], &[u8]) -> FilterAction + Send>;

/// Decides, record by record, whether to confirm journal presence.
pub struct PresenceSampler {
    probability: f64,
    rng: Box<dyn RngCore + Send>,
}

impl PresenceSampler {
    pub fn new(probability: f64, rng: impl RngCore + Send + 'static) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self {
            probability,
            rng: Box::new(rng),
        }
    }

    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self::new(probability, StdRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        let rng = match config.sampler_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config.journal_check_probability, rng)
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn sample(&mut self) -> bool {
        self.rng.gen_bool(self.probability)
    }
}

/// Journal presence checking for hash and tree folds.
pub enum JournalCheck {
    Skip,
    Sample(PresenceSampler),
}

impl JournalCheck {
    pub fn needs_journal(&self) -> bool {
        matches!(self, JournalCheck::Sample(_))
    }

    fn confirm(&mut self, ctx: &FoldContext<'_>, key: &LedgerKey, value: &LedgerValue) -> Result<bool> {
        match self {
            JournalCheck::Skip => Ok(true),
            JournalCheck::Sample(sampler) => {
                if !sampler.sample() {
                    return Ok(true);
                }
                let location = ledger::journal_key(key, value).ok_or_else(|| malformed(key))?;
                let check = ctx.journal()?.key_check(&location.key, location.sqn)?;
                Ok(check == KeyCheck::Present)
            }
        }
    }
}

/// Inclusive range of last-modified times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastModRange {
    pub low: Timestamp,
    pub high: Timestamp,
}

impl LastModRange {
    pub fn new(low: Timestamp, high: Timestamp) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.low <= ts && ts <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Read every body from the journal, skipping compacted ones.
    Eager,
    /// Hand out proxies; with `check_presence`, skip records already
    /// compacted out of the journal.
    Deferred { check_presence: bool },
}

/// What an accumulator may consult besides the record itself.
pub struct FoldContext<'a> {
    pub now: Timestamp,
    pub journal: Option<&'a Arc<dyn JournalSnapshot>>,
}

impl<'a> FoldContext<'a> {
    fn journal(&self) -> Result<&'a Arc<dyn JournalSnapshot>> {
        self.journal
            .ok_or_else(|| Error::InvalidState("fold requires a journal snapshot".to_string()))
    }
}

pub enum Accumulator<A> {
    Size(SizeFold<A>),
    Keys {
        key_regex: Option<Regex>,
        fold: KeyFold<A>,
    },
    IndexTerms {
        term_regex: Option<Regex>,
        return_terms: bool,
        fold: IndexFold<A>,
    },
    Hashes {
        check: JournalCheck,
        fold: HashFold<A>,
    },
    Tree {
        check: JournalCheck,
        filter: Option<TreeFilter>,
        fold: HashFold<A>,
    },
    Objects {
        fetch: FetchPolicy,
        last_modified: Option<LastModRange>,
        fold: ObjectFold<A>,
    },
}

impl<A> Accumulator<A> {
    pub fn kind(&self) -> &'static str {
        match self {
            Accumulator::Size(_) => "size",
            Accumulator::Keys { .. } => "keys",
            Accumulator::IndexTerms { .. } => "index_terms",
            Accumulator::Hashes { .. } => "hashes",
            Accumulator::Tree { .. } => "tree",
            Accumulator::Objects { .. } => "objects",
        }
    }

    /// Snapshots the fold reads from.
    pub fn scope(&self) -> SnapshotScope {
        let journal = match self {
            Accumulator::Size(_) | Accumulator::Keys { .. } | Accumulator::IndexTerms { .. } => {
                false
            }
            Accumulator::Hashes { check, .. } | Accumulator::Tree { check, .. } => {
                check.needs_journal()
            }
            Accumulator::Objects { .. } => true,
        };
        if journal {
            SnapshotScope::LedgerAndJournal
        } else {
            SnapshotScope::Ledger
        }
    }

    pub fn apply(
        &mut self,
        ctx: &FoldContext<'_>,
        key: LedgerKey,
        value: LedgerValue,
        acc: A,
    ) -> Result<A> {
        if !value.is_active(ctx.now) {
            return Ok(acc);
        }

        match self {
            Accumulator::Size(fold) => Ok(fold(value.size(), acc)),

            Accumulator::Keys { key_regex, fold } => {
                let (bucket, object) = object_parts(&key)?;
                if let Some(regex) = key_regex {
                    if !regex.is_match(object) {
                        return Ok(acc);
                    }
                }
                Ok(fold(bucket, object, acc))
            }

            Accumulator::IndexTerms {
                term_regex,
                return_terms,
                fold,
            } => {
                let (bucket, _field, term, object) =
                    key.index_parts().ok_or_else(|| malformed(&key))?;
                if let Some(regex) = term_regex {
                    if !regex.is_match(term) {
                        return Ok(acc);
                    }
                }
                let entry = if *return_terms {
                    IndexEntry::Term(term.to_vec(), object.to_vec())
                } else {
                    IndexEntry::Key(object.to_vec())
                };
                Ok(fold(bucket, entry, acc))
            }

            Accumulator::Hashes { check, fold } => {
                let (bucket, object, hash) =
                    ledger::key_and_hash(&key, &value).ok_or_else(|| malformed(&key))?;
                if !check.confirm(ctx, &key, &value)? {
                    return Ok(acc);
                }
                Ok(fold(bucket.as_slice(), object.as_slice(), hash, acc))
            }

            Accumulator::Tree {
                check,
                filter,
                fold,
            } => {
                let (bucket, object, hash) =
                    ledger::key_and_hash(&key, &value).ok_or_else(|| malformed(&key))?;
                if let Some(filter) = filter {
                    if filter(bucket.as_slice(), object.as_slice()) == FilterAction::Pass {
                        return Ok(acc);
                    }
                }
                if !check.confirm(ctx, &key, &value)? {
                    return Ok(acc);
                }
                Ok(fold(bucket.as_slice(), object.as_slice(), hash, acc))
            }

            Accumulator::Objects {
                fetch,
                last_modified,
                fold,
            } => {
                if let Some(range) = last_modified {
                    if !range.contains(value.last_modified) {
                        return Ok(acc);
                    }
                }
                let (bucket, object) = key.bucket_and_key().ok_or_else(|| malformed(&key))?;
                let location = ledger::journal_key(&key, &value).ok_or_else(|| malformed(&key))?;
                let journal = ctx.journal()?;

                let body = match fetch {
                    FetchPolicy::Eager => match fetch_value(journal.as_ref(), &location)? {
                        Some(body) => ObjectValue::Full(body),
                        None => return Ok(acc),
                    },
                    FetchPolicy::Deferred { check_presence } => {
                        if *check_presence
                            && journal.key_check(&location.key, location.sqn)? == KeyCheck::Missing
                        {
                            return Ok(acc);
                        }
                        ObjectValue::Proxy(ProxyObject::new(
                            value.metadata.clone(),
                            value.size,
                            Arc::clone(journal),
                            location,
                        ))
                    }
                };
                Ok(fold(bucket, object, body, acc))
            }
        }
    }
}

fn object_parts(key: &LedgerKey) -> Result<(&[u8], &[u8])> {
    match key {
        LedgerKey::Object { .. } => key.bucket_and_key().ok_or_else(|| malformed(key)),
        LedgerKey::Index { .. } => Err(malformed(key)),
    }
}

fn malformed(key: &LedgerKey) -> Error {
    Error::Corruption(format!("unexpected key {}", Ledger::ledger_key(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Status, Tag};
    use crate::store::memory::MemoryStore;
    use crate::store::SnapshotProvider;

    fn value(sqn: u64, status: Status) -> LedgerValue {
        LedgerValue {
            sqn,
            status,
            hash: 7,
            size: 10,
            last_modified: 50,
            metadata: b"meta".to_vec(),
        }
    }

    fn active(sqn: u64) -> LedgerValue {
        value(sqn, Status::Active { expires: None })
    }

    fn ctx(now: Timestamp) -> FoldContext<'static> {
        FoldContext { now, journal: None }
    }

    #[test]
    fn test_size_skips_inactive() -> Result<()> {
        let mut acc = Accumulator::Size(Box::new(|size, stats: SizeStats| stats.add(size)));
        let key = || LedgerKey::object(Tag::Std, "b", "k");

        let stats = acc.apply(&ctx(100), key(), active(1), SizeStats::default())?;
        let stats = acc.apply(&ctx(100), key(), value(2, Status::Tombstone), stats)?;
        let stats = acc.apply(&ctx(100), key(), value(3, Status::Active { expires: Some(99) }), stats)?;
        let stats = acc.apply(&ctx(100), key(), value(4, Status::Active { expires: Some(100) }), stats)?;

        assert_eq!(stats, SizeStats { size: 20, count: 2 });
        assert_eq!(acc.scope(), SnapshotScope::Ledger);
        Ok(())
    }

    #[test]
    fn test_keys_regex_and_wrong_shape() -> Result<()> {
        let mut acc = Accumulator::Keys {
            key_regex: Some(Regex::new("^k[0-9]$").unwrap()),
            fold: Box::new(|_, key, mut keys: Vec<Vec<u8>>| {
                keys.push(key.to_vec());
                keys
            }),
        };

        let keys = acc.apply(&ctx(0), LedgerKey::object(Tag::Std, "b", "k1"), active(1), Vec::new())?;
        let keys = acc.apply(&ctx(0), LedgerKey::object(Tag::Std, "b", "x1"), active(2), keys)?;
        assert_eq!(keys, vec![b"k1".to_vec()]);

        let result = acc.apply(&ctx(0), LedgerKey::index("b", "F", "t", "k"), active(3), keys);
        assert!(matches!(result, Err(Error::Corruption(_))));
        Ok(())
    }

    #[test]
    fn test_index_terms_shapes() -> Result<()> {
        let fold = || -> IndexFold<Vec<IndexEntry>> {
            Box::new(|_, entry, mut out: Vec<IndexEntry>| {
                out.push(entry);
                out
            })
        };
        let key = LedgerKey::index("b", "F", "apple", "k1");

        let mut keys_only = Accumulator::IndexTerms {
            term_regex: None,
            return_terms: false,
            fold: fold(),
        };
        let out = keys_only.apply(&ctx(0), key.clone(), active(1), Vec::new())?;
        assert_eq!(out, vec![IndexEntry::Key(b"k1".to_vec())]);

        let mut with_terms = Accumulator::IndexTerms {
            term_regex: Some(Regex::new("^a").unwrap()),
            return_terms: true,
            fold: fold(),
        };
        let out = with_terms.apply(&ctx(0), key, active(1), Vec::new())?;
        let out = with_terms.apply(&ctx(0), LedgerKey::index("b", "F", "pear", "k2"), active(2), out)?;
        assert_eq!(out, vec![IndexEntry::Term(b"apple".to_vec(), b"k1".to_vec())]);
        Ok(())
    }

    #[test]
    fn test_sampler_extremes() {
        let mut always = PresenceSampler::seeded(1.0, 1);
        let mut never = PresenceSampler::seeded(0.0, 1);
        assert!((0..100).all(|_| always.sample()));
        assert!((0..100).all(|_| !never.sample()));
        assert_eq!(PresenceSampler::seeded(3.0, 1).probability(), 1.0);
    }

    #[test]
    fn test_sampler_rate() {
        let mut sampler = PresenceSampler::seeded(0.2, 42);
        let hits = (0..10_000).filter(|_| sampler.sample()).count();
        assert!((1_600..2_400).contains(&hits), "hits: {}", hits);
    }

    #[test]
    fn test_hashes_presence_check() -> Result<()> {
        let store = MemoryStore::new();
        let kept = store.put(Tag::Std, b"b", b"kept", b"v".to_vec())?;
        let gone = store.put(Tag::Std, b"b", b"gone", b"v".to_vec())?;
        store.compact_journal(gone);

        let snapshot = store.snapshot(SnapshotScope::LedgerAndJournal)?;
        let ctx = FoldContext {
            now: 0,
            journal: snapshot.journal.as_ref(),
        };

        let mut acc = Accumulator::Hashes {
            check: JournalCheck::Sample(PresenceSampler::seeded(1.0, 0)),
            fold: Box::new(|_, key, _, mut keys: Vec<Vec<u8>>| {
                keys.push(key.to_vec());
                keys
            }),
        };
        assert_eq!(acc.scope(), SnapshotScope::LedgerAndJournal);

        let keys = acc.apply(&ctx, LedgerKey::object(Tag::Std, "b", "kept"), active(kept), Vec::new())?;
        let keys = acc.apply(&ctx, LedgerKey::object(Tag::Std, "b", "gone"), active(gone), keys)?;
        assert_eq!(keys, vec![b"kept".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_tree_filter() -> Result<()> {
        let mut acc = Accumulator::Tree {
            check: JournalCheck::Skip,
            filter: Some(Box::new(|_, key| {
                if key.starts_with(b"skip") {
                    FilterAction::Pass
                } else {
                    FilterAction::Accumulate
                }
            })),
            fold: Box::new(|_, _, hash, total: u32| total + hash),
        };

        let total = acc.apply(&ctx(0), LedgerKey::object(Tag::Std, "b", "take"), active(1), 0)?;
        let total = acc.apply(&ctx(0), LedgerKey::object(Tag::Std, "b", "skip"), active(2), total)?;
        assert_eq!(total, 7);
        Ok(())
    }

    #[test]
    fn test_objects_need_journal() {
        let mut acc = Accumulator::Objects {
            fetch: FetchPolicy::Eager,
            last_modified: None,
            fold: Box::new(|_, _, _, n: usize| n + 1),
        };
        let result = acc.apply(&ctx(0), LedgerKey::object(Tag::Std, "b", "k"), active(1), 0);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_objects_last_modified() -> Result<()> {
        let mut acc = Accumulator::Objects {
            fetch: FetchPolicy::Eager,
            last_modified: Some(LastModRange::new(60, 70)),
            fold: Box::new(|_, _, _, n: usize| n + 1),
        };
        // Out of range, so the journal is never consulted.
        let n = acc.apply(&ctx(0), LedgerKey::object(Tag::Std, "b", "k"), active(1), 0)?;
        assert_eq!(n, 0);
        Ok(())
    }
}
