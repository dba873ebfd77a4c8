//! Deferred, snapshot-isolated queries.
//!
//! [`QueryRunner`] turns a query description into a [`Runner`]: a one-shot
//! job that, when invoked, takes a snapshot, folds one bounded ledger range
//! through an [`Accumulator`] and releases the snapshot again. Building a
//! runner touches no storage; everything it needs (bounds, fold, `now`) is
//! captured by value.

pub mod accumulator;
pub mod bucket_list;
pub mod proxy;

use std::sync::Arc;
use std::time::Instant;

use regex::bytes::Regex;

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::ledger::{self, LedgerKey, Tag, Timestamp};
use crate::store::{range_fold, SnapshotGuard, SnapshotProvider, SnapshotScope};
use crate::tictac::{SegmentFilter, TicTacTree, TreeSize};

pub use accumulator::{
    Accumulator, FetchPolicy, FilterAction, FoldContext, IndexEntry, JournalCheck, LastModRange,
    PresenceSampler, SizeStats, TreeFilter,
};
pub use proxy::{ObjectValue, ProxyObject};

/// `(bucket, key, hash)` of one object.
pub type KeyHash = (Vec<u8>, Vec<u8>, u32);

pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// A query that has been built but not run.
pub struct Runner<T> {
    name: &'static str,
    job: Box<dyn FnOnce() -> Result<T> + Send>,
}

impl<T: Send + 'static> Runner<T> {
    pub fn new<F>(name: &'static str, job: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self {
            name,
            job: Box::new(job),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the query on the current thread.
    pub fn run(self) -> Result<T> {
        let start = Instant::now();
        let result = (self.job)();
        tracing::debug!(
            query = self.name,
            elapsed_us = start.elapsed().as_micros() as u64,
            ok = result.is_ok(),
            "Query finished"
        );
        result
    }

    /// Runs the query on tokio's blocking pool.
    pub async fn spawn(self) -> Result<T> {
        let name = self.name;
        tokio::task::spawn_blocking(move || self.run())
            .await
            .map_err(|e| Error::InvalidState(format!("Query {} join error: {}", name, e)))?
    }

    /// Transforms the result once the query has run.
    pub fn map<U, F>(self, f: F) -> Runner<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let Runner { name, job } = self;
        Runner::new(name, move || job().map(f))
    }
}

impl<T> std::fmt::Debug for Runner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").field("name", &self.name).finish()
    }
}

/// Inclusive object key bounds within a bucket. `None` leaves a side open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    fn bounds(&self, tag: Tag, bucket: Option<&[u8]>) -> (LedgerKey, LedgerKey) {
        // Key bounds are meaningless without a bucket.
        let (start, end) = match bucket {
            Some(_) => (self.start.as_deref(), self.end.as_deref()),
            None => (None, None),
        };
        (
            LedgerKey::object_bound(tag, bucket, start),
            LedgerKey::object_bound(tag, bucket, end),
        )
    }
}

/// Terms `from..=to` of one index field in one bucket.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub bucket: Vec<u8>,
    pub field: Vec<u8>,
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    /// Only terms matching this expression are returned.
    pub term_regex: Option<Regex>,
    /// Return `(term, key)` pairs instead of keys.
    pub return_terms: bool,
}

impl IndexQuery {
    pub fn new(
        bucket: impl Into<Vec<u8>>,
        field: impl Into<Vec<u8>>,
        from: impl Into<Vec<u8>>,
        to: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            field: field.into(),
            from: from.into(),
            to: to.into(),
            term_regex: None,
            return_terms: false,
        }
    }

    pub fn term_regex(mut self, regex: Regex) -> Self {
        self.term_regex = Some(regex);
        self
    }

    pub fn return_terms(mut self, return_terms: bool) -> Self {
        self.return_terms = return_terms;
        self
    }

    fn bounds(&self) -> (LedgerKey, LedgerKey) {
        index_bounds(&self.bucket, &self.field, &self.from, &self.to)
    }
}

fn index_bounds(bucket: &[u8], field: &[u8], from: &[u8], to: &[u8]) -> (LedgerKey, LedgerKey) {
    (
        LedgerKey::index_bound(Some(bucket), Some(field), Some(from), None),
        LedgerKey::index_bound(Some(bucket), Some(field), Some(to), None),
    )
}

/// Range a tic-tac tree is built over.
#[derive(Debug, Clone)]
pub enum TreeQuery {
    /// Object keys of a tag, optionally restricted to one bucket.
    Objects {
        tag: Tag,
        bucket: Option<Vec<u8>>,
        range: KeyRange,
    },
    /// Index entries `from..=to` of one field; each contributes its object
    /// key with the hash of its term.
    Index {
        bucket: Vec<u8>,
        field: Vec<u8>,
        from: Vec<u8>,
        to: Vec<u8>,
    },
}

impl TreeQuery {
    fn bounds(&self) -> (LedgerKey, LedgerKey) {
        match self {
            TreeQuery::Objects { tag, bucket, range } => range.bounds(*tag, bucket.as_deref()),
            TreeQuery::Index {
                bucket,
                field,
                from,
                to,
            } => index_bounds(bucket, field, from, to),
        }
    }
}

/// Options for head folds.
#[derive(Debug, Clone, Default)]
pub struct HeadOptions {
    /// Skip records whose journal entry has been compacted away.
    pub check_presence: bool,
    /// Only visit keys in these tree segments.
    pub segments: Option<SegmentFilter>,
    /// Only visit records last modified within this range.
    pub last_modified: Option<LastModRange>,
}

impl HeadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_presence(mut self, check: bool) -> Self {
        self.check_presence = check;
        self
    }

    pub fn segments(mut self, segments: SegmentFilter) -> Self {
        self.segments = Some(segments);
        self
    }

    pub fn last_modified(mut self, range: LastModRange) -> Self {
        self.last_modified = Some(range);
        self
    }
}

/// Builds runners against a snapshot provider.
#[derive(Clone)]
pub struct QueryRunner {
    provider: Arc<dyn SnapshotProvider>,
    config: QueryConfig,
    clock: Clock,
}

impl QueryRunner {
    pub fn new(provider: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            provider,
            config: QueryConfig::default(),
            clock: Arc::new(ledger::now),
        }
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the wall clock used to decide whether records have expired.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> Timestamp + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Total size and count of the active objects in a bucket.
    pub fn bucket_sizestats(&self, tag: Tag, bucket: &[u8]) -> Runner<SizeStats> {
        object_query("bucket_sizestats", tag, || {
            let (start, end) = KeyRange::all().bounds(tag, Some(bucket));
            let accumulator = Accumulator::Size(Box::new(|size, stats: SizeStats| stats.add(size)));
            self.range_query("bucket_sizestats", start, end, None, accumulator, SizeStats::default())
        })
    }

    /// Folds the buckets of `tag` holding at least one active object,
    /// ascending.
    pub fn bucket_list<A, F>(
        &self,
        tag: Tag,
        mut fold: F,
        init: A,
        max_buckets: Option<usize>,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], A) -> A + Send + 'static,
    {
        object_query("bucket_list", tag, || {
            let provider = Arc::clone(&self.provider);
            let now = (self.clock)();
            Runner::new("bucket_list", move || {
                let guard = SnapshotGuard::acquire(provider.as_ref(), SnapshotScope::Ledger)?;
                let buckets = bucket_list::list_buckets(guard.ledger(), tag, now, max_buckets)?;
                Ok(buckets
                    .iter()
                    .fold(init, |acc, bucket| fold(bucket.as_slice(), acc)))
            })
        })
    }

    /// Object keys, or `(term, key)` pairs, of an index term range.
    pub fn index_query<A, F>(&self, query: IndexQuery, fold: F, init: A) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], IndexEntry, A) -> A + Send + 'static,
    {
        let (start, end) = query.bounds();
        let accumulator = Accumulator::IndexTerms {
            term_regex: query.term_regex,
            return_terms: query.return_terms,
            fold: Box::new(fold),
        };
        self.range_query("index_query", start, end, None, accumulator, init)
    }

    /// Active object keys of a tag, optionally within one bucket and key
    /// range, optionally filtered by a key expression.
    pub fn bucketkey_query<A, F>(
        &self,
        tag: Tag,
        bucket: Option<&[u8]>,
        range: KeyRange,
        key_regex: Option<Regex>,
        fold: F,
        init: A,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], A) -> A + Send + 'static,
    {
        object_query("bucketkey_query", tag, || {
            let (start, end) = range.bounds(tag, bucket);
            let accumulator = Accumulator::Keys {
                key_regex,
                fold: Box::new(fold),
            };
            self.range_query("bucketkey_query", start, end, None, accumulator, init)
        })
    }

    /// `(bucket, key, hash)` of every active object of a tag, in key order.
    pub fn hashlist_query(&self, tag: Tag, check_presence: bool) -> Runner<Vec<KeyHash>> {
        object_query("hashlist_query", tag, || {
            let (start, end) = KeyRange::all().bounds(tag, None);
            let accumulator = Accumulator::Hashes {
                check: self.journal_check(check_presence),
                fold: Box::new(|bucket, key, hash, mut list: Vec<KeyHash>| {
                    list.push((bucket.to_vec(), key.to_vec(), hash));
                    list
                }),
            };
            self.range_query("hashlist_query", start, end, None, accumulator, Vec::new())
        })
    }

    /// Builds a tic-tac tree over a range. `size` defaults to the configured
    /// tree size; `filter` may exclude keys before they are added.
    pub fn tictactree(
        &self,
        query: TreeQuery,
        check_presence: bool,
        size: Option<TreeSize>,
        filter: Option<TreeFilter>,
    ) -> Runner<TicTacTree> {
        if let TreeQuery::Objects { tag, .. } = query {
            if tag == Tag::Index {
                return rejected("tictactree", tag);
            }
        }
        let (start, end) = query.bounds();
        let size = size.unwrap_or(self.config.tree_size);
        let accumulator = Accumulator::Tree {
            check: self.journal_check(check_presence),
            filter,
            fold: Box::new(|bucket, key, hash, mut tree: TicTacTree| {
                tree.add(bucket, key, hash);
                tree
            }),
        };
        self.range_query("tictactree", start, end, None, accumulator, TicTacTree::new(size))
    }

    /// Folds proxies for every active object of a tag.
    pub fn foldheads_allkeys<A, F>(&self, tag: Tag, fold: F, init: A, options: HeadOptions) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        object_query("foldheads_allkeys", tag, || {
            let (start, end) = KeyRange::all().bounds(tag, None);
            self.fold_heads("foldheads_allkeys", start, end, fold, init, options)
        })
    }

    /// Folds proxies for the active objects of one bucket and key range.
    pub fn foldheads_bybucket<A, F>(
        &self,
        tag: Tag,
        bucket: &[u8],
        range: KeyRange,
        fold: F,
        init: A,
        options: HeadOptions,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        object_query("foldheads_bybucket", tag, || {
            let (start, end) = range.bounds(tag, Some(bucket));
            self.fold_heads("foldheads_bybucket", start, end, fold, init, options)
        })
    }

    /// Folds the bodies of every active object of a tag.
    pub fn foldobjects_allkeys<A, F>(&self, tag: Tag, fold: F, init: A) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        object_query("foldobjects_allkeys", tag, || {
            let (start, end) = KeyRange::all().bounds(tag, None);
            self.fold_objects(
                "foldobjects_allkeys",
                start,
                end,
                None,
                FetchPolicy::Eager,
                None,
                fold,
                init,
            )
        })
    }

    /// Folds the bodies of the active objects of one bucket and key range.
    pub fn foldobjects_bybucket<A, F>(
        &self,
        tag: Tag,
        bucket: &[u8],
        range: KeyRange,
        fold: F,
        init: A,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        object_query("foldobjects_bybucket", tag, || {
            let (start, end) = range.bounds(tag, Some(bucket));
            self.fold_objects(
                "foldobjects_bybucket",
                start,
                end,
                None,
                FetchPolicy::Eager,
                None,
                fold,
                init,
            )
        })
    }

    /// Folds the bodies of the objects referenced by an index term range.
    /// An object indexed under several terms is visited once per term.
    pub fn foldobjects_byindex<A, F>(
        &self,
        bucket: &[u8],
        field: &[u8],
        from: &[u8],
        to: &[u8],
        fold: F,
        init: A,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        let (start, end) = index_bounds(bucket, field, from, to);
        self.fold_objects(
            "foldobjects_byindex",
            start,
            end,
            None,
            FetchPolicy::Eager,
            None,
            fold,
            init,
        )
    }

    /// Runs any accumulator over `[start, end]`.
    pub fn range_query<A>(
        &self,
        name: &'static str,
        start: LedgerKey,
        end: LedgerKey,
        segments: Option<SegmentFilter>,
        mut accumulator: Accumulator<A>,
        init: A,
    ) -> Runner<A>
    where
        A: Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let now = (self.clock)();
        Runner::new(name, move || {
            let scope = accumulator.scope();
            tracing::debug!(query = name, kind = accumulator.kind(), ?scope, "Folding range");
            let guard = SnapshotGuard::acquire(provider.as_ref(), scope)?;
            let ctx = FoldContext {
                now,
                journal: guard.journal(),
            };
            let acc = range_fold(
                guard.ledger(),
                &start,
                &end,
                segments.as_ref(),
                init,
                |acc, key, value| accumulator.apply(&ctx, key, value, acc),
            )?;
            Ok(acc)
        })
    }

    fn fold_heads<A, F>(
        &self,
        name: &'static str,
        start: LedgerKey,
        end: LedgerKey,
        fold: F,
        init: A,
        options: HeadOptions,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        let fetch = FetchPolicy::Deferred {
            check_presence: options.check_presence,
        };
        self.fold_objects(
            name,
            start,
            end,
            options.segments,
            fetch,
            options.last_modified,
            fold,
            init,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn fold_objects<A, F>(
        &self,
        name: &'static str,
        start: LedgerKey,
        end: LedgerKey,
        segments: Option<SegmentFilter>,
        fetch: FetchPolicy,
        last_modified: Option<LastModRange>,
        fold: F,
        init: A,
    ) -> Runner<A>
    where
        A: Send + 'static,
        F: FnMut(&[u8], &[u8], ObjectValue, A) -> A + Send + 'static,
    {
        let accumulator = Accumulator::Objects {
            fetch,
            last_modified,
            fold: Box::new(fold),
        };
        self.range_query(name, start, end, segments, accumulator, init)
    }

    /// A sampler that can never pick a record needs no journal.
    fn journal_check(&self, check_presence: bool) -> JournalCheck {
        if !check_presence {
            return JournalCheck::Skip;
        }
        let sampler = PresenceSampler::from_config(&self.config);
        if sampler.probability() > 0.0 {
            JournalCheck::Sample(sampler)
        } else {
            JournalCheck::Skip
        }
    }
}

/// Builds an object-key query, or a runner that fails with
/// `InvalidOperation` when `tag` names index entries.
fn object_query<A, B>(name: &'static str, tag: Tag, build: B) -> Runner<A>
where
    A: Send + 'static,
    B: FnOnce() -> Runner<A>,
{
    match tag {
        Tag::Index => rejected(name, tag),
        Tag::Head | Tag::Std => build(),
    }
}

fn rejected<A: Send + 'static>(name: &'static str, tag: Tag) -> Runner<A> {
    Runner::new(name, move || {
        Err(Error::InvalidOperation(format!(
            "{} folds object keys, not {:?} entries",
            name, tag
        )))
    })
}
