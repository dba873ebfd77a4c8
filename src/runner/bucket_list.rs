//! Bucket enumeration by skip-scan.
//!
//! Instead of visiting every key, each step asks the ledger for the first key
//! at or after a bound. An active hit records its bucket and moves the bound
//! past the whole bucket by appending `0x00` to the bucket name: the encoded
//! bound then sorts after every key of that bucket and before every key of
//! the next one. An inactive hit moves only the key bound, so the next step
//! stays in the same bucket.

use crate::encoding::format::Ledger;
use crate::error::Result;
use crate::ledger::{LedgerKey, Tag, Timestamp};
use crate::store::LedgerSnapshot;

/// Buckets of `tag` with at least one active key, ascending. Stops early once
/// `max_buckets` have been found.
pub fn list_buckets(
    ledger: &dyn LedgerSnapshot,
    tag: Tag,
    now: Timestamp,
    max_buckets: Option<usize>,
) -> Result<Vec<Vec<u8>>> {
    let end = LedgerKey::object_bound(tag, None, None);
    let mut buckets: Vec<Vec<u8>> = Vec::new();
    let mut bucket_bound: Option<Vec<u8>> = None;
    let mut key_bound: Option<Vec<u8>> = None;

    while max_buckets.map_or(true, |max| buckets.len() < max) {
        let start = LedgerKey::object_bound(tag, bucket_bound.as_deref(), key_bound.as_deref());
        let Some((key, value)) = ledger.next_key(&start, &end)? else {
            break;
        };

        let (bucket, object) = match (&key, key.bucket_and_key()) {
            (LedgerKey::Object { tag: found, .. }, Some(parts)) if *found == tag => parts,
            _ => {
                tracing::warn!(
                    key = %Ledger::ledger_key(&key),
                    ?tag,
                    found = buckets.len(),
                    "Unexpected key while listing buckets, stopping"
                );
                break;
            }
        };

        if value.is_active(now) {
            buckets.push(bucket.to_vec());
            bucket_bound = Some(past(bucket));
            key_bound = None;
        } else {
            bucket_bound = Some(bucket.to_vec());
            key_bound = Some(past(object));
        }
    }

    Ok(buckets)
}

fn past(component: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(component.len() + 1);
    next.extend_from_slice(component);
    next.push(0x00);
    next
}
