//! Stand-ins for object bodies that have not been read from the journal.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::ledger::JournalKey;
use crate::store::{fetch_value, JournalSnapshot};

/// Metadata of an object plus the means to fetch its body later.
///
/// The fetcher holds the journal snapshot of the runner that produced it.
/// Once that runner has returned the snapshot is closed and `fetch` fails
/// with `SnapshotClosed`, so bodies must be fetched inside the fold.
#[derive(Clone)]
pub struct ProxyObject {
    pub metadata: Vec<u8>,
    pub size: u64,
    journal: Arc<dyn JournalSnapshot>,
    location: JournalKey,
}

impl ProxyObject {
    pub(crate) fn new(
        metadata: Vec<u8>,
        size: u64,
        journal: Arc<dyn JournalSnapshot>,
        location: JournalKey,
    ) -> Self {
        Self {
            metadata,
            size,
            journal,
            location,
        }
    }

    /// Reads the body. `None` if the journal no longer holds it.
    pub fn fetch(&self) -> Result<Option<Vec<u8>>> {
        fetch_value(self.journal.as_ref(), &self.location)
    }
}

impl fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyObject")
            .field("metadata", &self.metadata)
            .field("size", &self.size)
            .field("sqn", &self.location.sqn)
            .finish()
    }
}

/// What an object fold receives for each record.
#[derive(Debug, Clone)]
pub enum ObjectValue {
    Full(Vec<u8>),
    Proxy(ProxyObject),
}

impl ObjectValue {
    pub fn as_full(&self) -> Option<&[u8]> {
        match self {
            ObjectValue::Full(body) => Some(body),
            ObjectValue::Proxy(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyObject> {
        match self {
            ObjectValue::Full(_) => None,
            ObjectValue::Proxy(proxy) => Some(proxy),
        }
    }
}
