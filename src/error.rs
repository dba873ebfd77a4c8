pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    StoreClosed,
    SnapshotUnavailable(String),
    SnapshotClosed,
    Corruption(String),
    InvalidOperation(String),
    InvalidState(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::StoreClosed => write!(f, "Store is closed"),
            Error::SnapshotUnavailable(msg) => write!(f, "Snapshot unavailable: {}", msg),
            Error::SnapshotClosed => write!(f, "Snapshot already closed"),
            Error::Corruption(msg) => write!(f, "Corrupted ledger read: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
