pub mod bincode;
pub mod format;
pub mod keycode;

use crate::error::Result;

/// Order-preserving byte encoding.
///
/// Encoded keys sort exactly like the decoded keys, so a range scan over the
/// encoded form visits records in ledger order.
pub trait Key {
    fn encode(&self) -> Vec<u8>;

    /// Inverse of `encode`.
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Byte encoding for ledger values, which carry no ordering requirement.
pub trait Value {
    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Failure to decode a stored key or value.
#[derive(Debug)]
pub enum EncodingError {
    InvalidFormat(String),
    UnknownTag(u8),
    TruncatedData,
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid encoding format: {}", msg),
            EncodingError::UnknownTag(tag) => write!(f, "Unknown ledger tag: {:#04x}", tag),
            EncodingError::TruncatedData => write!(f, "Truncated data"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for crate::Error {
    fn from(err: EncodingError) -> Self {
        crate::Error::InvalidOperation(err.to_string())
    }
}
