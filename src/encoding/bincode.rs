use super::{EncodingError, Value};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| EncodingError::InvalidFormat(format!("Serialization failed: {}", e)).into())
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| EncodingError::InvalidFormat(format!("Deserialization failed: {}", e)).into())
}

// Plain data structs never fail to serialize; a failure encodes as empty.
impl<T> Value for T
where
    T: Serialize + for<'a> Deserialize<'a>,
{
    fn encode(&self) -> Vec<u8> {
        serialize(self).unwrap_or_default()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}
