//! Serialization protocol for checkpoint payloads
//!
//! Savers that persist history take an explicitly constructed serializer
//! instance; there is no global type-keyed registry.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Pluggable serialization strategy
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Binary serializer using bincode
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::StateData;
    use crate::checkpoint::Checkpoint;
    use serde_json::json;

    fn sample() -> Checkpoint {
        let mut state = StateData::new();
        state.insert("messages".to_string(), json!(["A", "B"]));
        Checkpoint::new(state).with_node_id("a").with_next_node_id("b")
    }

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer::new();
        let cp = sample();
        let bytes = serializer.dumps(&cp).unwrap();
        let restored: Checkpoint = serializer.loads(&bytes).unwrap();
        assert_eq!(cp, restored);
    }

    #[test]
    fn test_bincode_serializer() {
        // bincode is not self-describing, so it suits fixed-shape payloads
        // rather than free-form JSON state
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Record {
            thread: String,
            steps: u32,
        }
        let serializer = BincodeSerializer::new();
        let record = Record {
            thread: "t1".to_string(),
            steps: 4,
        };
        let bytes = serializer.dumps(&record).unwrap();
        let restored: Record = serializer.loads(&bytes).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn test_loads_rejects_garbage() {
        let serializer = JsonSerializer::new();
        assert!(serializer.loads::<Checkpoint>(b"not json").is_err());
    }
}
