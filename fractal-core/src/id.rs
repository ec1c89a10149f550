//! Identifiers used to address objects and the servers that host them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dataset's identity inside one object registry: a 128-bit value split
/// into two signed halves so it round-trips cleanly through wire formats
/// that lack a native 128-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub high: i64,
    pub low: i64,
}

impl ObjectId {
    pub fn new_random() -> Self {
        let raw = uuid::Uuid::new_v4();
        let bytes = raw.as_bytes();
        let high = i64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let low = i64::from_be_bytes(bytes[8..16].try_into().unwrap());
        Self { high, low }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high as u64, self.low as u64)
    }
}

/// Opaque handle to the server process hosting a `RemoteDataSet`. Carries
/// whatever a concrete `RpcClient` needs to reconnect (a URI, usually);
/// core code only compares and displays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
