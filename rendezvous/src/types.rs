//! Identifiers shared by the server, the client and the wire protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one checkpoint that a set of parties synchronizes on.
///
/// Typically a date range. Keys compare exactly: `"2024-01-01"` and
/// `"2024-01-01 "` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Inclusive lower bound of the partition.
    pub start: String,
    /// Upper bound of the partition.
    pub end: String,
}

impl PartitionKey {
    /// Creates a new partition key.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Session-scoped identifier of a barrier handle.
///
/// Issued by the server in response to `get_barrier`; only meaningful on the
/// connection that received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
