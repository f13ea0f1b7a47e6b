//! Shared primitive IDs and the structural query key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic cache entry version.
pub type Version = u64;
/// Monotonic journal sequence number.
pub type OpSeq = u64;
/// Per-key fetch generation used to discard stale fetch results.
pub type Generation = u64;
/// Identifier assigned to each controller invocation.
pub type MutationId = u64;

/// One component of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    /// Numeric component such as a record id.
    Int(u64),
    /// Textual component such as a resource name.
    Str(String),
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<u64> for KeySegment {
    fn from(value: u64) -> Self {
        Self::Int(value)
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Structural identifier of a cached value, e.g. `("userProfile", 42)`.
///
/// Two keys are equal when all of their segments are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    /// Creates a single-segment key.
    pub fn new(root: impl Into<KeySegment>) -> Self {
        Self(vec![root.into()])
    }

    /// Appends a segment.
    pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// Returns the key segments in order.
    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    /// Returns true when `prefix` matches the leading segments of `self`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, seg) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}
