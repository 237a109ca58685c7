//! Unique identifiers for submitted work.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for one submission of a work item.
///
/// A fresh id is minted every time a work item is submitted, so resubmitting
/// the same item yields a different id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(Ulid);

impl WorkId {
    /// Generate a new WorkId
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Milliseconds since the Unix epoch at which this id was minted.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for WorkId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = WorkId::new();
        let b = WorkId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_parses_back() {
        let id = WorkId::new();
        let parsed: WorkId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("not-a-ulid".parse::<WorkId>().is_err());
    }
}
