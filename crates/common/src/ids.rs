//! Type-safe identifier newtypes for the certificate coordinator.
//!
//! These types keep cluster node names and per-attempt identifiers from
//! being confused with the plain domain strings that flow through the
//! record store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a cluster member, as published by the membership source.
///
/// Leadership is decided by comparing the local node's configured hostname
/// against these names, so comparison is exact (no case folding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// Wrap a node hostname
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a single issuance or renewal attempt cycle.
///
/// Generated when an attempt is launched and attached to every log line the
/// attempt emits, so one domain's retries can be followed end to end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuanceId(String);

impl IssuanceId {
    /// Create a new random issuance ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IssuanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IssuanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name() {
        let name = NodeName::new("node-a");
        assert_eq!(name.as_str(), "node-a");
        assert_eq!(name.to_string(), "node-a");
        assert_eq!(NodeName::from("node-a"), name);
    }

    #[test]
    fn test_node_name_is_case_sensitive() {
        assert_ne!(NodeName::from("Node-A"), NodeName::from("node-a"));
    }

    #[test]
    fn test_issuance_ids_are_unique() {
        let id1 = IssuanceId::new();
        let id2 = IssuanceId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
    }
}
