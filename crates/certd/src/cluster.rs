//! Cluster membership and leader election
//!
//! Leadership is static: the first member in store order is the leader, and
//! an empty membership makes every node its own leader (bootstrap). Nothing
//! here watches node health, so if the first member is down no other node
//! takes over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sentinel_common::NodeName;
use tracing::{debug, trace};

use crate::store::StoreError;

/// A cluster member as enumerated by the membership source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: NodeName,
}

impl ClusterNode {
    /// A member identified by `name`
    pub fn new(name: impl Into<NodeName>) -> Self {
        Self { name: name.into() }
    }
}

/// Source of cluster member identities, in a stable order shared by every
/// node
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn nodes(&self) -> Result<Vec<ClusterNode>, StoreError>;
}

#[async_trait]
impl<T: MembershipSource + ?Sized> MembershipSource for Arc<T> {
    async fn nodes(&self) -> Result<Vec<ClusterNode>, StoreError> {
        (**self).nodes().await
    }
}

/// Membership fixed at startup from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    nodes: Vec<ClusterNode>,
}

impl StaticMembership {
    /// Membership listing `names` in the given order
    pub fn new(names: impl IntoIterator<Item = NodeName>) -> Self {
        Self {
            nodes: names.into_iter().map(|name| ClusterNode { name }).collect(),
        }
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn nodes(&self) -> Result<Vec<ClusterNode>, StoreError> {
        Ok(self.nodes.clone())
    }
}

/// Outcome of one election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Election {
    pub is_leader: bool,
    pub total_nodes: usize,
    /// The elected member, `None` when membership is empty
    pub leader: Option<NodeName>,
}

impl Election {
    /// Delay before the first issuance attempt: one `per_node` step for
    /// every member after the first
    pub fn stagger(&self, per_node: Duration) -> Duration {
        let others = u32::try_from(self.total_nodes.saturating_sub(1)).unwrap_or(u32::MAX);
        per_node.saturating_mul(others)
    }
}

/// Decides whether this node is the active issuer
pub struct LeaderElector<M> {
    hostname: NodeName,
    membership: M,
}

impl<M: MembershipSource> LeaderElector<M> {
    /// Elector for the node named `hostname`
    pub fn new(hostname: NodeName, membership: M) -> Self {
        Self {
            hostname,
            membership,
        }
    }

    /// This node's identity
    pub fn hostname(&self) -> &NodeName {
        &self.hostname
    }

    /// Run the election against the current membership
    ///
    /// Read-only. A membership error is returned as-is; no leadership is
    /// assumed on failure.
    pub async fn elect(&self) -> Result<Election, StoreError> {
        let nodes = self.membership.nodes().await?;
        let election = elect_from(&self.hostname, &nodes);

        trace!(
            hostname = %self.hostname,
            total_nodes = election.total_nodes,
            is_leader = election.is_leader,
            "Leader election"
        );
        if nodes.is_empty() {
            debug!(hostname = %self.hostname, "No cluster members listed, acting as leader");
        }

        Ok(election)
    }
}

impl<M> std::fmt::Debug for LeaderElector<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

fn elect_from(hostname: &NodeName, nodes: &[ClusterNode]) -> Election {
    match nodes.first() {
        None => Election {
            is_leader: true,
            total_nodes: 0,
            leader: None,
        },
        Some(first) => Election {
            is_leader: first.name == *hostname,
            total_nodes: nodes.len(),
            leader: Some(first.name.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn elector(hostname: &str, members: &[&str]) -> LeaderElector<StaticMembership> {
        LeaderElector::new(
            NodeName::from(hostname),
            StaticMembership::new(members.iter().map(|m| NodeName::from(*m))),
        )
    }

    struct FailingMembership;

    #[async_trait]
    impl MembershipSource for FailingMembership {
        async fn nodes(&self) -> Result<Vec<ClusterNode>, StoreError> {
            Err(StoreError::Unavailable("membership".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_member_leads() {
        let election = elector("a", &["a", "b", "c"]).elect().await.unwrap();
        assert!(election.is_leader);
        assert_eq!(election.total_nodes, 3);
        assert_eq!(election.leader, Some(NodeName::from("a")));

        let election = elector("b", &["a", "b", "c"]).elect().await.unwrap();
        assert!(!election.is_leader);
        assert_eq!(election.total_nodes, 3);
    }

    #[tokio::test]
    async fn test_empty_membership_bootstraps() {
        let election = elector("solo", &[]).elect().await.unwrap();
        assert!(election.is_leader);
        assert_eq!(election.total_nodes, 0);
        assert_eq!(election.leader, None);
    }

    #[tokio::test]
    async fn test_unlisted_node_never_leads() {
        let election = elector("z", &["a", "b"]).elect().await.unwrap();
        assert!(!election.is_leader);
    }

    #[tokio::test]
    async fn test_membership_error_propagates() {
        let elector = LeaderElector::new(NodeName::from("a"), FailingMembership);
        assert!(matches!(
            elector.elect().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_stagger() {
        let per_node = Duration::from_secs(60);
        let election = |total_nodes| Election {
            is_leader: true,
            total_nodes,
            leader: None,
        };
        assert_eq!(election(0).stagger(per_node), Duration::ZERO);
        assert_eq!(election(1).stagger(per_node), Duration::ZERO);
        assert_eq!(election(3).stagger(per_node), Duration::from_secs(120));
    }

    proptest! {
        #[test]
        fn exactly_one_leader(count in 1usize..16) {
            let members: Vec<ClusterNode> = (0..count)
                .map(|i| ClusterNode::new(format!("node-{}", i)))
                .collect();

            let leaders = members
                .iter()
                .map(|m| elect_from(&m.name, &members))
                .inspect(|e| assert_eq!(e.total_nodes, count))
                .filter(|e| e.is_leader)
                .count();

            prop_assert_eq!(leaders, 1);
        }

        #[test]
        fn every_node_agrees_on_leader(count in 1usize..16) {
            let members: Vec<ClusterNode> = (0..count)
                .map(|i| ClusterNode::new(format!("node-{}", i)))
                .collect();

            for member in &members {
                let election = elect_from(&member.name, &members);
                prop_assert_eq!(election.leader.as_ref(), Some(&members[0].name));
            }
        }
    }
}
