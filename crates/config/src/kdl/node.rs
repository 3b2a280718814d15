//! Node identity and cluster membership KDL parsing.

use anyhow::Result;
use tracing::trace;

use crate::{ClusterConfig, NodeConfig};

use super::helpers::{children_named, get_first_arg_string, get_string_entry, get_unsigned_entry};

/// Parse the `node` block
pub fn parse_node_config(node: &::kdl::KdlNode) -> Result<NodeConfig> {
    let config = NodeConfig {
        hostname: get_string_entry(node, "hostname").unwrap_or_default(),
        worker_id: get_unsigned_entry(node, "worker-id")?.unwrap_or(0),
    };

    trace!(
        hostname = %config.hostname,
        worker_id = config.worker_id,
        "Parsed node configuration"
    );

    Ok(config)
}

/// Parse the `cluster` block
///
/// Member order is preserved; it is the order leadership is decided in.
pub fn parse_cluster_config(node: &::kdl::KdlNode) -> Result<ClusterConfig> {
    let mut members = Vec::new();

    for member in children_named(node, "member") {
        let name = get_first_arg_string(member).ok_or_else(|| {
            anyhow::anyhow!("Cluster member requires a name argument, e.g., member \"node-a\"")
        })?;

        if members.contains(&name) {
            return Err(anyhow::anyhow!(
                "Cluster member '{}' is listed more than once",
                name
            ));
        }

        trace!(member = %name, "Parsed cluster member");
        members.push(name);
    }

    Ok(ClusterConfig { members })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_node(src: &str) -> ::kdl::KdlDocument {
        src.parse().unwrap()
    }

    #[test]
    fn test_node_defaults() {
        let doc = first_node("node {}");
        let config = parse_node_config(&doc.nodes()[0]).unwrap();
        assert_eq!(config.hostname, "");
        assert_eq!(config.worker_id, 0);
    }

    #[test]
    fn test_negative_worker_id_rejected() {
        let doc = first_node("node {\n worker-id -1\n}");
        let err = parse_node_config(&doc.nodes()[0]).unwrap_err();
        assert!(err.to_string().contains("worker-id"));
    }

    #[test]
    fn test_cluster_preserves_order() {
        let doc = first_node("cluster {\n member \"c\"\n member \"a\"\n member \"b\"\n}");
        let config = parse_cluster_config(&doc.nodes()[0]).unwrap();
        assert_eq!(config.members, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cluster_rejects_duplicates() {
        let doc = first_node("cluster {\n member \"a\"\n member \"a\"\n}");
        assert!(parse_cluster_config(&doc.nodes()[0]).is_err());
    }

    #[test]
    fn test_cluster_member_requires_name() {
        let doc = first_node("cluster {\n member\n}");
        assert!(parse_cluster_config(&doc.nodes()[0]).is_err());
    }
}
