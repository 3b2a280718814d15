//! KDL configuration parsing.
//!
//! Each top-level block (`node`, `cluster`, `acme`, `issuance`) is parsed by
//! its own function; unknown blocks are rejected so typos surface early.

use anyhow::Result;
use tracing::trace;

use crate::CertdConfig;

mod acme;
mod helpers;
mod node;

pub use acme::{parse_acme_config, parse_issuance_config};
pub use helpers::{get_first_arg_string, get_int_entry, get_string_entry};
pub use node::{parse_cluster_config, parse_node_config};

/// Build a [`CertdConfig`] from a parsed KDL document
pub fn parse_document(doc: &::kdl::KdlDocument) -> Result<CertdConfig> {
    let mut config = CertdConfig::default();

    for node in doc.nodes() {
        let name = node.name().value();
        trace!(block = %name, "Parsing configuration block");

        match name {
            "node" => config.node = parse_node_config(node)?,
            "cluster" => config.cluster = parse_cluster_config(node)?,
            "acme" => config.acme = parse_acme_config(node)?,
            "issuance" => config.issuance = parse_issuance_config(node)?,
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown configuration block '{}'. Valid blocks: node, cluster, acme, issuance",
                    other
                ));
            }
        }
    }

    Ok(config)
}
