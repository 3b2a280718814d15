//! Configuration linting
//!
//! Flags settings that are legal but probably not what an operator wants.

use super::{ValidationResult, ValidationWarning};
use crate::{AcmeDirectory, CertdConfig};

/// Lint configuration for likely mistakes
pub fn lint_config(config: &CertdConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    // A node missing from a non-empty member list can never be elected
    if !config.cluster.members.is_empty()
        && !config
            .cluster
            .members
            .iter()
            .any(|member| member == &config.node.hostname)
    {
        result.add_warning(ValidationWarning::new(format!(
            "Hostname '{}' is not a cluster member; this node will never issue certificates",
            config.node.hostname
        )));
    }

    if config.cluster.members.is_empty() {
        result.add_warning(ValidationWarning::new(
            "No cluster members configured; every node will consider itself leader".to_string(),
        ));
    }

    if config.acme.directory == AcmeDirectory::Staging {
        result.add_warning(ValidationWarning::new(
            "Using the Let's Encrypt staging directory; issued certificates are not trusted"
                .to_string(),
        ));
    }

    if config.issuance.max_retries == 0 {
        result.add_warning(ValidationWarning::new(
            "max-retries is 0; a single failed attempt leaves the domain without a certificate"
                .to_string(),
        ));
    }

    if config.issuance.settle_delay_secs == 0 && config.cluster.members.len() > 1 {
        result.add_warning(ValidationWarning::new(
            "settle-delay-secs is 0 in a multi-node cluster; challenges may not have replicated when validation starts"
                .to_string(),
        ));
    }

    result
}
