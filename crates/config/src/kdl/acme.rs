//! ACME and issuance KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use crate::{AcmeConfig, AcmeDirectory, IssuanceConfig, DEFAULT_STORAGE_PATH};

use super::helpers::{get_string_entry, get_unsigned_entry};

/// Parse the `acme` block
pub fn parse_acme_config(node: &::kdl::KdlNode) -> Result<AcmeConfig> {
    let email = get_string_entry(node, "email").ok_or_else(|| {
        anyhow::anyhow!("ACME block requires an 'email' field, e.g., email \"admin@example.com\"")
    })?;

    let directory = get_string_entry(node, "directory")
        .map(|s| AcmeDirectory::from_str_loose(&s))
        .unwrap_or_default();

    let storage = get_string_entry(node, "storage")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH));

    trace!(
        email = %email,
        directory = %directory.url(),
        storage = %storage.display(),
        "Parsed ACME configuration"
    );

    Ok(AcmeConfig {
        email,
        directory,
        storage,
    })
}

/// Parse the `issuance` block
pub fn parse_issuance_config(node: &::kdl::KdlNode) -> Result<IssuanceConfig> {
    let defaults = IssuanceConfig::default();

    let config = IssuanceConfig {
        max_retries: get_unsigned_entry(node, "max-retries")?.unwrap_or(defaults.max_retries),
        retry_base_delay_secs: get_unsigned_entry(node, "retry-base-delay-secs")?
            .unwrap_or(defaults.retry_base_delay_secs),
        stagger_per_node_secs: get_unsigned_entry(node, "stagger-per-node-secs")?
            .unwrap_or(defaults.stagger_per_node_secs),
        settle_delay_secs: get_unsigned_entry(node, "settle-delay-secs")?
            .unwrap_or(defaults.settle_delay_secs),
        renewal_after_days: get_unsigned_entry(node, "renewal-after-days")?
            .unwrap_or(defaults.renewal_after_days),
        renewal_check_interval_hours: get_unsigned_entry(node, "renewal-check-interval-hours")?
            .unwrap_or(defaults.renewal_check_interval_hours),
        subscription_restart_delay_secs: get_unsigned_entry(
            node,
            "subscription-restart-delay-secs",
        )?
        .unwrap_or(defaults.subscription_restart_delay_secs),
    };

    trace!(
        max_retries = config.max_retries,
        retry_base_delay_secs = config.retry_base_delay_secs,
        renewal_after_days = config.renewal_after_days,
        "Parsed issuance configuration"
    );

    Ok(config)
}
