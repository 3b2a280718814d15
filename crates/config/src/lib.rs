//! Configuration for the Sentinel certificate coordinator.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! node {
//!     hostname "node-a"
//!     worker-id 0
//! }
//! cluster {
//!     member "node-a"
//!     member "node-b"
//! }
//! acme {
//!     email "admin@example.com"
//!     directory "production"
//!     storage "/var/lib/sentinel/certd"
//! }
//! issuance {
//!     max-retries 5
//!     retry-base-delay-secs 120
//! }
//! ```
//!
//! Every `issuance` entry is optional and falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

use sentinel_common::{NodeName, RetryPolicy};

pub mod kdl;
pub mod validate;

pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sentinel/certd.kdl";

/// Default storage directory for records, account credentials and certificates
pub const DEFAULT_STORAGE_PATH: &str = "/var/lib/sentinel/certd";

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Errors raised while loading or checking configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid KDL syntax: {0}")]
    Syntax(#[from] ::kdl::KdlError),

    #[error("Invalid configuration: {0}")]
    Parse(String),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Configuration check failed: {0}")]
    Check(String),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Top-level coordinator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CertdConfig {
    #[validate(nested)]
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    #[validate(nested)]
    pub acme: AcmeConfig,
    #[validate(nested)]
    pub issuance: IssuanceConfig,
}

/// Identity of the local node
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    /// Hostname compared against cluster member names for leadership
    #[validate(length(min = 1, message = "hostname must not be empty"))]
    pub hostname: String,
    /// Worker index within this node; only worker 0 runs the schedulers
    pub worker_id: u32,
}

/// Static cluster membership, in store order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub members: Vec<String>,
}

impl ClusterConfig {
    /// Member identities in configured order
    pub fn member_names(&self) -> Vec<NodeName> {
        self.members.iter().map(|m| NodeName::from(m.as_str())).collect()
    }
}

/// ACME account and certificate authority settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Contact email registered with the ACME account
    #[validate(email(message = "acme email must be a valid address"))]
    pub email: String,
    /// Which ACME directory to talk to
    pub directory: AcmeDirectory,
    /// Storage directory for records, credentials and certificates
    pub storage: PathBuf,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            directory: AcmeDirectory::Production,
            storage: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

/// ACME directory selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcmeDirectory {
    #[default]
    Production,
    Staging,
    Custom(String),
}

impl AcmeDirectory {
    /// Parse `production`, `staging` or a directory URL
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => AcmeDirectory::Production,
            "staging" => AcmeDirectory::Staging,
            _ => AcmeDirectory::Custom(s.to_string()),
        }
    }

    /// Directory URL for this choice
    pub fn url(&self) -> &str {
        match self {
            AcmeDirectory::Production => LETSENCRYPT_PRODUCTION,
            AcmeDirectory::Staging => LETSENCRYPT_STAGING,
            AcmeDirectory::Custom(url) => url,
        }
    }
}

/// Timing of issuance, retries and renewal scans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct IssuanceConfig {
    /// Retries after the first issuance attempt
    #[validate(range(max = 16))]
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry
    #[validate(range(min = 1))]
    pub retry_base_delay_secs: u64,
    /// Per-node stagger before the first attempt: `(nodes - 1) * this`
    pub stagger_per_node_secs: u64,
    /// Pause between publishing a challenge and telling the CA it is ready
    pub settle_delay_secs: u64,
    /// Days after issuance at which a certificate becomes due for renewal
    #[validate(range(min = 1, max = 89))]
    pub renewal_after_days: u32,
    /// Renewal scan period
    #[validate(range(min = 1))]
    pub renewal_check_interval_hours: u64,
    /// Delay before restarting a terminated change-feed subscription
    #[validate(range(min = 1))]
    pub subscription_restart_delay_secs: u64,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_delay_secs: 120,
            stagger_per_node_secs: 60,
            settle_delay_secs: 60,
            renewal_after_days: 60,
            renewal_check_interval_hours: 12,
            subscription_restart_delay_secs: 5,
        }
    }
}

impl IssuanceConfig {
    /// Retry policy for new-domain issuance
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_base_delay_secs),
        )
    }

    /// Extra first-attempt delay per cluster member after the first
    pub fn stagger_per_node(&self) -> Duration {
        Duration::from_secs(self.stagger_per_node_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn renewal_check_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_check_interval_hours * 3600)
    }

    pub fn subscription_restart_delay(&self) -> Duration {
        Duration::from_secs(self.subscription_restart_delay_secs)
    }
}

// ============================================================================
// Loading
// ============================================================================

impl CertdConfig {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_kdl(&content)?;
        info!(
            path = %path.display(),
            hostname = %config.node.hostname,
            members = config.cluster.members.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from KDL source
    pub fn from_kdl(content: &str) -> Result<Self, ConfigError> {
        let doc: ::kdl::KdlDocument = content.parse()?;
        crate::kdl::parse_document(&doc).map_err(|e| ConfigError::Parse(format!("{:#}", e)))
    }

    /// Apply command-line or environment overrides for the node identity
    pub fn with_node_overrides(mut self, hostname: Option<String>, worker_id: Option<u32>) -> Self {
        if let Some(hostname) = hostname {
            debug!(hostname = %hostname, "Overriding configured hostname");
            self.node.hostname = hostname;
        }
        if let Some(worker_id) = worker_id {
            self.node.worker_id = worker_id;
        }
        self
    }

    /// Run field validation and semantic checks
    ///
    /// Returns the accumulated warnings on success.
    pub fn check(&self) -> Result<Vec<ValidationWarning>, ConfigError> {
        Validate::validate(self)?;

        let result = validate::validate_config(self);
        if let Some(first) = result.errors.first() {
            return Err(ConfigError::Check(first.to_string()));
        }
        Ok(result.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
node {
    hostname "node-a"
    worker-id 0
}
cluster {
    member "node-a"
    member "node-b"
}
acme {
    email "admin@example.com"
    directory "staging"
    storage "/tmp/certd"
}
issuance {
    max-retries 3
    retry-base-delay-secs 30
    renewal-check-interval-hours 6
}
"#;

    #[test]
    fn test_parse_full_config() {
        let config = CertdConfig::from_kdl(FULL).unwrap();

        assert_eq!(config.node.hostname, "node-a");
        assert_eq!(config.node.worker_id, 0);
        assert_eq!(config.cluster.members, vec!["node-a", "node-b"]);
        assert_eq!(config.acme.email, "admin@example.com");
        assert_eq!(config.acme.directory, AcmeDirectory::Staging);
        assert_eq!(config.acme.storage, PathBuf::from("/tmp/certd"));
        assert_eq!(config.issuance.max_retries, 3);
        assert_eq!(config.issuance.retry_base_delay_secs, 30);
        assert_eq!(config.issuance.renewal_check_interval_hours, 6);
        // Unspecified entries keep their defaults
        assert_eq!(config.issuance.settle_delay_secs, 60);
        assert_eq!(config.issuance.renewal_after_days, 60);

        assert!(config.check().is_ok());
    }

    #[test]
    fn test_default_issuance_matches_retry_defaults() {
        let issuance = IssuanceConfig::default();
        assert_eq!(issuance.retry_policy(), RetryPolicy::default());
        assert_eq!(issuance.stagger_per_node(), Duration::from_secs(60));
        assert_eq!(issuance.renewal_check_interval(), Duration::from_secs(12 * 3600));
        assert_eq!(issuance.subscription_restart_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_directory_parsing() {
        assert_eq!(AcmeDirectory::from_str_loose("Production"), AcmeDirectory::Production);
        assert_eq!(AcmeDirectory::from_str_loose("staging"), AcmeDirectory::Staging);
        assert_eq!(AcmeDirectory::Production.url(), LETSENCRYPT_PRODUCTION);

        let custom = AcmeDirectory::from_str_loose("https://acme.internal/directory");
        assert_eq!(custom.url(), "https://acme.internal/directory");
    }

    #[test]
    fn test_node_overrides() {
        let config = CertdConfig::from_kdl(FULL)
            .unwrap()
            .with_node_overrides(Some("node-b".to_string()), Some(2));
        assert_eq!(config.node.hostname, "node-b");
        assert_eq!(config.node.worker_id, 2);
    }

    #[test]
    fn test_missing_hostname_fails_check() {
        let config = CertdConfig::from_kdl(
            r#"
acme {
    email "admin@example.com"
}
"#,
        )
        .unwrap();

        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_email_fails_check() {
        let mut config = CertdConfig::from_kdl(FULL).unwrap();
        config.acme.email = "not-an-email".to_string();
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_renewal_after_days_bounds() {
        let mut config = CertdConfig::from_kdl(FULL).unwrap();
        config.issuance.renewal_after_days = 90;
        assert!(config.check().is_err());
        config.issuance.renewal_after_days = 89;
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_syntax_error() {
        let result = CertdConfig::from_kdl("node { hostname \"unterminated }");
        assert!(matches!(result, Err(ConfigError::Syntax(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certd.kdl");
        std::fs::write(&path, FULL).unwrap();

        let config = CertdConfig::from_file(&path).unwrap();
        assert_eq!(config.node.hostname, "node-a");

        let missing = CertdConfig::from_file(dir.path().join("missing.kdl"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
