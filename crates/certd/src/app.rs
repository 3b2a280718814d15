//! Wiring of the coordinator from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use sentinel_common::NodeName;
use sentinel_config::CertdConfig;
use tracing::info;

use crate::acme::{
    CertificateIssuer, DiskInstaller, DiskStorage, LetsEncryptAuthority,
    LifecycleOrchestrator, OrchestratorHandle, OrchestratorSettings,
};
use crate::cluster::{LeaderElector, MembershipSource, StaticMembership};
use crate::metrics::CertdMetrics;
use crate::store::{LocalRecordStore, RecordStore};

/// A node's coordinator, built over disk storage and the local record store
///
/// Challenge serving is left to the embedding HTTP server: it builds a
/// [`ChallengeResponder`](crate::acme::ChallengeResponder) over `store`.
pub struct CertdApp {
    pub storage: Arc<DiskStorage>,
    pub store: Arc<LocalRecordStore>,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub metrics: Arc<CertdMetrics>,
}

impl CertdApp {
    /// Build every component from `config`
    ///
    /// Opens (or creates) the storage directory and loads persisted records.
    /// No background task is started.
    pub fn from_config(config: &CertdConfig) -> Result<Self> {
        let storage = Arc::new(DiskStorage::new(&config.acme.storage).with_context(|| {
            format!(
                "Failed to open storage at {}",
                config.acme.storage.display()
            )
        })?);

        let store = Arc::new(
            LocalRecordStore::persistent(Arc::clone(&storage))
                .context("Failed to load domain records")?,
        );
        let metrics = Arc::new(CertdMetrics::new().context("Failed to register metrics")?);

        let authority = Arc::new(LetsEncryptAuthority::new(
            config.acme.email.as_str(),
            config.acme.directory.url(),
            Arc::clone(&storage),
        ));

        let issuer = CertificateIssuer::new(
            authority,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::new(DiskInstaller::new(Arc::clone(&storage))),
        )
        .with_settle_delay(config.issuance.settle_delay())
        .with_renewal_after(chrono::Duration::days(i64::from(
            config.issuance.renewal_after_days,
        )))
        .with_metrics(Arc::clone(&metrics));

        let membership: Arc<dyn MembershipSource> =
            Arc::new(StaticMembership::new(config.cluster.member_names()));
        let elector = LeaderElector::new(NodeName::new(config.node.hostname.as_str()), membership);

        let orchestrator = LifecycleOrchestrator::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            elector,
            Arc::new(issuer),
            OrchestratorSettings::from_config(&config.issuance, config.node.worker_id),
        )
        .with_metrics(Arc::clone(&metrics));

        info!(
            hostname = %config.node.hostname,
            worker_id = config.node.worker_id,
            members = config.cluster.members.len(),
            directory = %config.acme.directory.url(),
            records = store.len(),
            "Certificate coordinator initialized"
        );

        Ok(Self {
            storage,
            store,
            orchestrator: Arc::new(orchestrator),
            metrics,
        })
    }

    /// Start the background tasks; `None` on workers other than 0
    pub fn start(&self) -> Option<OrchestratorHandle> {
        Arc::clone(&self.orchestrator).start()
    }
}

impl std::fmt::Debug for CertdApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertdApp")
            .field("storage", &self.storage)
            .field("records", &self.store.len())
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_config::{AcmeConfig, AcmeDirectory};

    fn config(storage: &std::path::Path, worker_id: u32) -> CertdConfig {
        let mut config = CertdConfig::default();
        config.node.hostname = "node-a".to_string();
        config.node.worker_id = worker_id;
        config.cluster.members = vec!["node-a".to_string()];
        config.acme = AcmeConfig {
            email: "admin@example.com".to_string(),
            directory: AcmeDirectory::Staging,
            storage: storage.to_path_buf(),
        };
        config
    }

    #[tokio::test]
    async fn test_from_config_loads_existing_records() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let storage = Arc::new(DiskStorage::new(temp_dir.path()).unwrap());
            let store = LocalRecordStore::persistent(storage).unwrap();
            store.register("example.com").unwrap();
        }

        let app = CertdApp::from_config(&config(temp_dir.path(), 0)).unwrap();
        assert_eq!(app.store.len(), 1);

        // Picked up by the catch-up scan once the coordinator starts
        let awaiting = app
            .store
            .search(&crate::store::RecordFilter::AwaitingIssuance)
            .await
            .unwrap();
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].domain, "example.com");
    }

    #[tokio::test]
    async fn test_non_primary_worker_does_not_start() {
        let temp_dir = tempfile::tempdir().unwrap();
        let app = CertdApp::from_config(&config(temp_dir.path(), 1)).unwrap();
        assert!(app.start().is_none());
    }
}
