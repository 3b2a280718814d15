//! Certificate lifecycle orchestration
//!
//! Two background tasks drive issuance:
//!
//! - the **subscription loop** watches the record store's change feed for
//!   newly registered domains and starts a staggered, retried fresh issuance
//!   on the leader
//! - the **renewal timer** periodically scans for records past their renewal
//!   date and starts a single renewal attempt on the leader
//!
//! Issuances run as detached tasks; neither loop waits on one. Only worker 0
//! runs the tasks at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use sentinel_common::{IssuanceId, RetryPolicy};
use sentinel_config::IssuanceConfig;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::issuer::{CertificateIssuer, IssuanceMode};
use crate::cluster::{LeaderElector, MembershipSource};
use crate::metrics::CertdMetrics;
use crate::store::{ChangeEvent, ChangeFeed, RecordFilter, RecordPatch, RecordStore, StoreError};

/// Default renewal scan interval (12 hours)
const DEFAULT_RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3600);

/// Delay before the first renewal scan after startup
const INITIAL_RENEWAL_DELAY: Duration = Duration::from_secs(10);

/// Delay before re-subscribing after the change feed ends
const DEFAULT_SUBSCRIPTION_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Per-member stagger of the first fresh issuance attempt
const DEFAULT_STAGGER_PER_NODE: Duration = Duration::from_secs(60);

/// Scheduling parameters for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Worker index within this node; only worker 0 runs the background tasks
    pub worker_id: u32,
    pub retry_policy: RetryPolicy,
    pub stagger_per_node: Duration,
    pub renewal_check_interval: Duration,
    pub initial_renewal_delay: Duration,
    pub subscription_restart_delay: Duration,
}

impl OrchestratorSettings {
    /// Build settings from the issuance config block for worker `worker_id`
    pub fn from_config(issuance: &IssuanceConfig, worker_id: u32) -> Self {
        Self {
            worker_id,
            retry_policy: issuance.retry_policy(),
            stagger_per_node: issuance.stagger_per_node(),
            renewal_check_interval: issuance.renewal_check_interval(),
            initial_renewal_delay: INITIAL_RENEWAL_DELAY,
            subscription_restart_delay: issuance.subscription_restart_delay(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_id: 0,
            retry_policy: RetryPolicy::default(),
            stagger_per_node: DEFAULT_STAGGER_PER_NODE,
            renewal_check_interval: DEFAULT_RENEWAL_CHECK_INTERVAL,
            initial_renewal_delay: INITIAL_RENEWAL_DELAY,
            subscription_restart_delay: DEFAULT_SUBSCRIPTION_RESTART_DELAY,
        }
    }
}

// ============================================================================
// In-flight registry
// ============================================================================

/// Domains with an issuance running on this node
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    domains: Arc<DashMap<String, IssuanceId>>,
}

impl InFlightRegistry {
    /// Mark `domain` as in flight, or `None` if it already is
    pub fn try_begin(&self, domain: &str) -> Option<InFlightGuard> {
        match self.domains.entry(domain.to_string()) {
            Entry::Occupied(existing) => {
                trace!(domain = %domain, issuance_id = %existing.get(), "Issuance already in flight");
                None
            }
            Entry::Vacant(vacant) => {
                let id = IssuanceId::new();
                vacant.insert(id.clone());
                Some(InFlightGuard {
                    domains: Arc::clone(&self.domains),
                    domain: domain.to_string(),
                    id,
                })
            }
        }
    }

    /// Whether an attempt for `domain` is running on this node
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    /// Number of attempts running on this node
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Removes its domain from the registry when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    domains: Arc<DashMap<String, IssuanceId>>,
    domain: String,
    id: IssuanceId,
}

impl InFlightGuard {
    /// Identifier of the attempt holding this guard
    pub fn id(&self) -> &IssuanceId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.domains.remove_if(&self.domain, |_, id| *id == self.id);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs new-domain issuance and periodic renewal for this node
pub struct LifecycleOrchestrator {
    store: Arc<dyn RecordStore>,
    elector: LeaderElector<Arc<dyn MembershipSource>>,
    issuer: Arc<CertificateIssuer>,
    settings: OrchestratorSettings,
    in_flight: InFlightRegistry,
    metrics: Option<Arc<CertdMetrics>>,
}

/// Handle to the orchestrator's background tasks
#[derive(Debug)]
pub struct OrchestratorHandle {
    subscription: JoinHandle<()>,
    renewal: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Stop the subscription loop and the renewal timer
    ///
    /// Issuances already started keep running.
    pub fn shutdown(self) {
        self.subscription.abort();
        self.renewal.abort();
        info!("Certificate lifecycle tasks stopped");
    }
}

impl LifecycleOrchestrator {
    /// Create an orchestrator; nothing runs until [`start`](Self::start)
    ///
    /// # Arguments
    ///
    /// * `store` - Shared record store watched for new domains and renewals
    /// * `elector` - Decides whether this node acts on a trigger
    /// * `issuer` - Runs each issuance attempt
    /// * `settings` - Timing, retry and worker settings
    pub fn new(
        store: Arc<dyn RecordStore>,
        elector: LeaderElector<Arc<dyn MembershipSource>>,
        issuer: Arc<CertificateIssuer>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            elector,
            issuer,
            settings,
            in_flight: InFlightRegistry::default(),
            metrics: None,
        }
    }

    /// Count exhausted retries in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<CertdMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attempts currently running on this node
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Spawn the subscription loop and the renewal timer
    ///
    /// Returns `None` on any worker other than 0.
    pub fn start(self: Arc<Self>) -> Option<OrchestratorHandle> {
        if self.settings.worker_id != 0 {
            info!(
                worker_id = self.settings.worker_id,
                "Not the primary worker, certificate lifecycle tasks disabled"
            );
            return None;
        }

        info!(
            hostname = %self.elector.hostname(),
            renewal_check_interval_hours = self.settings.renewal_check_interval.as_secs() / 3600,
            "Starting certificate lifecycle tasks"
        );

        let subscription = tokio::spawn(Arc::clone(&self).run_subscription());
        let renewal = tokio::spawn(self.run_renewal_timer());

        Some(OrchestratorHandle {
            subscription,
            renewal,
        })
    }

    // ------------------------------------------------------------------------
    // New-domain trigger
    // ------------------------------------------------------------------------

    /// Supervised change-feed loop; re-subscribes whenever the feed ends
    async fn run_subscription(self: Arc<Self>) {
        loop {
            match self.store.subscribe().await {
                Ok(feed) => {
                    debug!("Subscribed to record change feed");
                    self.catch_up().await;
                    self.consume(feed).await;
                    warn!(
                        restart_delay_secs = self.settings.subscription_restart_delay.as_secs(),
                        "Record change feed ended, re-subscribing"
                    );
                }
                Err(e) => {
                    error!(
                        error = %e,
                        restart_delay_secs = self.settings.subscription_restart_delay.as_secs(),
                        "Failed to subscribe to record change feed"
                    );
                }
            }

            tokio::time::sleep(self.settings.subscription_restart_delay).await;
        }
    }

    async fn consume(self: &Arc<Self>, mut feed: ChangeFeed) {
        while let Some(item) = feed.next().await {
            match item {
                Ok(event) => {
                    if let Err(e) = self.handle_change(event).await {
                        warn!(error = %e, "Failed to handle record change");
                    }
                }
                Err(e) if e.is_feed_fatal() => {
                    debug!(error = %e, "Record change feed terminated");
                    return;
                }
                Err(e) => warn!(error = %e, "Record change feed error"),
            }
        }
    }

    /// Start issuance for domains registered while no feed was being read
    ///
    /// Returns the spawned issuance tasks.
    pub async fn catch_up(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let awaiting = match self.store.search(&RecordFilter::AwaitingIssuance).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to search for domains awaiting issuance");
                return Vec::new();
            }
        };

        if !awaiting.is_empty() {
            info!(count = awaiting.len(), "Found domains awaiting issuance");
        }

        let mut tasks = Vec::new();
        for record in awaiting {
            match self.begin_fresh(&record.domain).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(e) => warn!(domain = %record.domain, error = %e, "Failed to start issuance"),
            }
        }
        tasks
    }

    /// React to one change-feed event
    ///
    /// Only freshly registered idle records start an issuance. Returns the
    /// spawned issuance task, if any.
    pub async fn handle_change(
        self: &Arc<Self>,
        event: ChangeEvent,
    ) -> Result<Option<JoinHandle<()>>, StoreError> {
        let record = event.value;
        if !record.is_newly_registered() {
            trace!(domain = %record.domain, "Ignoring record change");
            return Ok(None);
        }

        self.begin_fresh(&record.domain).await
    }

    async fn begin_fresh(
        self: &Arc<Self>,
        domain: &str,
    ) -> Result<Option<JoinHandle<()>>, StoreError> {
        let election = self.elector.elect().await?;
        if !election.is_leader {
            debug!(domain = %domain, leader = ?election.leader, "Not the leader, skipping issuance");
            return Ok(None);
        }

        let Some(guard) = self.in_flight.try_begin(domain) else {
            return Ok(None);
        };

        if !self.store.claim(domain).await? {
            debug!(domain = %domain, "Domain already claimed, skipping issuance");
            return Ok(None);
        }

        let stagger = election.stagger(self.settings.stagger_per_node);
        info!(
            domain = %domain,
            issuance_id = %guard.id(),
            total_nodes = election.total_nodes,
            stagger_secs = stagger.as_secs(),
            "Starting certificate issuance for new domain"
        );

        let this = Arc::clone(self);
        let domain = domain.to_string();
        Ok(Some(tokio::spawn(async move {
            let _guard = guard;
            let result = this
                .settings
                .retry_policy
                .run(stagger, |attempt| {
                    let issuer = Arc::clone(&this.issuer);
                    let domain = domain.clone();
                    async move {
                        debug!(domain = %domain, attempt, "Issuance attempt");
                        issuer.issue(&domain, IssuanceMode::Fresh).await
                    }
                })
                .await;

            if let Err(e) = result {
                error!(
                    domain = %domain,
                    attempts = this.settings.retry_policy.total_attempts(),
                    error = %e,
                    "Certificate issuance failed after all retries"
                );
                if let Some(ref metrics) = this.metrics {
                    metrics.record_retries_exhausted();
                }
            }
        })))
    }

    // ------------------------------------------------------------------------
    // Renewal trigger
    // ------------------------------------------------------------------------

    async fn run_renewal_timer(self: Arc<Self>) {
        tokio::time::sleep(self.settings.initial_renewal_delay).await;

        if let Err(e) = self.run_renewal_scan().await {
            error!(error = %e, "Initial certificate renewal scan failed");
        }

        let period = self.settings.renewal_check_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            debug!("Running scheduled certificate renewal scan");

            if let Err(e) = self.run_renewal_scan().await {
                error!(error = %e, "Certificate renewal scan failed");
            }
        }
    }

    /// Start a renewal for every record past its renewal date
    ///
    /// Returns the spawned renewal tasks.
    pub async fn run_renewal_scan(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let due = self
            .store
            .search(&RecordFilter::RenewalDue { now: Utc::now() })
            .await?;

        info!(domain_count = due.len(), "Checking certificates for renewal");

        let mut tasks = Vec::new();
        for record in due {
            match self.begin_renewal(&record.domain).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(e) => warn!(domain = %record.domain, error = %e, "Failed to start renewal"),
            }
        }
        Ok(tasks)
    }

    async fn begin_renewal(
        self: &Arc<Self>,
        domain: &str,
    ) -> Result<Option<JoinHandle<()>>, StoreError> {
        let election = self.elector.elect().await?;
        if !election.is_leader {
            debug!(domain = %domain, "Not the leader, skipping renewal");
            return Ok(None);
        }

        let Some(guard) = self.in_flight.try_begin(domain) else {
            return Ok(None);
        };

        self.store
            .upsert(domain, RecordPatch::mark_in_progress())
            .await?;

        info!(domain = %domain, issuance_id = %guard.id(), "Certificate needs renewal");

        let issuer = Arc::clone(&self.issuer);
        let domain = domain.to_string();
        Ok(Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = issuer.issue(&domain, IssuanceMode::Renewal).await {
                error!(domain = %domain, error = %e, "Certificate renewal failed");
            }
        })))
    }
}

impl std::fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("elector", &self.elector)
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}
