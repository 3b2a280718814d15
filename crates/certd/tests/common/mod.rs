//! Shared fakes for the lifecycle integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use http::Request;
use tokio::time::Instant;

use sentinel_certd::acme::{
    AcmeError, Authorization, AuthorizationStatus, AuthorityOrder, CertificateAuthority,
    CertificateInstaller, CertificateIssuer, ChallengeKind, ChallengeOffer, ChallengeOutcome,
    ChallengeResponder, InstallRequest, LifecycleOrchestrator, OrchestratorSettings, OrderStatus,
};
use sentinel_certd::cluster::{ClusterNode, LeaderElector, MembershipSource, StaticMembership};
use sentinel_certd::store::{
    ChangeFeed, DomainCertificateRecord, RecordFilter, RecordPatch, RecordStore, StoreError,
};
use sentinel_certd::CertdMetrics;
use sentinel_common::NodeName;

/// One call made against the fake authority
#[derive(Debug, Clone)]
pub struct Step {
    pub name: &'static str,
    pub domain: String,
    pub at: Instant,
}

/// Certificate authority that issues immediately and records every call
///
/// With a validator attached, `set_challenge_ready` fetches the challenge
/// through that responder the way a CA would, and fails the order if the
/// published content does not come back. Clones share state.
#[derive(Clone, Default)]
pub struct FakeAuthority {
    state: Arc<AuthorityState>,
}

#[derive(Default)]
struct AuthorityState {
    steps: Mutex<Vec<Step>>,
    orders: AtomicU32,
    fail_orders: AtomicU32,
    validator: Mutex<Option<ChallengeResponder>>,
}

impl AuthorityState {
    fn record(&self, name: &'static str, domain: &str) {
        self.steps.lock().unwrap().push(Step {
            name,
            domain: domain.to_string(),
            at: Instant::now(),
        });
    }
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` order creations
    pub fn failing_first(count: u32) -> Self {
        let authority = Self::default();
        authority.state.fail_orders.store(count, Ordering::SeqCst);
        authority
    }

    pub fn set_validator(&self, responder: ChallengeResponder) {
        *self.state.validator.lock().unwrap() = Some(responder);
    }

    pub fn steps(&self, domain: &str) -> Vec<&'static str> {
        self.state
            .steps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.domain == domain)
            .map(|s| s.name)
            .collect()
    }

    pub fn times_of(&self, name: &str) -> Vec<Instant> {
        self.state
            .steps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.at)
            .collect()
    }

    pub fn order_count(&self) -> u32 {
        self.state.orders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for FakeAuthority {
    async fn new_order(&self, domain: &str) -> Result<Box<dyn AuthorityOrder>, AcmeError> {
        self.state.record("new_order", domain);
        let n = self.state.orders.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.state.fail_orders) {
            return Err(AcmeError::OrderCreation("rateLimited".to_string()));
        }

        let token = format!("token-{}-{}", domain, n);
        Ok(Box::new(FakeOrder {
            authority: Arc::clone(&self.state),
            domain: domain.to_string(),
            key_authorization: format!("{}.thumbprint", token),
            token,
        }))
    }
}

struct FakeOrder {
    authority: Arc<AuthorityState>,
    domain: String,
    token: String,
    key_authorization: String,
}

#[async_trait]
impl AuthorityOrder for FakeOrder {
    async fn authorizations(&mut self) -> Result<Vec<Authorization>, AcmeError> {
        self.authority.record("authorizations", &self.domain);
        Ok(vec![Authorization {
            domain: self.domain.clone(),
            status: AuthorizationStatus::Pending,
            challenges: vec![ChallengeOffer {
                kind: ChallengeKind::Http01,
                token: self.token.clone(),
                url: format!("https://acme.test/chall/{}", self.token),
                key_authorization: self.key_authorization.clone(),
            }],
        }])
    }

    async fn set_challenge_ready(&mut self, _challenge_url: &str) -> Result<(), AcmeError> {
        self.authority.record("set_challenge_ready", &self.domain);

        let validator = self.authority.validator.lock().unwrap().clone();
        if let Some(responder) = validator {
            let request = Request::get(format!("/.well-known/acme-challenge/{}", self.token))
                .body(())
                .unwrap();
            let served = match responder.handle(request).await {
                ChallengeOutcome::Respond(response) => {
                    response.body().as_ref() == self.key_authorization.as_bytes()
                }
                ChallengeOutcome::Forward(_) => false,
            };
            if !served {
                return Err(AcmeError::ChallengeValidation {
                    domain: self.domain.clone(),
                    message: "challenge content not served".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn wait_authorization_valid(&mut self, domain: &str) -> Result<(), AcmeError> {
        self.authority.record("wait_authorization_valid", domain);
        Ok(())
    }

    async fn finalize(&mut self, _csr_der: &[u8]) -> Result<(), AcmeError> {
        self.authority.record("finalize", &self.domain);
        Ok(())
    }

    async fn wait_valid(&mut self) -> Result<(), AcmeError> {
        self.authority.record("wait_valid", &self.domain);
        Ok(())
    }

    async fn refresh(&mut self) -> Result<OrderStatus, AcmeError> {
        self.authority.record("refresh", &self.domain);
        Ok(OrderStatus::Valid)
    }

    async fn certificate(&mut self) -> Result<Option<String>, AcmeError> {
        self.authority.record("certificate", &self.domain);
        Ok(Some(format!("CERTIFICATE {}", self.domain)))
    }
}

/// Installer that keeps every request
#[derive(Default)]
pub struct RecordingInstaller {
    pub installed: Mutex<Vec<InstallRequest>>,
}

impl RecordingInstaller {
    pub fn names(&self) -> Vec<String> {
        self.installed
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

#[async_trait]
impl CertificateInstaller for RecordingInstaller {
    async fn install(&self, request: InstallRequest) -> Result<(), AcmeError> {
        self.installed.lock().unwrap().push(request);
        Ok(())
    }
}

/// Store wrapper that disrupts its first few subscriptions
///
/// The first `closed_feeds` subscriptions end immediately with `FeedClosed`.
/// After those, the next `lagged_feeds` subscriptions open with one
/// `FeedLagged` item before the real feed.
pub struct FlakyFeedStore<S> {
    inner: S,
    closed_feeds: AtomicU32,
    lagged_feeds: AtomicU32,
    subscriptions: AtomicU32,
}

impl<S> FlakyFeedStore<S> {
    pub fn closing(inner: S, closed_feeds: u32) -> Self {
        Self {
            inner,
            closed_feeds: AtomicU32::new(closed_feeds),
            lagged_feeds: AtomicU32::new(0),
            subscriptions: AtomicU32::new(0),
        }
    }

    pub fn lagging(inner: S, lagged_feeds: u32) -> Self {
        Self {
            inner,
            closed_feeds: AtomicU32::new(0),
            lagged_feeds: AtomicU32::new(lagged_feeds),
            subscriptions: AtomicU32::new(0),
        }
    }

    pub fn subscriptions(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<S: RecordStore> RecordStore for FlakyFeedStore<S> {
    async fn get(&self, domain: &str) -> Result<Option<DomainCertificateRecord>, StoreError> {
        self.inner.get(domain).await
    }

    async fn search(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<DomainCertificateRecord>, StoreError> {
        self.inner.search(filter).await
    }

    async fn upsert(
        &self,
        domain: &str,
        patch: RecordPatch,
    ) -> Result<DomainCertificateRecord, StoreError> {
        self.inner.upsert(domain, patch).await
    }

    async fn claim(&self, domain: &str) -> Result<bool, StoreError> {
        self.inner.claim(domain).await
    }

    async fn subscribe(&self) -> Result<ChangeFeed, StoreError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.closed_feeds) {
            return Ok(Box::pin(stream::iter(vec![Err(StoreError::FeedClosed)])));
        }

        let feed = self.inner.subscribe().await?;
        if take_one(&self.lagged_feeds) {
            let lag = stream::iter(vec![Err(StoreError::FeedLagged { skipped: 3 })]);
            return Ok(Box::pin(lag.chain(feed)));
        }
        Ok(feed)
    }
}

/// Membership that fails its first `failures` lookups, then lists `members`
pub struct FlakyMembership {
    members: StaticMembership,
    failures: AtomicU32,
}

impl FlakyMembership {
    pub fn new(members: &[&str], failures: u32) -> Self {
        Self {
            members: StaticMembership::new(members.iter().map(|m| NodeName::from(*m))),
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl MembershipSource for FlakyMembership {
    async fn nodes(&self) -> Result<Vec<ClusterNode>, StoreError> {
        if take_one(&self.failures) {
            return Err(StoreError::Unavailable("membership lookup failed".to_string()));
        }
        self.members.nodes().await
    }
}

/// One cluster node's orchestrator over a shared store
pub struct Node {
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub metrics: Arc<CertdMetrics>,
}

pub fn node(
    hostname: &str,
    members: &[&str],
    store: Arc<dyn RecordStore>,
    authority: FakeAuthority,
    installer: Arc<RecordingInstaller>,
    settings: OrchestratorSettings,
) -> Node {
    let membership: Arc<dyn MembershipSource> = Arc::new(StaticMembership::new(
        members.iter().map(|m| NodeName::from(*m)),
    ));
    node_with_membership(hostname, membership, store, authority, installer, settings)
}

pub fn node_with_membership(
    hostname: &str,
    membership: Arc<dyn MembershipSource>,
    store: Arc<dyn RecordStore>,
    authority: FakeAuthority,
    installer: Arc<RecordingInstaller>,
    settings: OrchestratorSettings,
) -> Node {
    let metrics = Arc::new(CertdMetrics::new().unwrap());

    let issuer = CertificateIssuer::new(Arc::new(authority), Arc::clone(&store), installer)
        .with_metrics(Arc::clone(&metrics));

    let elector = LeaderElector::new(NodeName::from(hostname), membership);

    let orchestrator = LifecycleOrchestrator::new(store, elector, Arc::new(issuer), settings)
        .with_metrics(Arc::clone(&metrics));

    Node {
        orchestrator: Arc::new(orchestrator),
        metrics,
    }
}
