//! Certificate issuance state machine for a single domain
//!
//! [`CertificateIssuer::issue`] drives one ACME order from creation to an
//! installed certificate. Every step can fail; a failure aborts the attempt
//! and leaves the record as it was at that point (`in_progress` stays set).
//! Retrying is the caller's business.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::authority::{AuthorizationStatus, CertificateAuthority};
use super::csr::CsrMaterial;
use super::error::AcmeError;
use super::install::{CertificateInstaller, InstallRequest};
use crate::metrics::CertdMetrics;
use crate::store::{RecordPatch, RecordStore};

/// Wait between publishing challenge material and asking for validation,
/// so the record reaches every node's responder first
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(60);

/// Pause between a renewal order turning valid and re-fetching it
const RENEWAL_REFRESH_PAUSE: Duration = Duration::from_secs(1);

/// Renewal date offset from issuance (90-day certificates, renewed at 60)
pub const DEFAULT_RENEWAL_AFTER_DAYS: i64 = 60;

/// Whether an attempt issues a first certificate or replaces one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuanceMode {
    Fresh,
    Renewal,
}

impl IssuanceMode {
    /// Whether this attempt replaces an existing certificate
    pub fn is_renewal(self) -> bool {
        self == IssuanceMode::Renewal
    }

    /// Metric label
    pub fn label(self) -> &'static str {
        match self {
            IssuanceMode::Fresh => "fresh",
            IssuanceMode::Renewal => "renewal",
        }
    }
}

impl fmt::Display for IssuanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a successful issuance
#[derive(Clone)]
pub struct IssuedCertificate {
    pub domain: String,
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub issued_at: DateTime<Utc>,
    pub renewal_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("domain", &self.domain)
            .field("issued_at", &self.issued_at)
            .field("renewal_at", &self.renewal_at)
            .finish_non_exhaustive()
    }
}

/// Drives the ACME authority through issuance for one domain at a time
pub struct CertificateIssuer {
    authority: Arc<dyn CertificateAuthority>,
    store: Arc<dyn RecordStore>,
    installer: Arc<dyn CertificateInstaller>,
    metrics: Option<Arc<CertdMetrics>>,
    settle_delay: Duration,
    renewal_after: chrono::Duration,
}

impl CertificateIssuer {
    /// Create an issuer with the default settle delay and renewal offset
    ///
    /// # Arguments
    ///
    /// * `authority` - ACME client used to open and drive orders
    /// * `store` - Record store the challenge material and dates are written to
    /// * `installer` - Receives the certificate once the record is written
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        store: Arc<dyn RecordStore>,
        installer: Arc<dyn CertificateInstaller>,
    ) -> Self {
        Self {
            authority,
            store,
            installer,
            metrics: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            renewal_after: chrono::Duration::days(DEFAULT_RENEWAL_AFTER_DAYS),
        }
    }

    /// Override the wait between publishing a challenge and requesting validation
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Override how long after issuance the certificate becomes due for renewal
    pub fn with_renewal_after(mut self, renewal_after: chrono::Duration) -> Self {
        self.renewal_after = renewal_after;
        self
    }

    /// Record attempt outcomes and durations in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<CertdMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one issuance attempt for `domain`
    pub async fn issue(
        &self,
        domain: &str,
        mode: IssuanceMode,
    ) -> Result<IssuedCertificate, AcmeError> {
        let start = Instant::now();
        if let Some(ref metrics) = self.metrics {
            metrics.record_attempt(mode.label());
        }

        let result = self.run(domain, mode).await;

        if let Some(ref metrics) = self.metrics {
            match result {
                Ok(_) => metrics.record_success(mode.label(), start.elapsed().as_secs_f64()),
                Err(_) => metrics.record_failure(mode.label()),
            }
        }

        match result {
            Ok(ref issued) => info!(
                domain = %domain,
                mode = %mode,
                elapsed_secs = start.elapsed().as_secs(),
                renewal_at = %issued.renewal_at,
                "Certificate issued"
            ),
            Err(ref e) => warn!(
                domain = %domain,
                mode = %mode,
                error = %e,
                "Certificate issuance attempt failed"
            ),
        }

        result
    }

    async fn run(&self, domain: &str, mode: IssuanceMode) -> Result<IssuedCertificate, AcmeError> {
        info!(domain = %domain, mode = %mode, "Starting certificate issuance");

        let mut order = self.authority.new_order(domain).await?;
        let csr = CsrMaterial::generate(domain)?;

        // Publish challenge material for every authorization still pending
        let mut pending = Vec::new();
        for authz in order.authorizations().await? {
            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %authz.domain, "Authorization already valid, skipping");
                continue;
            }

            let challenge = authz
                .http01()
                .cloned()
                .ok_or_else(|| AcmeError::ChallengeUnavailable(domain.to_string()))?;

            self.store
                .upsert(
                    domain,
                    RecordPatch::publish_challenge(
                        challenge.token.as_str(),
                        challenge.key_authorization.as_str(),
                    ),
                )
                .await?;

            debug!(
                domain = %domain,
                token = %challenge.token,
                "Published HTTP-01 challenge"
            );
            pending.push((authz.domain, challenge));
        }

        if !pending.is_empty() {
            debug!(
                domain = %domain,
                settle_secs = self.settle_delay.as_secs(),
                "Waiting for challenge to propagate"
            );
            tokio::time::sleep(self.settle_delay).await;

            for (authz_domain, challenge) in &pending {
                order.set_challenge_ready(&challenge.url).await?;
                order.wait_authorization_valid(authz_domain).await?;
            }
        }

        order.finalize(&csr.der).await?;

        if mode.is_renewal() {
            order.wait_valid().await?;
            tokio::time::sleep(RENEWAL_REFRESH_PAUSE).await;
            let status = order.refresh().await?;
            debug!(domain = %domain, status = ?status, "Re-fetched renewal order");
        }

        let certificate_pem = order
            .certificate()
            .await?
            .ok_or_else(|| AcmeError::CertificateUnavailable(domain.to_string()))?;

        let issued_at = Utc::now();
        let renewal_at = issued_at + self.renewal_after;

        self.store
            .upsert(domain, RecordPatch::issued(issued_at, renewal_at))
            .await?;

        // The record already carries the new dates, so a renewal that fails
        // here is not picked up again until the next renewal date
        if let Err(e) = self
            .installer
            .install(InstallRequest::for_domain(
                domain,
                certificate_pem.as_str(),
                csr.private_key_pem.as_str(),
            ))
            .await
        {
            error!(
                domain = %domain,
                mode = %mode,
                renewal_at = %renewal_at,
                error = %e,
                "Certificate recorded as issued but installation failed"
            );
            return Err(e);
        }

        Ok(IssuedCertificate {
            domain: domain.to_string(),
            certificate_pem,
            private_key_pem: csr.private_key_pem,
            issued_at,
            renewal_at,
        })
    }
}

impl fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateIssuer")
            .field("settle_delay", &self.settle_delay)
            .field("renewal_after_days", &self.renewal_after.num_days())
            .field("has_metrics", &self.metrics.is_some())
            .finish()
    }
}
