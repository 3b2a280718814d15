//! ACME client backed by instant-acme
//!
//! Implements [`CertificateAuthority`] against a real ACME directory
//! (Let's Encrypt production by default). Account credentials are created
//! once and reused from [`DiskStorage`] afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{Account, ChallengeType, Identifier, NewAccount, NewOrder};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::authority::{
    Authorization, AuthorizationStatus, AuthorityOrder, CertificateAuthority, ChallengeKind,
    ChallengeOffer, OrderStatus,
};
use super::error::AcmeError;
use super::storage::DiskStorage;

/// Timeout for an authorization to become valid after the challenge is ready
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for order state transitions and certificate download
const ORDER_TIMEOUT: Duration = Duration::from_secs(120);

/// First polling interval; doubles up to [`MAX_POLL_INTERVAL`]
const INITIAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// ACME client for a single account
pub struct LetsEncryptAuthority {
    /// ACME account (lazy initialized)
    account: RwLock<Option<Account>>,
    /// Contact email for account creation
    email: String,
    /// ACME directory URL
    directory_url: String,
    /// Account credentials storage
    storage: Arc<DiskStorage>,
}

impl LetsEncryptAuthority {
    /// Create an authority for `directory_url`
    ///
    /// The account is loaded from, or created and saved to, `storage` on the
    /// first order.
    pub fn new(
        email: impl Into<String>,
        directory_url: impl Into<String>,
        storage: Arc<DiskStorage>,
    ) -> Self {
        Self {
            account: RwLock::new(None),
            email: email.into(),
            directory_url: directory_url.into(),
            storage,
        }
    }

    /// ACME directory this authority talks to
    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Load the account from stored credentials or create a new one
    async fn ensure_account(&self) -> Result<(), AcmeError> {
        if self.account.read().await.is_some() {
            return Ok(());
        }

        let mut slot = self.account.write().await;
        if slot.is_some() {
            return Ok(());
        }

        if let Some(creds_json) = self.storage.load_credentials_json()? {
            info!("Loading existing ACME account from storage");

            let credentials: instant_acme::AccountCredentials = serde_json::from_str(&creds_json)
                .map_err(|e| {
                    AcmeError::AccountCreation(format!("Failed to deserialize credentials: {}", e))
                })?;

            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

            *slot = Some(account);
            return Ok(());
        }

        info!(
            email = %self.email,
            directory = %self.directory_url,
            "Creating new ACME account"
        );

        let contact = format!("mailto:{}", self.email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

        let creds_json = serde_json::to_string_pretty(&credentials).map_err(|e| {
            AcmeError::AccountCreation(format!("Failed to serialize credentials: {}", e))
        })?;
        self.storage.save_credentials_json(&creds_json)?;

        *slot = Some(account);
        info!("ACME account created successfully");
        Ok(())
    }
}

#[async_trait]
impl CertificateAuthority for LetsEncryptAuthority {
    async fn new_order(&self, domain: &str) -> Result<Box<dyn AuthorityOrder>, AcmeError> {
        self.ensure_account().await?;

        let guard = self.account.read().await;
        let account = guard
            .as_ref()
            .ok_or_else(|| AcmeError::AccountCreation("Account not initialized".to_string()))?;

        let identifiers = [Identifier::Dns(domain.to_string())];
        let order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        debug!(domain = %domain, "Created ACME order");

        Ok(Box::new(AcmeOrder {
            domain: domain.to_string(),
            order,
        }))
    }
}

impl std::fmt::Debug for LetsEncryptAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LetsEncryptAuthority")
            .field("directory_url", &self.directory_url)
            .field(
                "has_account",
                &self
                    .account
                    .try_read()
                    .map(|a| a.is_some())
                    .unwrap_or(false),
            )
            .finish()
    }
}

/// An instant-acme order for one domain
struct AcmeOrder {
    domain: String,
    order: instant_acme::Order,
}

impl AcmeOrder {
    async fn status(&mut self) -> Result<OrderStatus, AcmeError> {
        let state = self.order.refresh().await?;
        Ok(map_order_status(state.status))
    }
}

#[async_trait]
impl AuthorityOrder for AcmeOrder {
    async fn authorizations(&mut self) -> Result<Vec<Authorization>, AcmeError> {
        let authorizations = self.order.authorizations().await.map_err(|e| {
            AcmeError::OrderCreation(format!("Failed to get authorizations: {}", e))
        })?;

        let mut result = Vec::with_capacity(authorizations.len());
        for authz in authorizations {
            #[allow(unreachable_patterns)]
            let domain = match &authz.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => self.domain.clone(),
            };

            let status = if authz.status == instant_acme::AuthorizationStatus::Valid {
                AuthorizationStatus::Valid
            } else if authz.status == instant_acme::AuthorizationStatus::Invalid {
                AuthorizationStatus::Invalid
            } else {
                AuthorizationStatus::Pending
            };

            let challenges = authz
                .challenges
                .iter()
                .map(|challenge| ChallengeOffer {
                    kind: map_challenge_type(&challenge.r#type),
                    token: challenge.token.clone(),
                    url: challenge.url.clone(),
                    key_authorization: self.order.key_authorization(challenge).as_str().to_string(),
                })
                .collect();

            result.push(Authorization {
                domain,
                status,
                challenges,
            });
        }

        Ok(result)
    }

    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AcmeError> {
        debug!(domain = %self.domain, challenge_url = %challenge_url, "Setting challenge ready");
        self.order
            .set_challenge_ready(challenge_url)
            .await
            .map_err(|e| AcmeError::ChallengeValidation {
                domain: self.domain.clone(),
                message: e.to_string(),
            })
    }

    async fn wait_authorization_valid(&mut self, domain: &str) -> Result<(), AcmeError> {
        let deadline = Instant::now() + AUTHORIZATION_TIMEOUT;
        let mut poll = INITIAL_POLL_INTERVAL;

        loop {
            let status = self
                .authorizations()
                .await?
                .into_iter()
                .find(|authz| authz.domain == domain)
                .map(|authz| authz.status)
                .ok_or_else(|| AcmeError::ChallengeValidation {
                    domain: domain.to_string(),
                    message: "Authorization missing from order".to_string(),
                })?;

            match status {
                AuthorizationStatus::Valid => {
                    info!(domain = %domain, "Authorization is valid");
                    return Ok(());
                }
                AuthorizationStatus::Invalid => {
                    warn!(domain = %domain, "Authorization became invalid");
                    return Err(AcmeError::ChallengeValidation {
                        domain: domain.to_string(),
                        message: "Authorization became invalid".to_string(),
                    });
                }
                AuthorizationStatus::Pending => {
                    if Instant::now() > deadline {
                        return Err(AcmeError::Timeout(format!(
                            "Authorization for '{}' did not become valid",
                            domain
                        )));
                    }
                    trace!(domain = %domain, poll_secs = poll.as_secs(), "Authorization pending");
                    tokio::time::sleep(poll).await;
                    poll = (poll * 2).min(MAX_POLL_INTERVAL);
                }
            }
        }
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AcmeError> {
        info!(domain = %self.domain, "Finalizing certificate order");
        self.order
            .finalize(csr_der)
            .await
            .map_err(|e| AcmeError::Finalization(e.to_string()))
    }

    async fn wait_valid(&mut self) -> Result<(), AcmeError> {
        let deadline = Instant::now() + ORDER_TIMEOUT;
        let mut poll = INITIAL_POLL_INTERVAL;

        loop {
            match self.status().await? {
                OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::Finalization("Order became invalid".to_string()));
                }
                status => {
                    if Instant::now() > deadline {
                        return Err(AcmeError::Timeout(format!(
                            "Order for '{}' stuck in {:?}",
                            self.domain, status
                        )));
                    }
                    trace!(domain = %self.domain, status = ?status, "Order not valid yet");
                    tokio::time::sleep(poll).await;
                    poll = (poll * 2).min(MAX_POLL_INTERVAL);
                }
            }
        }
    }

    async fn refresh(&mut self) -> Result<OrderStatus, AcmeError> {
        self.status().await
    }

    async fn certificate(&mut self) -> Result<Option<String>, AcmeError> {
        let deadline = Instant::now() + ORDER_TIMEOUT;

        loop {
            let chain = self.order.certificate().await.map_err(|e| {
                AcmeError::Finalization(format!("Failed to get certificate: {}", e))
            })?;

            match chain {
                Some(chain) => return Ok(Some(chain)),
                None if Instant::now() > deadline => return Ok(None),
                None => {
                    trace!(domain = %self.domain, "Certificate not yet available");
                    tokio::time::sleep(INITIAL_POLL_INTERVAL).await;
                }
            }
        }
    }
}

fn map_order_status(status: instant_acme::OrderStatus) -> OrderStatus {
    match status {
        instant_acme::OrderStatus::Pending => OrderStatus::Pending,
        instant_acme::OrderStatus::Ready => OrderStatus::Ready,
        instant_acme::OrderStatus::Processing => OrderStatus::Processing,
        instant_acme::OrderStatus::Valid => OrderStatus::Valid,
        instant_acme::OrderStatus::Invalid => OrderStatus::Invalid,
    }
}

#[allow(unreachable_patterns)]
fn map_challenge_type(kind: &ChallengeType) -> ChallengeKind {
    match kind {
        ChallengeType::Http01 => ChallengeKind::Http01,
        ChallengeType::Dns01 => ChallengeKind::Dns01,
        ChallengeType::TlsAlpn01 => ChallengeKind::TlsAlpn01,
        _ => ChallengeKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_type_mapping() {
        assert_eq!(map_challenge_type(&ChallengeType::Http01), ChallengeKind::Http01);
        assert_eq!(map_challenge_type(&ChallengeType::Dns01), ChallengeKind::Dns01);
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(
            map_order_status(instant_acme::OrderStatus::Ready),
            OrderStatus::Ready
        );
        assert_eq!(
            map_order_status(instant_acme::OrderStatus::Invalid),
            OrderStatus::Invalid
        );
    }

    #[tokio::test]
    async fn test_debug_without_account() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(DiskStorage::new(temp_dir.path()).unwrap());
        let authority = LetsEncryptAuthority::new(
            "admin@example.com",
            sentinel_config::LETSENCRYPT_STAGING,
            storage,
        );
        let debug = format!("{:?}", authority);
        assert!(debug.contains("has_account: false"));
        assert!(debug.contains("acme-staging"));
    }
}
