//! Interface to the ACME certificate authority client
//!
//! The issuer drives an order through these traits; the wire protocol lives
//! behind them ([`LetsEncryptAuthority`](super::LetsEncryptAuthority) for the
//! real thing, scripted fakes in tests).

use async_trait::async_trait;

use super::error::AcmeError;

/// Challenge variants an authority may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
    Other,
}

/// One challenge offered for an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOffer {
    pub kind: ChallengeKind,
    /// Token that appears in the challenge URL path
    pub token: String,
    /// Challenge URL used to tell the authority the challenge is ready
    pub url: String,
    /// Response body the validator expects (token + account key thumbprint)
    pub key_authorization: String,
}

/// Authorization status as reported by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
}

/// A domain-validation authorization attached to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub domain: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<ChallengeOffer>,
}

impl Authorization {
    /// The HTTP-01 challenge, if the authority offered one
    pub fn http01(&self) -> Option<&ChallengeOffer> {
        self.challenges
            .iter()
            .find(|c| c.kind == ChallengeKind::Http01)
    }
}

/// Order status as reported by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Account-holding ACME client session
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Load or create the account, then open a new order for `domain`
    async fn new_order(&self, domain: &str) -> Result<Box<dyn AuthorityOrder>, AcmeError>;
}

/// An open certificate order
#[async_trait]
pub trait AuthorityOrder: Send {
    /// Fetch the order's authorizations
    async fn authorizations(&mut self) -> Result<Vec<Authorization>, AcmeError>;

    /// Tell the authority the challenge at `challenge_url` can be validated
    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AcmeError>;

    /// Poll until the authorization for `domain` is valid
    async fn wait_authorization_valid(&mut self, domain: &str) -> Result<(), AcmeError>;

    /// Submit the DER-encoded CSR
    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AcmeError>;

    /// Poll until the order is valid (certificate issued)
    async fn wait_valid(&mut self) -> Result<(), AcmeError>;

    /// Re-fetch the order from the authority
    async fn refresh(&mut self) -> Result<OrderStatus, AcmeError>;

    /// Download the PEM certificate chain, `None` if it is not available
    async fn certificate(&mut self) -> Result<Option<String>, AcmeError>;
}
