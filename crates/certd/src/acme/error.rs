//! ACME error types

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while issuing or renewing a certificate
///
/// Every variant aborts the current attempt. Whether the attempt is retried
/// is decided by the caller's retry policy, not by the variant.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Failed to create or load the ACME account
    #[error("Failed to create ACME account: {0}")]
    AccountCreation(String),

    /// Failed to create the certificate order
    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    /// The authority offered no HTTP-01 challenge
    #[error("No HTTP-01 challenge available for domain '{0}'")]
    ChallengeUnavailable(String),

    /// Challenge validation failed
    #[error("Challenge validation failed for domain '{domain}': {message}")]
    ChallengeValidation { domain: String, message: String },

    /// Certificate finalization failed
    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    /// The order completed without a certificate to download
    #[error("No certificate available for domain '{0}'")]
    CertificateUnavailable(String),

    /// Key or CSR generation failed
    #[error("Failed to build certificate request: {0}")]
    Csr(String),

    /// ACME protocol error from the client library
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Installing the issued certificate failed
    #[error("Failed to install certificate: {0}")]
    Install(String),

    /// Record store operation failed
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

impl From<instant_acme::Error> for AcmeError {
    fn from(e: instant_acme::Error) -> Self {
        AcmeError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        insta::assert_snapshot!(
            AcmeError::ChallengeUnavailable("example.com".to_string()).to_string(),
            @"No HTTP-01 challenge available for domain 'example.com'"
        );
        insta::assert_snapshot!(
            AcmeError::from(StoreError::FeedClosed).to_string(),
            @"Record store error: Change feed closed"
        );
    }
}
