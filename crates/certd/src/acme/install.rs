//! Certificate installation into the serving TLS stack

use std::io::BufReader;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::error::AcmeError;
use super::storage::{DiskStorage, InstalledCertificateMeta};

/// A certificate handed to the installer
#[derive(Clone)]
pub struct InstallRequest {
    /// Name the certificate is installed under (the domain)
    pub name: String,
    /// PEM-encoded certificate chain
    pub certificate: String,
    /// PEM-encoded private key
    pub private_key: String,
    pub is_authority: bool,
    pub replicated: bool,
}

impl InstallRequest {
    /// A leaf certificate for a domain, distributed to every node
    pub fn for_domain(
        domain: impl Into<String>,
        certificate: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            name: domain.into(),
            certificate: certificate.into(),
            private_key: private_key.into(),
            is_authority: false,
            replicated: true,
        }
    }
}

impl std::fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallRequest")
            .field("name", &self.name)
            .field("is_authority", &self.is_authority)
            .field("replicated", &self.replicated)
            .finish_non_exhaustive()
    }
}

/// Installs issued certificates where the TLS stack picks them up
#[async_trait]
pub trait CertificateInstaller: Send + Sync {
    async fn install(&self, request: InstallRequest) -> Result<(), AcmeError>;
}

/// Installer writing certificates into [`DiskStorage`]
#[derive(Debug, Clone)]
pub struct DiskInstaller {
    storage: Arc<DiskStorage>,
}

impl DiskInstaller {
    /// Install into `storage`'s per-domain certificate directory
    pub fn new(storage: Arc<DiskStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CertificateInstaller for DiskInstaller {
    async fn install(&self, request: InstallRequest) -> Result<(), AcmeError> {
        let expires = check_pem(&request)?;

        let meta = InstalledCertificateMeta {
            installed: Utc::now(),
            expires,
            is_authority: request.is_authority,
            replicated: request.replicated,
        };

        self.storage
            .save_certificate(&request.name, &request.certificate, &request.private_key, &meta)
            .map_err(|e| AcmeError::Install(format!("{}: {}", request.name, e)))?;

        info!(
            domain = %request.name,
            expires = ?expires,
            "Installed certificate"
        );
        Ok(())
    }
}

/// Check both PEM blobs parse and return the leaf's `notAfter`
fn check_pem(request: &InstallRequest) -> Result<Option<DateTime<Utc>>, AcmeError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(request.certificate.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AcmeError::Install(format!("{}: {}", request.name, e)))?;

    let leaf = certs.first().ok_or_else(|| {
        AcmeError::Install(format!("{}: No certificates found in chain", request.name))
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(request.private_key.as_bytes()))
        .map_err(|e| AcmeError::Install(format!("{}: {}", request.name, e)))?
        .ok_or_else(|| AcmeError::Install(format!("{}: No private key found", request.name)))?;

    let expires = leaf_expiry(leaf.as_ref());
    debug!(domain = %request.name, chain_len = certs.len(), expires = ?expires, "Checked certificate PEM");
    Ok(expires)
}

fn leaf_expiry(der: &[u8]) -> Option<DateTime<Utc>> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(der).ok()?;
    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};
    use tempfile::TempDir;

    fn self_signed(domain: &str) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![domain.to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[tokio::test]
    async fn test_install_writes_certificate() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(DiskStorage::new(temp_dir.path()).unwrap());
        let installer = DiskInstaller::new(Arc::clone(&storage));

        let (cert, key) = self_signed("example.com");
        installer
            .install(InstallRequest::for_domain("example.com", cert.clone(), key))
            .await
            .unwrap();

        let stored = storage.load_certificate("example.com").unwrap().unwrap();
        assert_eq!(stored.cert_pem, cert);
        assert!(stored.meta.replicated);
        assert!(!stored.meta.is_authority);
        assert!(stored.meta.expires.is_some());
    }

    #[tokio::test]
    async fn test_install_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(DiskStorage::new(temp_dir.path()).unwrap());
        let installer = DiskInstaller::new(Arc::clone(&storage));

        let (_, key) = self_signed("example.com");
        let err = installer
            .install(InstallRequest::for_domain("example.com", "not a pem", key))
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::Install(_)));
        assert!(storage.load_certificate("example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_install_requires_private_key() {
        let temp_dir = TempDir::new().unwrap();
        let installer = DiskInstaller::new(Arc::new(DiskStorage::new(temp_dir.path()).unwrap()));

        let (cert, _) = self_signed("example.com");
        let err = installer
            .install(InstallRequest::for_domain("example.com", cert, ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No private key found"));
    }

    #[test]
    fn test_request_debug_hides_key() {
        let request = InstallRequest::for_domain("example.com", "cert", "secret-key");
        assert!(!format!("{:?}", request).contains("secret-key"));
    }
}
