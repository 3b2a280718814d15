//! Key pair and certificate signing request generation

use rcgen::{CertificateParams, KeyPair};

use super::error::AcmeError;

/// A fresh private key and the DER-encoded CSR built from it
pub struct CsrMaterial {
    pub der: Vec<u8>,
    pub private_key_pem: String,
}

impl CsrMaterial {
    /// Generate a new key pair and a CSR for a single domain
    pub fn generate(domain: &str) -> Result<Self, AcmeError> {
        let key_pair = KeyPair::generate()
            .map_err(|e| AcmeError::Csr(format!("Failed to generate key pair: {}", e)))?;

        let params = CertificateParams::new(vec![domain.to_string()])
            .map_err(|e| AcmeError::Csr(format!("Invalid certificate params: {}", e)))?;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::Csr(format!("Failed to serialize CSR: {}", e)))?;

        Ok(Self {
            der: csr.der().to_vec(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

impl std::fmt::Debug for CsrMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrMaterial")
            .field("der_len", &self.der.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_csr() {
        let csr = CsrMaterial::generate("example.com").unwrap();
        assert!(!csr.der.is_empty());
        assert!(csr.private_key_pem.contains("BEGIN PRIVATE KEY"));
        assert!(!format!("{:?}", csr).contains("PRIVATE"));
    }

    #[test]
    fn test_each_csr_has_its_own_key() {
        let a = CsrMaterial::generate("example.com").unwrap();
        let b = CsrMaterial::generate("example.com").unwrap();
        assert_ne!(a.private_key_pem, b.private_key_pem);
    }
}
