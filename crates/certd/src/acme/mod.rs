//! ACME certificate lifecycle
//!
//! Issues and renews domain-validated certificates through HTTP-01 across a
//! cluster of nodes sharing one record store.
//!
//! # Architecture
//!
//! - [`CertificateAuthority`] - ACME client interface; [`LetsEncryptAuthority`]
//!   implements it with `instant-acme`
//! - [`CertificateIssuer`] - drives one order from creation to an installed
//!   certificate, publishing challenge material in the record store
//! - [`ChallengeResponder`] - serves `/.well-known/acme-challenge/<token>` from
//!   the record store on every node
//! - [`CertificateInstaller`] - hands issued certificates to the TLS stack;
//!   [`DiskInstaller`] writes them into [`DiskStorage`]
//! - [`LifecycleOrchestrator`] - watches for new domains, runs the renewal
//!   timer, and spawns issuances on the leader
//!
//! # Example
//!
//! ```kdl
//! acme {
//!     email "admin@example.com"
//!     directory "production"
//!     storage "/var/lib/sentinel/certd"
//! }
//! ```
//!
//! # Challenge Flow
//!
//! 1. A domain record is created with only its name set
//! 2. The leader claims it (`in_progress`) and, after the per-node stagger,
//!    opens an order
//! 3. The issuer writes the token and key authorization into the record
//! 4. After the settle delay the CA is told the challenge is ready
//! 5. The CA requests `/.well-known/acme-challenge/<token>` from any node;
//!    [`ChallengeResponder`] answers from the record
//! 6. The order is finalized, the record is updated with issue and renewal
//!    dates, and the certificate is installed

mod authority;
mod challenge;
mod client;
mod csr;
mod error;
mod install;
mod issuer;
mod lifecycle;
mod storage;

pub use authority::{
    Authorization, AuthorizationStatus, AuthorityOrder, CertificateAuthority, ChallengeKind,
    ChallengeOffer, OrderStatus,
};
pub use challenge::{ChallengeOutcome, ChallengeResponder, ACME_CHALLENGE_PREFIX};
pub use client::LetsEncryptAuthority;
pub use csr::CsrMaterial;
pub use error::AcmeError;
pub use install::{CertificateInstaller, DiskInstaller, InstallRequest};
pub use issuer::{
    CertificateIssuer, IssuanceMode, IssuedCertificate, DEFAULT_RENEWAL_AFTER_DAYS,
    DEFAULT_SETTLE_DELAY,
};
pub use lifecycle::{
    InFlightGuard, InFlightRegistry, LifecycleOrchestrator, OrchestratorHandle,
    OrchestratorSettings,
};
pub use storage::{DiskStorage, InstalledCertificateMeta, StoredCertificate};
