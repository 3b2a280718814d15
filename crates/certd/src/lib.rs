//! Sentinel certd Library
//!
//! Clustered ACME HTTP-01 certificate coordinator. Every node runs the same
//! process against a shared record store; exactly one node issues and renews
//! certificates, and any node can answer the CA's challenge requests.
//!
//! - **Leader election**: static first-member election over cluster
//!   membership ([`cluster`])
//! - **Issuance**: the per-domain ACME order state machine with challenge
//!   material published in the record store ([`acme`])
//! - **Orchestration**: new-domain and renewal triggers with retry and
//!   per-node stagger ([`acme::LifecycleOrchestrator`])
//! - **Records**: the record store interface and a local implementation
//!   ([`store`])
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sentinel_certd::acme::{ChallengeOutcome, ChallengeResponder};
//! use sentinel_certd::store::LocalRecordStore;
//!
//! let responder = ChallengeResponder::new(Arc::new(LocalRecordStore::in_memory()));
//! match responder.handle(request).await {
//!     ChallengeOutcome::Respond(response) => send(response),
//!     ChallengeOutcome::Forward(request) => next.handle(request),
//! }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod app;
pub mod cluster;
pub mod metrics;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use acme::{
    AcmeError, CertificateIssuer, ChallengeResponder, IssuanceMode, LifecycleOrchestrator,
    OrchestratorHandle,
};
pub use app::CertdApp;
pub use cluster::{Election, LeaderElector, StaticMembership};
pub use metrics::CertdMetrics;
pub use store::{DomainCertificateRecord, LocalRecordStore, RecordStore, StoreError};
