//! Shared building blocks for the Sentinel certificate coordinator.
//!
//! - [`ids`]: identifier newtypes used across crates
//! - [`retry`]: bounded exponential-backoff retry for async operations

pub mod ids;
pub mod retry;

pub use ids::{IssuanceId, NodeName};
pub use retry::RetryPolicy;
