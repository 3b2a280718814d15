//! Domain certificate records and the record store interface.
//!
//! The record store is the only coordination point between cluster nodes.
//! Every mutation is a [`RecordPatch`] applied by the store as one write, so
//! readers see either the previous or the next record, never a mix.
//!
//! [`LocalRecordStore`] is a single-process implementation with an optional
//! disk backing; clustered deployments plug in their replicated store through
//! [`RecordStore`].

use std::fmt;
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod local;

pub use local::LocalRecordStore;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by record store and disk storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize/deserialize data
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Domain name cannot be used as a storage key
    #[error("Invalid domain name: '{0}'")]
    InvalidDomain(String),

    /// The change feed dropped events because the consumer fell behind
    #[error("Change feed lagged, {skipped} events skipped")]
    FeedLagged { skipped: u64 },

    /// The change feed terminated and must be re-subscribed
    #[error("Change feed closed")]
    FeedClosed,

    /// The backing store could not be reached
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error ends a change-feed subscription
    pub fn is_feed_fatal(&self) -> bool {
        matches!(self, StoreError::FeedClosed)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Certificate state for one domain
///
/// Serialized with the record store's camelCase field names. Missing fields
/// deserialize as empty, so partially-written records from other writers are
/// still readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCertificateRecord {
    /// Primary key
    pub domain: String,
    /// HTTP-01 token currently being served
    #[serde(default)]
    pub challenge_token: Option<String>,
    /// Exact body the validator expects at the token URL
    #[serde(default)]
    pub challenge_content: Option<String>,
    /// When the currently held certificate was issued
    #[serde(default)]
    pub issue_date: Option<DateTime<Utc>>,
    /// When the currently held certificate should be renewed
    #[serde(default)]
    pub renewal_date: Option<DateTime<Utc>>,
    /// An issuance or renewal attempt is underway
    #[serde(default)]
    pub in_progress: bool,
}

impl DomainCertificateRecord {
    /// A freshly registered record with only the domain set
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            challenge_token: None,
            challenge_content: None,
            issue_date: None,
            renewal_date: None,
            in_progress: false,
        }
    }

    /// No challenge is published and no attempt is running
    pub fn is_idle(&self) -> bool {
        self.challenge_token.is_none() && self.challenge_content.is_none() && !self.in_progress
    }

    /// A registered domain that has never started issuance
    pub fn is_newly_registered(&self) -> bool {
        !self.domain.is_empty()
            && self.challenge_token.is_none()
            && self.issue_date.is_none()
            && !self.in_progress
    }

    /// The renewal date has passed
    pub fn is_renewal_due(&self, now: DateTime<Utc>) -> bool {
        self.renewal_date.is_some_and(|date| date < now)
    }

    /// Summarize the record for status reporting
    pub fn status(&self, now: DateTime<Utc>) -> RecordStatus {
        if self.in_progress {
            RecordStatus::InProgress
        } else if self.challenge_token.is_some() {
            RecordStatus::Challenging
        } else if self.is_renewal_due(now) {
            RecordStatus::RenewalDue
        } else if self.issue_date.is_some() {
            RecordStatus::Issued
        } else {
            RecordStatus::Unissued
        }
    }

    /// Apply a patch, leaving untouched fields as they are
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(ref token) = patch.challenge_token {
            self.challenge_token = token.clone();
        }
        if let Some(ref content) = patch.challenge_content {
            self.challenge_content = content.clone();
        }
        if let Some(issue_date) = patch.issue_date {
            self.issue_date = issue_date;
        }
        if let Some(renewal_date) = patch.renewal_date {
            self.renewal_date = renewal_date;
        }
        if let Some(in_progress) = patch.in_progress {
            self.in_progress = in_progress;
        }
    }
}

/// Coarse record state, as shown by `sentinel-certd status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Unissued,
    InProgress,
    Challenging,
    Issued,
    RenewalDue,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordStatus::Unissued => "unissued",
            RecordStatus::InProgress => "in-progress",
            RecordStatus::Challenging => "challenging",
            RecordStatus::Issued => "issued",
            RecordStatus::RenewalDue => "renewal-due",
        };
        write!(f, "{}", name)
    }
}

/// A partial update to a record
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub challenge_token: Option<Option<String>>,
    pub challenge_content: Option<Option<String>>,
    pub issue_date: Option<Option<DateTime<Utc>>>,
    pub renewal_date: Option<Option<DateTime<Utc>>>,
    pub in_progress: Option<bool>,
}

impl RecordPatch {
    /// Flag an attempt as underway
    pub fn mark_in_progress() -> Self {
        Self {
            in_progress: Some(true),
            ..Default::default()
        }
    }

    /// Publish challenge material, leaving every other field untouched
    pub fn publish_challenge(token: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            challenge_token: Some(Some(token.into())),
            challenge_content: Some(Some(content.into())),
            ..Default::default()
        }
    }

    /// Record a completed issuance: clear the challenge and the in-progress
    /// flag and set both dates in one write
    pub fn issued(issue_date: DateTime<Utc>, renewal_date: DateTime<Utc>) -> Self {
        Self {
            challenge_token: Some(None),
            challenge_content: Some(None),
            issue_date: Some(Some(issue_date)),
            renewal_date: Some(Some(renewal_date)),
            in_progress: Some(false),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Conditional search over records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    /// Records whose `challenge_token` equals the given token
    ChallengeToken(String),
    /// Records whose `renewal_date` is before `now`
    RenewalDue { now: DateTime<Utc> },
    /// Registered records that never started issuance
    AwaitingIssuance,
}

impl RecordFilter {
    /// Whether `record` satisfies this filter
    pub fn matches(&self, record: &DomainCertificateRecord) -> bool {
        match self {
            RecordFilter::ChallengeToken(token) => {
                record.challenge_token.as_deref() == Some(token.as_str())
            }
            RecordFilter::RenewalDue { now } => record.is_renewal_due(*now),
            RecordFilter::AwaitingIssuance => record.is_newly_registered(),
        }
    }
}

/// One change-feed event carrying the record's new value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub value: DomainCertificateRecord,
}

/// Live stream of change events
///
/// The stream ends, or yields [`StoreError::FeedClosed`], when the
/// subscription terminates. Any other error item concerns a single event.
pub type ChangeFeed = BoxStream<'static, Result<ChangeEvent, StoreError>>;

// ============================================================================
// Record Store
// ============================================================================

/// Replicated per-domain record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point lookup by domain
    async fn get(&self, domain: &str) -> Result<Option<DomainCertificateRecord>, StoreError>;

    /// Conditional search
    async fn search(&self, filter: &RecordFilter)
        -> Result<Vec<DomainCertificateRecord>, StoreError>;

    /// Apply `patch` to the domain's record, creating the record if absent
    async fn upsert(
        &self,
        domain: &str,
        patch: RecordPatch,
    ) -> Result<DomainCertificateRecord, StoreError>;

    /// Set `in_progress` only if the current record is newly registered
    ///
    /// The check runs against the stored record, not the caller's copy, so a
    /// stale duplicate event for a domain that has since been issued loses.
    /// Returns whether this caller won the claim. Stores with conditional
    /// writes should override this with an atomic implementation; the
    /// default reads then writes and leaves a window in which two callers
    /// can both win.
    async fn claim(&self, domain: &str) -> Result<bool, StoreError> {
        if let Some(record) = self.get(domain).await? {
            if !record.is_newly_registered() {
                return Ok(false);
            }
        }
        self.upsert(domain, RecordPatch::mark_in_progress()).await?;
        Ok(true)
    }

    /// Subscribe to the live change feed
    async fn subscribe(&self) -> Result<ChangeFeed, StoreError>;
}
