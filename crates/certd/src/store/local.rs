//! Single-process record store.
//!
//! Keeps records in a concurrent map, publishes every write on a broadcast
//! change feed and, when opened over [`DiskStorage`], persists each record
//! before the write becomes visible.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, trace};

use super::{
    ChangeEvent, ChangeFeed, DomainCertificateRecord, RecordFilter, RecordPatch, RecordStore,
    StoreError,
};
use crate::acme::DiskStorage;

/// Change feed buffer; slower subscribers see `FeedLagged` past this
const CHANGE_FEED_CAPACITY: usize = 1024;

/// In-memory record store with an optional disk backing
pub struct LocalRecordStore {
    records: DashMap<String, DomainCertificateRecord>,
    changes: broadcast::Sender<DomainCertificateRecord>,
    storage: Option<Arc<DiskStorage>>,
}

impl LocalRecordStore {
    /// A store that lives only as long as the process
    pub fn in_memory() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: DashMap::new(),
            changes,
            storage: None,
        }
    }

    /// A store persisted to disk, loaded with every record already stored
    pub fn persistent(storage: Arc<DiskStorage>) -> Result<Self, StoreError> {
        let records = DashMap::new();
        for record in storage.load_records()? {
            records.insert(record.domain.clone(), record);
        }

        info!(
            records = records.len(),
            storage_path = %storage.base_path().display(),
            "Opened persistent record store"
        );

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            records,
            changes,
            storage: Some(storage),
        })
    }

    /// Register a domain with an empty record
    ///
    /// Returns `false` without publishing anything if the domain already has
    /// a record.
    pub fn register(&self, domain: &str) -> Result<bool, StoreError> {
        let record = match self.records.entry(domain.to_string()) {
            Entry::Occupied(_) => {
                debug!(domain = %domain, "Domain already registered");
                return Ok(false);
            }
            Entry::Vacant(vacant) => {
                let record = DomainCertificateRecord::new(domain);
                self.persist(&record)?;
                vacant.insert(record.clone());
                record
            }
        };

        info!(domain = %domain, "Registered domain");
        self.publish(record);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self, record: &DomainCertificateRecord) -> Result<(), StoreError> {
        match self.storage {
            Some(ref storage) => storage.save_record(record),
            None => Ok(()),
        }
    }

    fn publish(&self, record: DomainCertificateRecord) {
        // Err only means nobody is subscribed right now
        if self.changes.send(record).is_err() {
            trace!("No change feed subscribers");
        }
    }
}

impl Default for LocalRecordStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    async fn get(&self, domain: &str) -> Result<Option<DomainCertificateRecord>, StoreError> {
        Ok(self.records.get(domain).map(|r| r.value().clone()))
    }

    async fn search(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<DomainCertificateRecord>, StoreError> {
        let mut matches: Vec<DomainCertificateRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matches.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(matches)
    }

    async fn upsert(
        &self,
        domain: &str,
        patch: RecordPatch,
    ) -> Result<DomainCertificateRecord, StoreError> {
        let updated = {
            let mut entry = self
                .records
                .entry(domain.to_string())
                .or_insert_with(|| DomainCertificateRecord::new(domain));

            let mut next = entry.value().clone();
            next.apply(&patch);
            self.persist(&next)?;
            *entry = next.clone();
            next
        };

        trace!(domain = %domain, in_progress = updated.in_progress, "Upserted record");
        self.publish(updated.clone());
        Ok(updated)
    }

    /// Atomic compare-and-set under the map's entry lock
    async fn claim(&self, domain: &str) -> Result<bool, StoreError> {
        let claimed = {
            let mut entry = self
                .records
                .entry(domain.to_string())
                .or_insert_with(|| DomainCertificateRecord::new(domain));

            if !entry.is_newly_registered() {
                return Ok(false);
            }

            let mut next = entry.value().clone();
            next.in_progress = true;
            self.persist(&next)?;
            *entry = next.clone();
            next
        };

        debug!(domain = %domain, "Claimed domain for issuance");
        self.publish(claimed);
        Ok(true)
    }

    async fn subscribe(&self) -> Result<ChangeFeed, StoreError> {
        let rx = self.changes.subscribe();
        let feed = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(value) => Some((Ok(ChangeEvent { value }), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    Some((Err(StoreError::FeedLagged { skipped }), rx))
                }
                Err(RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(feed))
    }
}
