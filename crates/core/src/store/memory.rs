//! In-process store for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{owns_slot, PersistenceStore, Precondition};
use crate::error::{StoreError, StoreResult};
use crate::record::IdempotencyRecord;

/// Records in a `HashMap` behind a tokio `RwLock`.
///
/// Each operation takes the write lock for its whole check-and-set, which
/// makes every conditional write atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drop every record whose TTL passed before `now`. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let removed = before.saturating_sub(records.len());
        debug!(removed, "Purged expired idempotency records");
        removed
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if !precondition.admits(records.get(&record.idempotency_key)) {
            return Err(StoreError::item_already_exists(&record.idempotency_key));
        }
        records.insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.idempotency_key) {
            Some(stored) if owns_slot(stored, record) => {
                *stored = record.clone();
                Ok(())
            }
            Some(stored) => Err(StoreError::inconsistent_state(
                &record.idempotency_key,
                format!("slot is {} and no longer held by this execution", stored.status),
            )),
            None => Err(StoreError::inconsistent_state(
                &record.idempotency_key,
                "record disappeared before completion",
            )),
        }
    }

    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let key = &record.idempotency_key;
        if records.get(key).is_some_and(|stored| owns_slot(stored, record)) {
            records.remove(key);
        } else {
            debug!(key = %key, "Claim no longer held, leaving record in place");
        }
        Ok(())
    }
}
