//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use idem_core::{
    IdempotencyError, IdempotencyRecord, InMemoryStore, ManualClock, PersistenceStore,
    Precondition, StoreError, StoreResult,
};

/// Error type of the wrapped application work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("application failure: {0}")]
    Failed(String),
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
}

impl AppError {
    pub fn idempotency(&self) -> Option<&IdempotencyError> {
        match self {
            Self::Idempotency(e) => Some(e),
            Self::Failed(_) => None,
        }
    }
}

/// Fixed starting instant for deterministic clocks.
pub fn start() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at(start()))
}

/// Counts calls that reach the wrapped store.
#[derive(Debug, Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingStore {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceStore for CountingStore {
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_in_progress(record, precondition).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_record(record).await
    }

    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_record(record).await
    }
}

/// A store whose backend is unreachable.
#[derive(Debug, Default)]
pub struct UnreachableStore;

#[async_trait]
impl PersistenceStore for UnreachableStore {
    async fn put_in_progress(&self, _: &IdempotencyRecord, _: Precondition) -> StoreResult<()> {
        Err(StoreError::backend("put_in_progress", "connection refused"))
    }

    async fn get(&self, _: &str) -> StoreResult<Option<IdempotencyRecord>> {
        Err(StoreError::backend("get", "connection refused"))
    }

    async fn update_record(&self, _: &IdempotencyRecord) -> StoreResult<()> {
        Err(StoreError::backend("update_record", "connection refused"))
    }

    async fn delete_record(&self, _: &IdempotencyRecord) -> StoreResult<()> {
        Err(StoreError::backend("delete_record", "connection refused"))
    }
}

/// Serves a fixed snapshot from `get`, as a reader lagging behind another
/// writer would see it. Writes go to the real store.
#[derive(Debug)]
pub struct StaleReadStore {
    pub inner: InMemoryStore,
    pub snapshot: IdempotencyRecord,
}

#[async_trait]
impl PersistenceStore for StaleReadStore {
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        self.inner.put_in_progress(record, precondition).await
    }

    async fn get(&self, _: &str) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(Some(self.snapshot.clone()))
    }

    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.inner.update_record(record).await
    }

    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.inner.delete_record(record).await
    }
}
