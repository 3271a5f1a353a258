//! Local cache in front of a remote store.
//!
//! Uses moka for bounded, LRU-evicting caching of `Completed` records so that
//! replays of hot keys skip the remote round trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::debug;

use super::{PersistenceStore, Precondition};
use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::record::{IdempotencyRecord, RecordStatus};

/// Decorator holding `Completed` records of `S` in a local LRU cache.
pub struct CachingStore<S> {
    inner: S,
    cache: Cache<String, IdempotencyRecord>,
    clock: Arc<dyn Clock>,
}

impl<S: PersistenceStore> CachingStore<S> {
    /// Wrap `inner` with a cache of at most `max_capacity` entries, each
    /// evicted after `ttl` regardless of the record's own expiry.
    #[must_use]
    pub fn new(inner: S, max_capacity: u64, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            clock,
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of cached records.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn cached_live(&self, key: &str, now: DateTime<Utc>) -> Option<IdempotencyRecord> {
        let record = self.cache.get(key).await?;
        if record.is_expired(now) {
            debug!(key = %key, "Evicting expired record from local cache");
            self.cache.invalidate(key).await;
            return None;
        }
        Some(record)
    }

    async fn remember(&self, record: &IdempotencyRecord) {
        if record.status == RecordStatus::Completed {
            self.cache
                .insert(record.idempotency_key.clone(), record.clone())
                .await;
        }
    }
}

#[async_trait]
impl<S: PersistenceStore> PersistenceStore for CachingStore<S> {
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        if self
            .cached_live(&record.idempotency_key, precondition.now())
            .await
            .is_some()
        {
            debug!(key = %record.idempotency_key, "Local cache hit on claim");
            return Err(StoreError::item_already_exists(&record.idempotency_key));
        }
        self.inner.put_in_progress(record, precondition).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let now = self.clock.now();
        if let Some(record) = self.cached_live(key, now).await {
            debug!(key = %key, "Local cache hit");
            return Ok(Some(record));
        }

        let record = self.inner.get(key).await?;
        if let Some(found) = record.as_ref().filter(|r| !r.is_expired(now)) {
            self.remember(found).await;
        }
        Ok(record)
    }

    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.inner.update_record(record).await?;
        self.remember(record).await;
        Ok(())
    }

    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.cache.invalidate(&record.idempotency_key).await;
        self.inner.delete_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_000, 0).single().unwrap_or_default()
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, CachingStore<Arc<InMemoryStore>>) {
        let inner = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(start()));
        let store = CachingStore::new(
            Arc::clone(&inner),
            16,
            Duration::from_secs(3600),
            clock.clone(),
        );
        (inner, clock, store)
    }

    async fn complete(store: &CachingStore<Arc<InMemoryStore>>, key: &str) -> IdempotencyRecord {
        let claim = IdempotencyRecord::in_progress(
            key,
            None,
            start(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        assert!(store
            .put_in_progress(&claim, Precondition::Vacant { now: start() })
            .await
            .is_ok());
        let done = claim.completed("\"ok\"".to_string(), start(), Duration::from_secs(60));
        assert!(store.update_record(&done).await.is_ok());
        done
    }

    #[tokio::test]
    async fn test_completed_record_is_cached() {
        let (inner, _clock, store) = setup();
        let done = complete(&store, "k").await;
        assert_eq!(store.entry_count().await, 1);

        // Served locally even when the remote copy is gone.
        inner.purge_expired(start() + chrono::Duration::seconds(120)).await;
        assert_eq!(store.get("k").await.ok().flatten(), Some(done));
    }

    #[tokio::test]
    async fn test_claim_short_circuits_on_cached_record() {
        let (_inner, _clock, store) = setup();
        complete(&store, "k").await;

        let retry = IdempotencyRecord::in_progress(
            "k",
            None,
            start(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        let result = store
            .put_in_progress(&retry, Precondition::Vacant { now: start() })
            .await;
        assert!(matches!(result, Err(StoreError::ItemAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_in_progress_is_not_cached() {
        let (_inner, _clock, store) = setup();
        let claim = IdempotencyRecord::in_progress(
            "k",
            None,
            start(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        assert!(store
            .put_in_progress(&claim, Precondition::Vacant { now: start() })
            .await
            .is_ok());
        assert!(store.get("k").await.ok().flatten().is_some());
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_invalidated() {
        let (_inner, clock, store) = setup();
        complete(&store, "k").await;

        clock.advance(Duration::from_secs(61));
        let found = store.get("k").await.ok().flatten();
        // Remote still returns the expired record; the cache no longer holds it.
        assert!(found.is_some_and(|r| r.is_expired(clock.now())));
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_remote_get_populates_cache() {
        let (inner, _clock, store) = setup();
        let claim = IdempotencyRecord::in_progress(
            "k",
            None,
            start(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        assert!(inner
            .put_in_progress(&claim, Precondition::Vacant { now: start() })
            .await
            .is_ok());
        let done = claim.completed("1".to_string(), start(), Duration::from_secs(60));
        assert!(inner.update_record(&done).await.is_ok());

        assert_eq!(store.entry_count().await, 0);
        assert!(store.get("k").await.ok().flatten().is_some());
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_invalidates() {
        let (inner, _clock, store) = setup();
        let done = complete(&store, "k").await;
        assert!(store.delete_record(&done).await.is_ok());
        assert_eq!(store.entry_count().await, 0);
        // The completed remote record is kept.
        assert!(inner.get("k").await.ok().flatten().is_some());
    }

    #[tokio::test]
    async fn test_delete_passes_fence_through() {
        let (inner, clock, store) = setup();
        let mine = IdempotencyRecord::in_progress(
            "k",
            None,
            start(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        assert!(store
            .put_in_progress(&mine, Precondition::Vacant { now: start() })
            .await
            .is_ok());

        clock.advance(Duration::from_secs(11));
        let theirs = IdempotencyRecord::in_progress(
            "k",
            None,
            clock.now(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        assert!(store
            .put_in_progress(&theirs, Precondition::VacantOrOrphaned { now: clock.now() })
            .await
            .is_ok());

        assert!(store.delete_record(&mine).await.is_ok());
        assert_eq!(inner.get("k").await.ok().flatten(), Some(theirs));
    }
}
