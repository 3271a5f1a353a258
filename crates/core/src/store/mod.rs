//! Persistence store contract for idempotency records.
//!
//! Every write is conditional. A store must make each individual operation
//! atomic; the orchestrator builds the acquisition protocol on top of that.
//!
//! Adapters:
//! - [`InMemoryStore`]: single-process map behind a tokio `RwLock`.
//! - [`SurrealStore`]: SurrealDB table keyed by idempotency key.
//! - [`CachingStore`]: local LRU decorator for any other store.

mod cache;
mod memory;
mod surreal;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::record::{IdempotencyRecord, RecordStatus};

pub use cache::CachingStore;
pub use memory::InMemoryStore;
pub use surreal::{Credentials, SurrealConfig, SurrealStore, DEFAULT_TABLE};

/// Expectation a conditional create checks against the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No record, or only an expired one.
    Vacant { now: DateTime<Utc> },
    /// As `Vacant`, or an `InProgress` record whose owner ran out of time.
    VacantOrOrphaned { now: DateTime<Utc> },
}

impl Precondition {
    /// Instant the expectation is evaluated at.
    #[must_use]
    pub const fn now(self) -> DateTime<Utc> {
        match self {
            Self::Vacant { now } | Self::VacantOrOrphaned { now } => now,
        }
    }

    /// Whether orphaned `InProgress` records may be taken over.
    #[must_use]
    pub const fn allows_takeover(self) -> bool {
        matches!(self, Self::VacantOrOrphaned { .. })
    }

    /// Whether a create may replace `existing`.
    #[must_use]
    pub fn admits(self, existing: Option<&IdempotencyRecord>) -> bool {
        let now = self.now();
        existing.is_none_or(|record| {
            record.is_expired(now) || (self.allows_takeover() && record.is_orphaned(now))
        })
    }
}

/// Whether `update` may complete the slot currently held by `stored`.
///
/// The stored record must still be `InProgress` and carry the fencing token
/// the owner wrote when it claimed the slot.
#[must_use]
pub fn owns_slot(stored: &IdempotencyRecord, update: &IdempotencyRecord) -> bool {
    stored.status == RecordStatus::InProgress
        && stored.in_progress_expiry_timestamp == update.in_progress_expiry_timestamp
}

/// Storage backend for idempotency records.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Create `record` if `precondition` admits whatever is stored under its key.
    ///
    /// Fails with [`StoreError::ItemAlreadyExists`](crate::error::StoreError::ItemAlreadyExists)
    /// when it does not.
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()>;

    /// Current record for `key`. May be expired.
    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>>;

    /// Replace the caller's `InProgress` record with its `Completed` successor.
    ///
    /// Fails with [`StoreError::InconsistentState`](crate::error::StoreError::InconsistentState)
    /// unless [`owns_slot`] holds for the stored record.
    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()>;

    /// Release the caller's `InProgress` claim.
    ///
    /// Removes the stored record only while [`owns_slot`] holds for it. Absent
    /// keys, `Completed` records and claims taken over by another execution
    /// are left alone.
    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()>;
}

#[async_trait]
impl<S: PersistenceStore + ?Sized> PersistenceStore for Arc<S> {
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        (**self).put_in_progress(record, precondition).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        (**self).get(key).await
    }

    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        (**self).update_record(record).await
    }

    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        (**self).delete_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }

    fn claimed_at(secs: i64) -> IdempotencyRecord {
        IdempotencyRecord::in_progress(
            "k",
            None,
            at(secs),
            Duration::from_secs(100),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_vacant_admits_absent_and_expired() {
        let record = claimed_at(0);
        assert!(Precondition::Vacant { now: at(50) }.admits(None));
        assert!(!Precondition::Vacant { now: at(50) }.admits(Some(&record)));
        assert!(Precondition::Vacant { now: at(101) }.admits(Some(&record)));
    }

    #[test]
    fn test_orphan_takeover_needs_explicit_precondition() {
        let record = claimed_at(0);
        assert!(!Precondition::Vacant { now: at(11) }.admits(Some(&record)));
        assert!(Precondition::VacantOrOrphaned { now: at(11) }.admits(Some(&record)));
        assert!(!Precondition::VacantOrOrphaned { now: at(9) }.admits(Some(&record)));
    }

    #[test]
    fn test_completed_is_never_orphaned() {
        let record = claimed_at(0).completed(String::new(), at(1), Duration::from_secs(100));
        assert!(!Precondition::VacantOrOrphaned { now: at(50) }.admits(Some(&record)));
    }

    #[test]
    fn test_owns_slot() {
        let mine = claimed_at(0);
        let theirs = claimed_at(20);
        let done = mine.completed(String::new(), at(1), Duration::from_secs(100));

        assert!(owns_slot(&mine, &done));
        assert!(!owns_slot(&theirs, &done));
        assert!(!owns_slot(&done, &done));
    }
}
