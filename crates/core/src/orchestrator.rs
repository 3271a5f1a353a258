//! Idempotent execution of a unit of work.
//!
//! [`Idempotency`] fingerprints the request, claims the key in the store and
//! then does one of three things:
//!
//! - runs the work and stores its serialized result (`Executed`);
//! - returns the result stored by an earlier execution (`Replayed`);
//! - rejects the call because a duplicate is still running.
//!
//! Concurrent duplicates coordinate only through the store's conditional
//! writes. The claim is retried at most [`MAX_PUT_ATTEMPTS`] times: once after
//! finding an expired record, or once with orphan takeover after finding an
//! `InProgress` record whose owner ran out of time.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::error::{IdempotencyError, Result, StoreError};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::record::{IdempotencyRecord, RecordStatus};
use crate::store::{CachingStore, PersistenceStore, Precondition};

/// Upper bound on conditional create attempts per invocation.
pub const MAX_PUT_ATTEMPTS: usize = 2;

/// How an invocation produced its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The work ran in this invocation.
    Executed(T),
    /// The result of an earlier execution was returned.
    Replayed(T),
}

impl<T> Outcome<T> {
    /// The result, however it was produced.
    pub fn into_inner(self) -> T {
        match self {
            Self::Executed(value) | Self::Replayed(value) => value,
        }
    }

    /// Whether the result came from the store.
    pub const fn is_replayed(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Result of claiming a key.
enum Claim {
    /// This invocation owns the slot and must run the work.
    Owner(IdempotencyRecord),
    /// A live `Completed` record holds this serialized result.
    Replay(String),
}

/// Idempotency orchestrator.
///
/// Holds the policy, the store and the clock; all three are injected.
pub struct Idempotency {
    store: Arc<dyn PersistenceStore>,
    config: IdempotencyConfig,
    fingerprinter: Fingerprinter,
    clock: Arc<dyn Clock>,
}

impl Idempotency {
    /// Orchestrator over `store` using wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Configuration`] if `config` does not validate.
    pub fn new(store: Arc<dyn PersistenceStore>, config: IdempotencyConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Orchestrator over `store` using `clock` for every expiry decision.
    ///
    /// When the local cache is enabled, `store` is wrapped in a [`CachingStore`].
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Configuration`] if `config` does not validate.
    pub fn with_clock(
        store: Arc<dyn PersistenceStore>,
        config: IdempotencyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let fingerprinter = Fingerprinter::from_config(&config)?;

        let store: Arc<dyn PersistenceStore> = if config.use_local_cache {
            Arc::new(CachingStore::new(
                store,
                config.max_local_cache_size,
                config.expiration(),
                Arc::clone(&clock),
            ))
        } else {
            store
        };

        Ok(Self {
            store,
            config,
            fingerprinter,
            clock,
        })
    }

    /// Active policy.
    #[must_use]
    pub const fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Run `work` at most once for the logical request `payload` within `scope`.
    ///
    /// Application errors from `work` are returned unchanged after the claim
    /// is released, so a failed execution does not poison the key.
    ///
    /// # Errors
    ///
    /// Idempotency failures are converted into `E` through
    /// `From<IdempotencyError>`: a missing key, a running duplicate, a payload
    /// mismatch, a store failure, an oversized response, or an unreadable
    /// stored response.
    pub async fn execute<T, E, F, Fut>(
        &self,
        scope: &str,
        payload: &Value,
        work: F,
    ) -> std::result::Result<Outcome<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if !self.config.enabled {
            return work().await.map(Outcome::Executed);
        }

        let Some(fingerprint) = self.fingerprinter.fingerprint(scope, payload)? else {
            return work().await.map(Outcome::Executed);
        };

        match self.claim(&fingerprint).await? {
            Claim::Replay(response) => {
                info!(key = %fingerprint.key, "Replaying stored response");
                let value = serde_json::from_str(&response).map_err(|e| {
                    IdempotencyError::serialization(format!(
                        "stored response for '{}' does not deserialize: {e}",
                        fingerprint.key
                    ))
                })?;
                Ok(Outcome::Replayed(value))
            }
            Claim::Owner(record) => self.run_owned(record, work).await.map(Outcome::Executed),
        }
    }

    /// [`execute`](Self::execute) without the outcome tag.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn handle<T, E, F, Fut>(
        &self,
        scope: &str,
        payload: &Value,
        work: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.execute(scope, payload, work)
            .await
            .map(Outcome::into_inner)
    }

    /// Fingerprint a typed `request` and hand it to `work`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute). A request that does not serialize is
    /// an [`IdempotencyError::Key`].
    pub async fn handle_request<R, T, E, F, Fut>(
        &self,
        scope: &str,
        request: R,
        work: F,
    ) -> std::result::Result<T, E>
    where
        R: Serialize,
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let payload = serde_json::to_value(&request)
            .map_err(|e| IdempotencyError::key(format!("request does not serialize: {e}")))?;
        self.handle(scope, &payload, move || work(request)).await
    }

    async fn claim(&self, fingerprint: &Fingerprint) -> Result<Claim> {
        let key = fingerprint.key.as_str();
        let mut takeover = false;

        for attempt in 1..=MAX_PUT_ATTEMPTS {
            let now = self.clock.now();
            let record = IdempotencyRecord::in_progress(
                key,
                fingerprint.payload_hash.clone(),
                now,
                self.config.expiration(),
                self.config.in_progress_expiration(),
            );
            let precondition = if takeover {
                Precondition::VacantOrOrphaned { now }
            } else {
                Precondition::Vacant { now }
            };

            match self.store.put_in_progress(&record, precondition).await {
                Ok(()) => {
                    debug!(key = %key, attempt, takeover, "Claimed idempotency key");
                    return Ok(Claim::Owner(record));
                }
                Err(StoreError::ItemAlreadyExists { .. }) if attempt >= MAX_PUT_ATTEMPTS => break,
                Err(StoreError::ItemAlreadyExists { .. }) => {}
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to claim idempotency key");
                    return Err(e.into());
                }
            }

            let now = self.clock.now();
            let Some(existing) = self.store.get(key).await?.filter(|r| !r.is_expired(now)) else {
                debug!(key = %key, "Colliding record vanished or expired, retrying claim");
                takeover = false;
                continue;
            };

            if self.fingerprinter.validates_payload()
                && existing.payload_hash != fingerprint.payload_hash
            {
                warn!(key = %key, "Payload does not match stored idempotency record");
                return Err(IdempotencyError::validation(key));
            }

            match existing.effective_status(now) {
                RecordStatus::Completed => {
                    return existing.response_data.map(Claim::Replay).ok_or_else(|| {
                        IdempotencyError::inconsistent_state(
                            key,
                            "completed record carries no response",
                        )
                    });
                }
                RecordStatus::InProgress if existing.is_orphaned(now) => {
                    info!(key = %key, "Taking over orphaned idempotency record");
                    takeover = true;
                }
                RecordStatus::InProgress => {
                    debug!(key = %key, "Duplicate invocation still in progress");
                    return Err(IdempotencyError::already_in_progress(key));
                }
                RecordStatus::Expired => takeover = false,
            }
        }

        warn!(key = %key, "Idempotency record changed under a retried claim");
        Err(IdempotencyError::inconsistent_state(
            key,
            "record changed between claim attempts",
        ))
    }

    async fn run_owned<T, E, F, Fut>(
        &self,
        record: IdempotencyRecord,
        work: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize,
        E: From<IdempotencyError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = record.idempotency_key.clone();
        let guard = ClaimGuard::new(Arc::clone(&self.store), record.clone());

        let value = match work().await {
            Ok(value) => value,
            Err(err) => {
                debug!(key = %key, "Work failed, releasing idempotency key");
                guard.release().await;
                return Err(err);
            }
        };

        let response = match serde_json::to_string(&value) {
            Ok(response) => response,
            Err(e) => {
                guard.release().await;
                return Err(IdempotencyError::serialization(e.to_string()).into());
            }
        };

        let limit = self.config.max_response_bytes;
        if response.len() > limit {
            warn!(key = %key, size = response.len(), limit, "Response too large to store");
            guard.release().await;
            return Err(IdempotencyError::ResponseTooLarge {
                key,
                size: response.len(),
                limit,
            }
            .into());
        }

        let completed = record.completed(response, self.clock.now(), self.config.expiration());
        let saved = self.store.update_record(&completed).await;
        guard.disarm();

        match saved {
            Ok(()) => {
                info!(key = %key, "Stored idempotent response");
                Ok(value)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to store idempotent response");
                Err(IdempotencyError::from(e).into())
            }
        }
    }
}

/// Releases an `InProgress` claim if the owning future is dropped early.
///
/// Holds the claimed record so that the release is fenced: a claim already
/// taken over by another execution is left in place.
struct ClaimGuard {
    store: Arc<dyn PersistenceStore>,
    claim: Option<IdempotencyRecord>,
}

impl ClaimGuard {
    fn new(store: Arc<dyn PersistenceStore>, claim: IdempotencyRecord) -> Self {
        Self {
            store,
            claim: Some(claim),
        }
    }

    fn disarm(mut self) {
        self.claim = None;
    }

    /// Delete the claim now. Failures are logged; the orphan bound covers them.
    async fn release(mut self) {
        let Some(claim) = self.claim.take() else {
            return;
        };
        if let Err(e) = self.store.delete_record(&claim).await {
            warn!(key = %claim.idempotency_key, error = %e, "Failed to release idempotency key");
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let Some(claim) = self.claim.take() else {
            return;
        };
        let key = claim.idempotency_key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(key = %key, "Execution cancelled, releasing idempotency key");
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = store.delete_record(&claim).await {
                        warn!(key = %key, error = %e, "Failed to release cancelled idempotency key");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "No runtime to release cancelled idempotency key");
            }
        }
    }
}

/// A unit of work bound to a scope, invoked once per request.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use idem_core::{IdempotencyConfig, IdempotencyError, IdempotentHandler, Idempotency, InMemoryStore};
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), IdempotencyError> {
/// let idempotency = Idempotency::new(Arc::new(InMemoryStore::new()), IdempotencyConfig::default())?;
/// let handler = IdempotentHandler::new(Arc::new(idempotency), "greet", |req: Value| async move {
///     Ok::<_, IdempotencyError>(json!({"hello": req["name"]}))
/// });
///
/// let first: Value = handler.invoke(json!({"name": "ferris"})).await?;
/// let again: Value = handler.invoke(json!({"name": "ferris"})).await?;
/// assert_eq!(first, again);
/// # Ok(())
/// # }
/// ```
pub struct IdempotentHandler<F> {
    idempotency: Arc<Idempotency>,
    scope: String,
    work: F,
}

impl<F> IdempotentHandler<F> {
    #[must_use]
    pub fn new(idempotency: Arc<Idempotency>, scope: impl Into<String>, work: F) -> Self {
        Self {
            idempotency,
            scope: scope.into(),
            work,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Handle one request.
    ///
    /// # Errors
    ///
    /// See [`Idempotency::execute`].
    pub async fn invoke<R, T, E, Fut>(&self, request: R) -> std::result::Result<T, E>
    where
        F: Fn(R) -> Fut,
        R: Serialize,
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.idempotency
            .handle_request(&self.scope, request, |req| (self.work)(req))
            .await
    }
}
