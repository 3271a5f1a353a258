//! Idempotency engine for handlers that may be invoked more than once with the
//! same logical input.
//!
//! The side-effecting work runs at most once per fingerprint; duplicate
//! invocations observe the stored result. Key features:
//!
//! - **Fingerprinting**: deterministic keys from selected parts of a JSON
//!   payload, with optional payload validation on replay.
//! - **Conditional persistence**: every store write is a compare-and-swap on
//!   the record's status and expiry.
//! - **Orphan recovery**: `InProgress` records whose owner vanished are taken
//!   over after a bounded delay.
//! - **Adapters**: in-memory, SurrealDB, and a local LRU cache decorator.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use idem_core::{Idempotency, IdempotencyConfig, IdempotencyError, InMemoryStore, Outcome};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), IdempotencyError> {
//! let config = IdempotencyConfig::default().with_event_key_jmespath("order_id");
//! let idempotency = Idempotency::new(Arc::new(InMemoryStore::new()), config)?;
//!
//! let event = json!({"order_id": "o-1", "amount": 12});
//! let first = idempotency
//!     .execute("charge", &event, || async { Ok::<_, IdempotencyError>(json!({"status": "ok"})) })
//!     .await?;
//! let second = idempotency
//!     .execute("charge", &event, || async { Ok::<_, IdempotencyError>(json!({"status": "again"})) })
//!     .await?;
//!
//! assert_eq!(first, Outcome::Executed(json!({"status": "ok"})));
//! assert_eq!(second, Outcome::Replayed(json!({"status": "ok"})));
//! # Ok(())
//! # }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![cfg_attr(test, allow(clippy::panic, clippy::indexing_slicing))]

pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod record;
pub mod store;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::IdempotencyConfig;
pub use error::{IdempotencyError, Result, StoreError, StoreResult};
pub use fingerprint::{Fingerprint, Fingerprinter, HashFunction};
pub use orchestrator::{Idempotency, IdempotentHandler, Outcome, MAX_PUT_ATTEMPTS};
pub use record::{IdempotencyRecord, RecordStatus};
pub use store::{
    CachingStore, InMemoryStore, PersistenceStore, Precondition, SurrealConfig, SurrealStore,
};
