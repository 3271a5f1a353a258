//! Idempotency policy settings.
//!
//! A plain value built explicitly and handed to the orchestrator. It can be
//! assembled with the `with_*` builders or parsed from TOML:
//!
//! ```toml
//! event_key_jmespath = "powertools_json(body).[user, order_id]"
//! payload_validation_jmespath = "powertools_json(body).amount"
//! expiration_in_seconds = 3600
//! hash_function = "sha256"
//! use_local_cache = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IdempotencyError, Result};
use crate::fingerprint::path::PathExpr;
use crate::fingerprint::HashFunction;

/// Default lifetime of a COMPLETED record.
pub const DEFAULT_EXPIRATION_SECS: u64 = 3600;

/// Default orphan bound for an IN_PROGRESS record.
pub const DEFAULT_IN_PROGRESS_EXPIRATION_SECS: u64 = 300;

/// Default local cache capacity.
pub const DEFAULT_LOCAL_CACHE_SIZE: u64 = 256;

/// Default upper bound for a serialized response (400 KiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 400 * 1024;

/// Idempotency policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// When false, work runs directly with no idempotency protection.
    pub enabled: bool,
    /// Path selecting the key material. `None` hashes the whole payload.
    pub event_key_jmespath: Option<String>,
    /// Path selecting the slice compared on replay. `None` disables validation.
    pub payload_validation_jmespath: Option<String>,
    /// Fail when the key path selects nothing; otherwise run unprotected.
    pub raise_on_no_idempotency_key: bool,
    /// Lifetime of a record, in seconds.
    pub expiration_in_seconds: u64,
    /// Orphan bound for IN_PROGRESS records, in seconds.
    pub in_progress_expiration_in_seconds: u64,
    /// Put an in-process LRU cache in front of the store.
    pub use_local_cache: bool,
    /// Capacity of the local cache, in entries.
    pub max_local_cache_size: u64,
    /// Digest used for keys and payload hashes.
    pub hash_function: HashFunction,
    /// Largest serialized response accepted for caching.
    pub max_response_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_key_jmespath: None,
            payload_validation_jmespath: None,
            raise_on_no_idempotency_key: true,
            expiration_in_seconds: DEFAULT_EXPIRATION_SECS,
            in_progress_expiration_in_seconds: DEFAULT_IN_PROGRESS_EXPIRATION_SECS,
            use_local_cache: false,
            max_local_cache_size: DEFAULT_LOCAL_CACHE_SIZE,
            hash_function: HashFunction::default(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl IdempotencyConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Configuration`] if the document does not
    /// parse or fails [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| IdempotencyError::configuration(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Enable or disable idempotency.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the key path expression.
    #[must_use]
    pub fn with_event_key_jmespath(mut self, path: impl Into<String>) -> Self {
        self.event_key_jmespath = Some(path.into());
        self
    }

    /// Set the payload validation path expression.
    #[must_use]
    pub fn with_payload_validation_jmespath(mut self, path: impl Into<String>) -> Self {
        self.payload_validation_jmespath = Some(path.into());
        self
    }

    /// Choose whether a missing key is an error.
    #[must_use]
    pub fn with_raise_on_no_idempotency_key(mut self, raise: bool) -> Self {
        self.raise_on_no_idempotency_key = raise;
        self
    }

    /// Set the record lifetime.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration_in_seconds = expiration.as_secs();
        self
    }

    /// Set the orphan bound.
    #[must_use]
    pub fn with_in_progress_expiration(mut self, expiration: Duration) -> Self {
        self.in_progress_expiration_in_seconds = expiration.as_secs();
        self
    }

    /// Enable the local cache with the given capacity.
    #[must_use]
    pub fn with_local_cache(mut self, max_size: u64) -> Self {
        self.use_local_cache = true;
        self.max_local_cache_size = max_size;
        self
    }

    /// Set the digest.
    #[must_use]
    pub fn with_hash_function(mut self, hash_function: HashFunction) -> Self {
        self.hash_function = hash_function;
        self
    }

    /// Set the response size bound.
    #[must_use]
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    /// Record lifetime as a [`Duration`].
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_in_seconds)
    }

    /// Orphan bound as a [`Duration`].
    #[must_use]
    pub const fn in_progress_expiration(&self) -> Duration {
        Duration::from_secs(self.in_progress_expiration_in_seconds)
    }

    /// Check the settings for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Configuration`] for zero TTLs, an orphan
    /// bound longer than the record lifetime, a zero-size local cache, a zero
    /// response bound, or a path that does not parse.
    pub fn validate(&self) -> Result<()> {
        if self.expiration_in_seconds == 0 {
            return Err(IdempotencyError::configuration(
                "expiration_in_seconds must be greater than zero",
            ));
        }
        if self.in_progress_expiration_in_seconds == 0 {
            return Err(IdempotencyError::configuration(
                "in_progress_expiration_in_seconds must be greater than zero",
            ));
        }
        if self.in_progress_expiration_in_seconds > self.expiration_in_seconds {
            return Err(IdempotencyError::configuration(format!(
                "in_progress_expiration_in_seconds ({}) must not exceed expiration_in_seconds ({})",
                self.in_progress_expiration_in_seconds, self.expiration_in_seconds
            )));
        }
        if self.use_local_cache && self.max_local_cache_size == 0 {
            return Err(IdempotencyError::configuration(
                "max_local_cache_size must be greater than zero when the local cache is enabled",
            ));
        }
        if self.max_response_bytes == 0 {
            return Err(IdempotencyError::configuration(
                "max_response_bytes must be greater than zero",
            ));
        }
        for path in [&self.event_key_jmespath, &self.payload_validation_jmespath]
            .into_iter()
            .flatten()
        {
            PathExpr::parse(path)?;
        }
        Ok(())
    }
}
