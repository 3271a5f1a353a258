//! Request fingerprinting.
//!
//! A fingerprint turns a JSON payload into the idempotency key under which its
//! record is stored, plus an optional hash of the slice that must match on
//! replay.
//!
//! # Algorithm
//!
//! 1. Select the key material with `event_key_jmespath` (whole payload when unset).
//! 2. Render it canonically ([`canonical`]): sorted object keys, no whitespace.
//! 3. Hash it with the configured [`HashFunction`] and prefix the scope:
//!    `"{scope}#{hex digest}"`.
//!
//! # Example
//!
//! ```
//! use idem_core::config::IdempotencyConfig;
//! use idem_core::fingerprint::Fingerprinter;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IdempotencyConfig::default().with_event_key_jmespath("order_id");
//! let fingerprinter = Fingerprinter::from_config(&config)?;
//!
//! let a = fingerprinter.fingerprint("orders", &json!({"order_id": 7, "ts": 1}))?;
//! let b = fingerprinter.fingerprint("orders", &json!({"ts": 2, "order_id": 7}))?;
//! assert_eq!(a, b);
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod hash;
pub mod path;

use serde_json::Value;
use tracing::warn;

use crate::config::IdempotencyConfig;
use crate::error::{IdempotencyError, Result};

pub use canonical::to_canonical_string;
pub use hash::HashFunction;
pub use path::PathExpr;

/// Separator between the scope and the digest in a key.
pub const KEY_SEPARATOR: char = '#';

/// Identity of one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// `"{scope}#{hex digest}"`.
    pub key: String,
    /// Hash of the validated slice, when payload validation is configured.
    pub payload_hash: Option<String>,
}

/// Compiled fingerprinting rules.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    key_path: Option<PathExpr>,
    validation_path: Option<PathExpr>,
    hash_function: HashFunction,
    raise_on_missing_key: bool,
}

impl Fingerprinter {
    /// Compile the path expressions of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Configuration`] if a path does not parse.
    pub fn from_config(config: &IdempotencyConfig) -> Result<Self> {
        Ok(Self {
            key_path: config
                .event_key_jmespath
                .as_deref()
                .map(PathExpr::parse)
                .transpose()?,
            validation_path: config
                .payload_validation_jmespath
                .as_deref()
                .map(PathExpr::parse)
                .transpose()?,
            hash_function: config.hash_function,
            raise_on_missing_key: config.raise_on_no_idempotency_key,
        })
    }

    /// Whether a payload hash is computed and compared on replay.
    #[must_use]
    pub const fn validates_payload(&self) -> bool {
        self.validation_path.is_some()
    }

    /// Fingerprint `payload` under `scope`.
    ///
    /// Returns `Ok(None)` when the key material is missing and missing keys are
    /// tolerated; the caller then runs without protection.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Key`] when the key material is missing and
    /// missing keys are not tolerated, or when a path cannot be evaluated.
    pub fn fingerprint(&self, scope: &str, payload: &Value) -> Result<Option<Fingerprint>> {
        let material = match &self.key_path {
            Some(path) => path.evaluate(payload)?,
            None => payload.clone(),
        };

        if is_missing(&material) {
            if self.raise_on_missing_key {
                return Err(IdempotencyError::key(
                    "no data found to create a hashed idempotency key",
                ));
            }
            warn!(scope = %scope, "No idempotency key found, running without idempotency");
            return Ok(None);
        }

        let digest = self.hash_value(&material);
        Ok(Some(Fingerprint {
            key: format!("{scope}{KEY_SEPARATOR}{digest}"),
            payload_hash: self.payload_hash(payload)?,
        }))
    }

    /// Hash of the validated slice of `payload`, if validation is configured.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Key`] if the validation path cannot be evaluated.
    pub fn payload_hash(&self, payload: &Value) -> Result<Option<String>> {
        self.validation_path
            .as_ref()
            .map(|path| path.evaluate(payload).map(|slice| self.hash_value(&slice)))
            .transpose()
    }

    fn hash_value(&self, value: &Value) -> String {
        self.hash_function
            .hex_digest(to_canonical_string(value).as_bytes())
    }
}

/// `null`, or an array holding only `null`s.
fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}
