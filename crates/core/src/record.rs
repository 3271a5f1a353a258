//! The persisted idempotency record.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a record.
///
/// Only `InProgress` and `Completed` are ever written. `Expired` is what
/// [`IdempotencyRecord::effective_status`] reports once the TTL has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "INPROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl RecordStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "INPROGRESS",
            Self::Completed => "COMPLETED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One idempotency record, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub status: RecordStatus,
    /// Serialized result. Present only once `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<String>,
    /// Epoch seconds after which the record counts as absent.
    pub expiry_timestamp: i64,
    /// Epoch milliseconds after which an `InProgress` record is orphaned.
    /// Doubles as the owner's fencing token on completion.
    pub in_progress_expiry_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
}

impl IdempotencyRecord {
    /// A fresh `InProgress` record claimed at `now`.
    #[must_use]
    pub fn in_progress(
        idempotency_key: impl Into<String>,
        payload_hash: Option<String>,
        now: DateTime<Utc>,
        expiration: Duration,
        in_progress_expiration: Duration,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            status: RecordStatus::InProgress,
            response_data: None,
            expiry_timestamp: now.timestamp().saturating_add(secs(expiration)),
            in_progress_expiry_timestamp: now
                .timestamp_millis()
                .saturating_add(millis(in_progress_expiration)),
            payload_hash,
        }
    }

    /// The `Completed` successor of this record.
    ///
    /// The expiry is restarted from `now`; the fencing token is kept so the
    /// store can check that the slot still belongs to this owner.
    #[must_use]
    pub fn completed(&self, response_data: String, now: DateTime<Utc>, expiration: Duration) -> Self {
        Self {
            status: RecordStatus::Completed,
            response_data: Some(response_data),
            expiry_timestamp: now.timestamp().saturating_add(secs(expiration)),
            ..self.clone()
        }
    }

    /// Whether the record's TTL has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_timestamp < now.timestamp()
    }

    /// Whether this is an `InProgress` record whose owner ran out of time.
    #[must_use]
    pub fn is_orphaned(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::InProgress
            && self.in_progress_expiry_timestamp < now.timestamp_millis()
    }

    /// Status as observed at `now`.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> RecordStatus {
        if self.is_expired(now) {
            RecordStatus::Expired
        } else {
            self.status
        }
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
