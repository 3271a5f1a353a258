//! SurrealDB store.
//!
//! One table (default `idempotency`), record id = idempotency key, fields
//! mirroring [`IdempotencyRecord`]. SurrealDB has no native TTL, so expired
//! records are collected by [`SurrealStore::purge_expired`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

use super::{PersistenceStore, Precondition};
use crate::error::{from_surrealdb_create_error, from_surrealdb_error, StoreError, StoreResult};
use crate::record::IdempotencyRecord;

/// Default table name.
pub const DEFAULT_TABLE: &str = "idempotency";

const CLAIM_VACANT: &str = "UPDATE type::thing($table, $key) CONTENT $record \
     WHERE expiry_timestamp < $now RETURN AFTER";

const CLAIM_VACANT_OR_ORPHANED: &str = "UPDATE type::thing($table, $key) CONTENT $record \
     WHERE expiry_timestamp < $now \
     OR (status = 'INPROGRESS' AND in_progress_expiry_timestamp < $now_millis) RETURN AFTER";

const COMPLETE_OWNED: &str = "UPDATE type::thing($table, $key) CONTENT $record \
     WHERE status = 'INPROGRESS' AND in_progress_expiry_timestamp = $fence RETURN AFTER";

const RELEASE_OWNED: &str = "DELETE type::thing($table, $key) \
     WHERE status = 'INPROGRESS' AND in_progress_expiry_timestamp = $fence RETURN BEFORE";

const PURGE_EXPIRED: &str =
    "DELETE type::table($table) WHERE expiry_timestamp < $now RETURN BEFORE";

/// Connection settings for [`SurrealStore`].
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    /// Connection URL (e.g., "mem://", "ws://localhost:8000")
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Optional root credentials
    pub credentials: Option<Credentials>,
    /// Table holding the records.
    pub table: String,
}

/// Root credentials for authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl SurrealConfig {
    /// Configuration for the given URL with default namespace, database and table.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "idem".to_string(),
            database: "idempotency".to_string(),
            credentials: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Embedded in-memory database, for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new("mem://").with_database("test")
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Reject table names that cannot be used as a bare identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] for an empty or non-alphanumeric table name.
    pub fn validate(&self) -> StoreResult<()> {
        let valid = !self.table.is_empty()
            && self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(StoreError::backend(
                "configure",
                format!("invalid table name '{}'", self.table),
            ))
        }
    }
}

impl Default for SurrealConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Idempotency records in a SurrealDB table.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    db: Arc<Surreal<Any>>,
    table: String,
}

impl SurrealStore {
    /// Connect, authenticate and select the namespace and database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection, authentication or
    /// schema setup fails.
    pub async fn connect(config: SurrealConfig) -> StoreResult<Self> {
        config.validate()?;
        let db = Surreal::<Any>::init();

        db.connect(config.url.as_str())
            .await
            .map_err(|e| from_surrealdb_error("connect", e))?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| from_surrealdb_error("signin", e))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| from_surrealdb_error("use_ns", e))?;

        let store = Self {
            db: Arc::new(db),
            table: config.table,
        };
        store.initialize_schema().await?;
        info!(url = %config.url, table = %store.table, "Connected idempotency store");
        Ok(store)
    }

    /// Table holding the records.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let schema = format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;\
             DEFINE INDEX IF NOT EXISTS {table}_expiry ON TABLE {table} FIELDS expiry_timestamp;",
            table = self.table
        );
        self.db
            .query(schema)
            .await
            .and_then(surrealdb::Response::check)
            .map_err(|e| from_surrealdb_error("initialize_schema", e))?;
        Ok(())
    }

    /// Delete every record whose TTL passed before `now`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the query fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let removed: Vec<IdempotencyRecord> = self
            .db
            .query(PURGE_EXPIRED)
            .bind(("table", self.table.clone()))
            .bind(("now", now.timestamp()))
            .await
            .and_then(|mut response| response.take(0))
            .map_err(|e| from_surrealdb_error("purge_expired", e))?;

        info!(table = %self.table, removed = removed.len(), "Purged expired idempotency records");
        Ok(removed.len())
    }

    /// Overwrite an existing record if `precondition` admits it.
    async fn claim_existing(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        let now = precondition.now();
        let statement = if precondition.allows_takeover() {
            CLAIM_VACANT_OR_ORPHANED
        } else {
            CLAIM_VACANT
        };

        let claimed: Vec<IdempotencyRecord> = self
            .db
            .query(statement)
            .bind(("table", self.table.clone()))
            .bind(("key", record.idempotency_key.clone()))
            .bind(("record", record.clone()))
            .bind(("now", now.timestamp()))
            .bind(("now_millis", now.timestamp_millis()))
            .await
            .and_then(|mut response| response.take(0))
            .map_err(|e| from_surrealdb_error("put_in_progress", e))?;

        if claimed.is_empty() {
            Err(StoreError::item_already_exists(&record.idempotency_key))
        } else {
            debug!(key = %record.idempotency_key, "Replaced stale idempotency record");
            Ok(())
        }
    }
}

#[async_trait]
impl PersistenceStore for SurrealStore {
    async fn put_in_progress(
        &self,
        record: &IdempotencyRecord,
        precondition: Precondition,
    ) -> StoreResult<()> {
        let created: Result<Option<IdempotencyRecord>, _> = self
            .db
            .create((self.table.as_str(), record.idempotency_key.as_str()))
            .content(record.clone())
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) => match from_surrealdb_create_error(&record.idempotency_key, e) {
                StoreError::ItemAlreadyExists { .. } => {
                    self.claim_existing(record, precondition).await
                }
                other => Err(other),
            },
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        self.db
            .select((self.table.as_str(), key))
            .await
            .map_err(|e| from_surrealdb_error("get", e))
    }

    async fn update_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        let updated: Vec<IdempotencyRecord> = self
            .db
            .query(COMPLETE_OWNED)
            .bind(("table", self.table.clone()))
            .bind(("key", record.idempotency_key.clone()))
            .bind(("record", record.clone()))
            .bind(("fence", record.in_progress_expiry_timestamp))
            .await
            .and_then(|mut response| response.take(0))
            .map_err(|e| from_surrealdb_error("update_record", e))?;

        if updated.is_empty() {
            Err(StoreError::inconsistent_state(
                &record.idempotency_key,
                "slot is no longer held by this execution",
            ))
        } else {
            Ok(())
        }
    }

    async fn delete_record(&self, record: &IdempotencyRecord) -> StoreResult<()> {
        let key = &record.idempotency_key;
        let deleted: Vec<IdempotencyRecord> = self
            .db
            .query(RELEASE_OWNED)
            .bind(("table", self.table.clone()))
            .bind(("key", key.clone()))
            .bind(("fence", record.in_progress_expiry_timestamp))
            .await
            .and_then(|mut response| response.take(0))
            .map_err(|e| from_surrealdb_error("delete_record", e))?;

        debug!(key = %key, deleted = deleted.len(), "Released in-progress idempotency record");
        Ok(())
    }
}
