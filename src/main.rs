//! # idem - command-line companion to the idempotency engine
//!
//! - `idem key` computes the idempotency key a handler would use for a
//!   payload, so that a stored record can be found for a given request.
//! - `idem inspect` prints a record from a SurrealDB store.
//! - `idem purge` runs the TTL sweep against a SurrealDB store.
//!
//! Logs go to stderr; command output is JSON on stdout.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use idem_core::store::{PersistenceStore, SurrealStore};
use idem_core::{Fingerprinter, IdempotencyConfig};

use crate::cli::{Cli, Commands, StoreArgs};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Key {
            config,
            scope,
            payload,
        } => print_key(config.as_deref(), &scope, payload.as_deref()),
        Commands::Inspect { store, key } => inspect(&store, &key).await,
        Commands::Purge { store } => purge(&store).await,
    }
}

/// Initialize tracing subscriber
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_key(config: Option<&Path>, scope: &str, payload: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            IdempotencyConfig::from_toml_str(&source)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => IdempotencyConfig::default(),
    };

    let raw = match payload {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
    };
    let payload: Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;

    let fingerprinter = Fingerprinter::from_config(&config)?;
    let Some(fingerprint) = fingerprinter.fingerprint(scope, &payload)? else {
        bail!("Payload carries no idempotency key");
    };

    print_json(&json!({
        "idempotency_key": fingerprint.key,
        "payload_hash": fingerprint.payload_hash,
        "hash_function": config.hash_function.to_string(),
    }))
}

async fn connect(args: &StoreArgs) -> Result<SurrealStore> {
    SurrealStore::connect(args.to_config())
        .await
        .with_context(|| format!("Failed to connect to SurrealDB at {}", args.url))
}

async fn inspect(args: &StoreArgs, key: &str) -> Result<()> {
    let store = connect(args).await?;
    let Some(record) = store.get(key).await.context("Lookup failed")? else {
        bail!("No idempotency record for key '{key}'");
    };

    let mut out = serde_json::to_value(&record)?;
    if let Value::Object(fields) = &mut out {
        fields.insert(
            "effective_status".to_string(),
            json!(record.effective_status(Utc::now()).as_str()),
        );
    }
    print_json(&out)
}

async fn purge(args: &StoreArgs) -> Result<()> {
    let store = connect(args).await?;
    let removed = store
        .purge_expired(Utc::now())
        .await
        .context("Purge failed")?;
    info!(table = %store.table(), removed, "Purge complete");
    print_json(&json!({ "removed": removed }))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
