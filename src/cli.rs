//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use idem_core::store::{SurrealConfig, DEFAULT_TABLE};

/// idem - idempotency keys and records
#[derive(Parser, Debug)]
#[command(name = "idem")]
#[command(version)]
#[command(about = "Compute idempotency keys and inspect stored idempotency records")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the idempotency key and payload hash for a JSON payload
    Key {
        /// TOML file with the idempotency settings (defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Scope prefixed to the key, usually the handler name
        #[arg(short, long)]
        scope: String,

        /// JSON payload file (stdin when omitted)
        #[arg(short, long)]
        payload: Option<PathBuf>,
    },

    /// Print a stored record as JSON
    Inspect {
        #[command(flatten)]
        store: StoreArgs,

        /// Idempotency key to look up
        key: String,
    },

    /// Delete expired records and print how many were removed
    Purge {
        #[command(flatten)]
        store: StoreArgs,
    },
}

/// SurrealDB connection options.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Connection URL (e.g. ws://localhost:8000)
    #[arg(long, default_value = "mem://")]
    pub url: String,

    #[arg(long, default_value = "idem")]
    pub namespace: String,

    #[arg(long, default_value = "idempotency")]
    pub database: String,

    #[arg(long, default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Root user, if the server requires authentication
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    #[arg(long, requires = "username")]
    pub password: Option<String>,
}

impl StoreArgs {
    /// Store configuration for these options.
    #[must_use]
    pub fn to_config(&self) -> SurrealConfig {
        let config = SurrealConfig::new(&self.url)
            .with_namespace(&self.namespace)
            .with_database(&self.database)
            .with_table(&self.table);
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => config.with_credentials(username, password),
            _ => config,
        }
    }
}
