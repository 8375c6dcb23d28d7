//! Nona Store - durable local storage for the chat client
//!
//! SQLite through Sea-ORM, holding a single `local_storage` key-value table.
//! The offline outbox is kept there as a JSON array under
//! [`nona_chat::OUTBOX_STORAGE_KEY`], so queued messages survive a restart.
//!
//! - **KeyValueStore**: get/set/delete of string values by key
//! - **PersistentQueue**: [`nona_chat::DurableQueue`] on top of the key-value table
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use nona_store::{open_database, PersistentQueue, StoreConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let db = open_database(&StoreConfig {
//!     db_path: "nona.db".into(),
//! })
//! .await?;
//! let queue = Arc::new(PersistentQueue::new(db));
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod kv_store;
pub mod migration;
pub mod outbox_queue;

pub use kv_store::KeyValueStore;
pub use outbox_queue::PersistentQueue;

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use tracing::info;

/// Location of the local database
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("nona-store.db"),
        }
    }
}

/// Open (creating if needed) the database and bring its schema up to date
pub async fn open_database(config: &StoreConfig) -> anyhow::Result<DatabaseConnection> {
    let url = format!(
        "sqlite:{}?mode=rwc",
        config.db_path.to_string_lossy().replace('\\', "/")
    );
    let db = Database::connect(&url)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

    Migrator::up(&db, None)
        .await
        .context("Failed to run migrations")?;

    info!("Local store ready at {}", config.db_path.display());
    Ok(db)
}
