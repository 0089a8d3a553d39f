//! Persistent store backends
//!
//! Every backend keeps one table per entity kind, keyed by the record identifier. Writes are
//! upserts or field patches, so repeating an operation converges on the same state.

pub mod memory;
pub mod postgres;
pub mod postgrest;

use crate::config::StoreConfig;
use crate::differ::Snapshot;
use crate::error::{Result, SyncError};
use crate::models::{Fields, Marker, Record};
use std::collections::HashSet;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use postgrest::PostgrestStore;

/// Abstract trait for the record store
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Load every stored record of a table, keyed by id
    async fn load_all(&self, table: &str) -> Result<Snapshot>;

    /// Ids of a reference table this crate reads but never writes. A missing table is a
    /// `Configuration` error and is never created.
    async fn load_ids(&self, table: &str) -> Result<HashSet<String>> {
        Ok(self.load_all(table).await?.into_keys().collect())
    }

    /// Insert the record, or replace it if the id already exists
    async fn upsert(&self, table: &str, record: &Record) -> Result<()>;

    /// Overwrite the given fields of an existing record, recording the new marker if any
    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &Fields,
        last_modified: Option<&Marker>,
    ) -> Result<()>;
}

/// Open the backend matching the store URL scheme
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    let scheme = config.url.split("://").next().unwrap_or_default();

    match scheme {
        "postgres" | "postgresql" => Ok(Arc::new(PostgresStore::connect(config).await?)),
        "http" | "https" => Ok(Arc::new(PostgrestStore::new(config)?)),
        _ => Err(SyncError::config(format!("Unsupported store URL scheme: {}", config.url))),
    }
}

/// Table names end up inside SQL and URLs, so only plain identifiers are allowed
pub fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(SyncError::config(format!("Invalid table name: {:?}", table)))
    }
}
