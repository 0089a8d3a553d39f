//! League Sync
//!
//! Synchronizes fantasy league teams and player statistics from an external data source into
//! the hosted store. A run goes through three steps:
//!
//! - **Fetcher**: streams records from the source, retrying with exponential backoff
//! - **Differ**: compares them with the stored records and builds a changeset of inserts and updates
//! - **Applier**: writes the changeset with upsert semantics, one operation per record
//!
//! The `sync-league-data` and `update-player-stats` binaries each run this once.

pub mod applier;
pub mod cli;
pub mod config;
pub mod differ;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod retry;
pub mod runner;
pub mod store;

pub use applier::{ApplyOutcome, Applier};
pub use config::SyncConfig;
pub use differ::{diff, Diff, Snapshot};
pub use error::{FailedOperation, Result, SyncError};
pub use fetcher::{Fetcher, HttpSource, PageRequest, RecordSource};
pub use models::*;
pub use runner::SyncRunner;
pub use store::{MemoryStore, PostgresStore, PostgrestStore, RecordStore};
