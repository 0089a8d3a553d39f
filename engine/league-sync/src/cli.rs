//! Shared entry point for the sync scripts

use crate::config::SyncConfig;
use crate::fetcher::{HttpSource, RecordSource};
use crate::models::{EntityKind, SyncReport};
use crate::runner::SyncRunner;
use crate::store;
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};

/// Run one sync for `kind` against the configured source and store.
///
/// Prints the summary line on stdout once the source and store are open, also when the run
/// fails part way. Any error, including a partial apply failure, is returned so the process
/// exits non-zero.
pub async fn run_script(kind: EntityKind) -> anyhow::Result<()> {
    info!("Starting {} sync...", kind.label());

    let config = SyncConfig::from_env().context("Failed to load configuration")?;

    let source: Arc<dyn RecordSource> = Arc::new(HttpSource::new(&config.source)?);
    let store = store::connect(&config.store)
        .await
        .context("Failed to open the store")?;

    let runner = SyncRunner::new(&config, kind.schema(), source, store);
    let mut report = SyncReport::default();
    let result = runner.run_into(&mut report).await;

    println!("{}", report);

    if let Err(e) = result {
        error!("Error syncing {}: {}", kind.label(), e);
        return Err(e.into());
    }

    if let Err(e) = report.ensure_success() {
        error!("Error syncing {}: {}", kind.label(), e);
        return Err(e.into());
    }

    info!("{} sync completed successfully", kind.label());
    Ok(())
}
