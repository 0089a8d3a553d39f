use crate::applier::Applier;
use crate::config::SyncConfig;
use crate::differ::diff;
use crate::error::{Result, SyncError};
use crate::fetcher::{Fetcher, RecordSource};
use crate::models::{key_string, Record, RecordSchema, SyncReport};
use crate::store::RecordStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// One synchronization run: fetch, diff against the store, apply
pub struct SyncRunner<'a> {
    config: &'a SyncConfig,
    schema: RecordSchema,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn RecordStore>,
}

impl<'a> SyncRunner<'a> {
    pub fn new(
        config: &'a SyncConfig,
        schema: RecordSchema,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self { config, schema, source, store }
    }

    /// Run once. Configuration errors, an unreachable source and a store that cannot be read
    /// fail the run; failed writes are reported in `SyncReport::failed`.
    pub async fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.run_into(&mut report).await?;
        Ok(report)
    }

    /// Like `run`, filling `report` as the run goes so the counts reached before a fatal
    /// error are still available
    pub async fn run_into(&self, report: &mut SyncReport) -> Result<()> {
        let fetcher = Fetcher::new(
            Arc::clone(&self.source),
            self.schema.clone(),
            self.config.retry.clone(),
            self.config.source.page_size,
        )
        .with_max_pages(self.config.source.max_pages);
        let fetched = fetcher.fetch_all().await?;
        report.fetched = fetched.records.len() + fetched.malformed.len();
        report.malformed = fetched.malformed.len();

        let records = self.restrict_to_known(fetched.records, report).await?;

        let persisted = self.store.load_all(&self.schema.table).await?;
        info!("Loaded {} stored records from {}", persisted.len(), self.schema.table);

        let result = diff(records, &persisted);
        report.unchanged = result.unchanged;
        info!(
            "Computed {} changes for {} ({} inserts, {} updates, {} unchanged)",
            result.changeset.len(),
            self.schema.table,
            result.changeset.inserts(),
            result.changeset.updates(),
            result.unchanged
        );

        let outcome = Applier::new(self.store.as_ref(), &self.schema.table)
            .with_concurrency(self.config.apply.concurrency)
            .apply(result.changeset)
            .await;

        report.inserted = outcome.inserted;
        report.updated = outcome.updated;
        report.failed = outcome.failed;

        Ok(())
    }

    /// Drop records whose restricting field is not an id in the referenced table
    async fn restrict_to_known(&self, records: Vec<Record>, report: &mut SyncReport) -> Result<Vec<Record>> {
        let Some((table, field)) = &self.schema.restrict_to else {
            return Ok(records);
        };

        let known: HashSet<String> = self.store.load_ids(table).await?;
        if known.is_empty() {
            return Err(SyncError::config(format!(
                "Reference table {} has no rows, every record would be skipped",
                table
            )));
        }
        info!("Found {} known ids in {}", known.len(), table);

        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|record| {
                record.fields.get(field).and_then(key_string).is_some_and(|key| known.contains(&key))
            })
            .collect();

        report.filtered = before - kept.len();
        if report.filtered > 0 {
            info!("Skipped {} records with no matching entry in {}", report.filtered, table);
        }
        Ok(kept)
    }
}
