use crate::error::{FailedOperation, Result, SyncError};
use crate::models::{Changeset, Operation};
use crate::store::RecordStore;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

/// What happened to each operation of a changeset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub failed: Vec<FailedOperation>,
}

impl ApplyOutcome {
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }

    /// `PartialApplyFailure` unless every operation was written
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(SyncError::PartialApplyFailure { applied: self.applied(), failed: self.failed })
        }
    }
}

/// Writes a changeset to one table of the store.
///
/// Inserts are upserts and updates only touch the changed fields, so re-applying a changeset
/// converges on the same state. Operations are independent: a failure is recorded and the
/// rest still run, nothing is rolled back.
pub struct Applier<'a> {
    store: &'a dyn RecordStore,
    table: &'a str,
    concurrency: usize,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a dyn RecordStore, table: &'a str) -> Self {
        Self { store, table, concurrency: 1 }
    }

    /// Allow up to `concurrency` writes in flight. A changeset holds one operation per id,
    /// so concurrent writes never touch the same record.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn apply(&self, changeset: Changeset) -> ApplyOutcome {
        let total = changeset.len();

        let results: Vec<(bool, String, Result<()>)> = stream::iter(changeset.into_operations())
            .map(|operation| self.apply_one(operation))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut outcome = ApplyOutcome::default();
        for (is_insert, id, result) in results {
            match result {
                Ok(()) if is_insert => outcome.inserted += 1,
                Ok(()) => outcome.updated += 1,
                Err(e) => {
                    error!("Failed to apply change for {} in {}: {}", id, self.table, e);
                    outcome.failed.push(FailedOperation { id, cause: e.to_string() });
                }
            }
        }

        info!(
            "Applied {}/{} changes to {} ({} inserted, {} updated, {} failed)",
            outcome.applied(),
            total,
            self.table,
            outcome.inserted,
            outcome.updated,
            outcome.failed.len()
        );
        outcome
    }

    async fn apply_one(&self, operation: Operation) -> (bool, String, Result<()>) {
        match operation {
            Operation::Insert(record) => {
                debug!("Upserting {} into {}", record.id, self.table);
                let result = self.store.upsert(self.table, &record).await;
                (true, record.id, result)
            }
            Operation::Update { id, fields, last_modified } => {
                debug!("Updating {} field(s) of {} in {}", fields.len(), id, self.table);
                let result =
                    self.store.update_fields(self.table, &id, &fields, last_modified.as_ref()).await;
                (false, id, result)
            }
        }
    }
}
