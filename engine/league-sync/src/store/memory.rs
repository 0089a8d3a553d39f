use super::{validate_table_name, RecordStore};
use crate::differ::Snapshot;
use crate::error::{Result, SyncError};
use crate::models::{Fields, Marker, Record};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// In-process store, used for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with records for one table
    pub fn with_records(table: &str, records: impl IntoIterator<Item = Record>) -> Self {
        let snapshot: Snapshot = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        let mut tables = HashMap::new();
        tables.insert(table.to_string(), snapshot);
        Self { tables: RwLock::new(tables) }
    }

    pub async fn get(&self, table: &str, id: &str) -> Option<Record> {
        self.tables.read().await.get(table).and_then(|t| t.get(id)).cloned()
    }

    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn load_all(&self, table: &str) -> Result<Snapshot> {
        validate_table_name(table)?;
        Ok(self.tables.read().await.get(table).cloned().unwrap_or_default())
    }

    async fn load_ids(&self, table: &str) -> Result<HashSet<String>> {
        validate_table_name(table)?;
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .ok_or_else(|| SyncError::config(format!("Table {} does not exist", table)))
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<()> {
        validate_table_name(table)?;
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &Fields,
        last_modified: Option<&Marker>,
    ) -> Result<()> {
        validate_table_name(table)?;
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(table)
            .and_then(|t| t.get_mut(id))
            .ok_or_else(|| SyncError::store(format!("No record {} in {}", id, table)))?;
        record.merge_fields(fields);
        if let Some(marker) = last_modified {
            record.last_modified = Some(marker.clone());
        }
        Ok(())
    }
}
