use super::{validate_table_name, RecordStore};
use crate::config::StoreConfig;
use crate::differ::Snapshot;
use crate::error::{Result, SyncError};
use crate::models::{key_string, Fields, Marker, Record};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Rows requested per page when loading a table
const LOAD_PAGE_SIZE: usize = 1000;

/// Hosted PostgREST endpoint (the Supabase REST API). Record fields map one-to-one onto
/// table columns and the identifier lives in the `id` column. The table's own `updated_at`
/// column, when present, is read back as the marker; the marker is never written.
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    key: String,
}

impl PostgrestStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url: rest_base_url(&config.url), key: config.key.clone() })
    }

    fn table_url(&self, table: &str) -> Result<String> {
        validate_table_name(table)?;
        Ok(format!("{}/{}", self.base_url, table))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", self.key.as_str()).bearer_auth(&self.key)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| SyncError::store(format!("{} failed: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::config(format!("{} failed, table not found: {}", what, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::store(format!("{} failed with status {}: {}", what, status, body)));
        }
        Ok(response)
    }
}

/// Accept either the project URL or the full REST URL
fn rest_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/rest/v1") {
        trimmed.to_string()
    } else {
        format!("{}/rest/v1", trimmed)
    }
}

/// Turn a table row into a record, or `None` when it has no usable id. The `id` column
/// stays in the fields, matching how fetched records keep their identifier fields.
fn record_from_row(mut row: Map<String, Value>) -> Option<Record> {
    let id = row.get("id").and_then(key_string)?;
    let last_modified = row.remove("updated_at").as_ref().and_then(Marker::from_value);

    Some(Record { id, fields: row.into_iter().collect(), last_modified })
}

fn row_from_record(record: &Record) -> Value {
    let mut row: Map<String, Value> = record.fields.clone().into_iter().collect();
    row.entry("id").or_insert_with(|| Value::String(record.id.clone()));
    Value::Object(row)
}

#[async_trait::async_trait]
impl RecordStore for PostgrestStore {
    async fn load_all(&self, table: &str) -> Result<Snapshot> {
        let url = self.table_url(table)?;
        let mut snapshot = Snapshot::new();
        let mut offset = 0;

        loop {
            let request = self.client.get(&url).query(&[
                ("select", "*".to_string()),
                ("order", "id".to_string()),
                ("offset", offset.to_string()),
                ("limit", LOAD_PAGE_SIZE.to_string()),
            ]);
            let rows: Vec<Map<String, Value>> = self
                .send(request, &format!("Loading {}", table))
                .await?
                .json()
                .await
                .map_err(|e| SyncError::store(format!("Failed to parse rows of {}: {}", table, e)))?;

            let count = rows.len();
            for record in rows.into_iter().filter_map(record_from_row) {
                snapshot.insert(record.id.clone(), record);
            }

            debug!("Loaded {} rows of {} at offset {}", count, table, offset);
            if count < LOAD_PAGE_SIZE {
                break;
            }
            offset += count;
        }

        Ok(snapshot)
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table)?)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&vec![row_from_record(record)]);

        self.send(request, &format!("Upserting {} into {}", record.id, table)).await?;
        Ok(())
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &Fields,
        _last_modified: Option<&Marker>,
    ) -> Result<()> {
        let request = self
            .client
            .patch(self.table_url(table)?)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(fields);

        let updated: Vec<Value> = self
            .send(request, &format!("Updating {} in {}", id, table))
            .await?
            .json()
            .await
            .map_err(|e| SyncError::store(format!("Failed to parse update response: {}", e)))?;

        if updated.is_empty() {
            return Err(SyncError::store(format!("No record {} in {}", id, table)));
        }
        Ok(())
    }
}
