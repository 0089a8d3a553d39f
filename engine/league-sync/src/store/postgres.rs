use super::{validate_table_name, RecordStore};
use crate::config::StoreConfig;
use crate::differ::Snapshot;
use crate::error::{Result, SyncError};
use crate::models::{Fields, Marker, Record};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::info;

/// Direct Postgres access. Each table stores the record fields as one JSONB document:
///
/// ```sql
/// id TEXT PRIMARY KEY, fields JSONB, last_modified JSONB, synced_at TIMESTAMPTZ
/// ```
pub struct PostgresStore {
    pool: PgPool,
    ensured: Mutex<HashSet<String>>,
}

impl PostgresStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| SyncError::store(format!("Failed to connect to database: {}", e)))?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool, ensured: Mutex::new(HashSet::new()) }
    }

    /// Create the table on first use
    async fn ensure_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;

        let mut ensured = self.ensured.lock().await;
        if ensured.contains(table) {
            return Ok(());
        }

        sqlx::query(&create_table_sql(table)).execute(&self.pool).await?;
        info!("Ensured table {} exists", table);
        ensured.insert(table.to_string());
        Ok(())
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            fields JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            last_modified JSONB,
            synced_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    )
}

/// Only the id column is read, so reference tables need not use the JSONB layout
fn reference_ids_sql(table: &str) -> String {
    format!("SELECT id::text FROM {}", table)
}

fn upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {table} (id, fields, last_modified, synced_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (id)
        DO UPDATE SET
            fields = EXCLUDED.fields,
            last_modified = EXCLUDED.last_modified,
            synced_at = EXCLUDED.synced_at
        "#
    )
}

fn update_sql(table: &str) -> String {
    format!(
        r#"
        UPDATE {table}
        SET fields = fields || $2,
            last_modified = COALESCE($3, last_modified),
            synced_at = now()
        WHERE id = $1
        "#
    )
}

#[async_trait::async_trait]
impl RecordStore for PostgresStore {
    async fn load_all(&self, table: &str) -> Result<Snapshot> {
        self.ensure_table(table).await?;

        let rows: Vec<(String, Json<Fields>, Option<Json<Marker>>)> =
            sqlx::query_as(&format!("SELECT id, fields, last_modified FROM {}", table))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, Json(fields), marker)| {
                let record = Record { id: id.clone(), fields, last_modified: marker.map(|Json(m)| m) };
                (id, record)
            })
            .collect())
    }

    async fn load_ids(&self, table: &str) -> Result<HashSet<String>> {
        validate_table_name(table)?;

        let exists: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(SyncError::config(format!("Table {} does not exist", table)));
        }

        let ids: Vec<String> = sqlx::query_scalar(&reference_ids_sql(table)).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<()> {
        self.ensure_table(table).await?;

        sqlx::query(&upsert_sql(table))
            .bind(&record.id)
            .bind(Json(&record.fields))
            .bind(record.last_modified.as_ref().map(Json))
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::store(format!("Failed to upsert {} into {}: {}", record.id, table, e)))?;

        Ok(())
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: &Fields,
        last_modified: Option<&Marker>,
    ) -> Result<()> {
        self.ensure_table(table).await?;

        let result = sqlx::query(&update_sql(table))
            .bind(id)
            .bind(Json(fields))
            .bind(last_modified.map(Json))
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::store(format!("Failed to update {} in {}: {}", id, table, e)))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::store(format!("No record {} in {}", id, table)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_target_table() {
        assert!(create_table_sql("teams").contains("CREATE TABLE IF NOT EXISTS teams ("));
        assert!(create_table_sql("teams").contains("DEFAULT '{}'::jsonb"));
        assert!(upsert_sql("player_stats").contains("INSERT INTO player_stats"));
        assert!(upsert_sql("player_stats").contains("ON CONFLICT (id)"));
        assert!(update_sql("teams").contains("fields = fields || $2"));
        assert_eq!(reference_ids_sql("players"), "SELECT id::text FROM players");
        assert!(!reference_ids_sql("players").contains("CREATE"));
    }
}
