//! PostgreSQL snapshot store
//!
//! Each page is written inside one transaction on one pooled connection:
//! the row upserts run in order, then the checkpoint row is updated, then the
//! transaction commits and the connection goes back to the pool.

use crate::config::is_sql_identifier;
use crate::error::SyncError;
use crate::store::{PageCommit, SnapshotStore};
use async_trait::async_trait;
use dunesync_types::{Checkpoint, SnapshotRecord, StoreSettings};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;

/// Snapshot store backed by a PostgreSQL connection pool
#[derive(Clone, Debug)]
pub struct PgSnapshotStore {
    pool: PgPool,
    table: String,
    checkpoint_table: String,
}

impl PgSnapshotStore {
    /// Connect a pool to `database_url`
    pub async fn connect(database_url: &str, settings: &StoreSettings) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect(database_url)
            .await?;

        Self::with_pool(pool, settings)
    }

    /// Wrap an existing pool
    pub fn with_pool(pool: PgPool, settings: &StoreSettings) -> Result<Self, SyncError> {
        for name in [&settings.table, &settings.checkpoint_table] {
            if !is_sql_identifier(name) {
                return Err(SyncError::InvalidConfig(format!(
                    "invalid table name: {}",
                    name
                )));
            }
        }

        Ok(Self {
            pool,
            table: settings.table.clone(),
            checkpoint_table: settings.checkpoint_table.clone(),
        })
    }

    /// Create the snapshot and checkpoint tables if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), SyncError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                address TEXT PRIMARY KEY,
                total_gas_used NUMERIC NOT NULL,
                "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                execution_id BIGINT PRIMARY KEY,
                last_offset BIGINT NOT NULL,
                next_offset BIGINT NOT NULL,
                "updatedAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.checkpoint_table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the stored record for an address
    pub async fn load_record(&self, address: &str) -> Result<Option<SnapshotRecord>, SyncError> {
        let row = sqlx::query(&format!(
            r#"SELECT address, total_gas_used, "updatedAt"::timestamptz AS updated_at FROM {} WHERE address = $1"#,
            self.table
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<SnapshotRecord, SyncError> {
            Ok(SnapshotRecord {
                address: row.try_get("address")?,
                total_gas_used: row.try_get("total_gas_used")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    /// Number of records in the snapshot table
    pub async fn count_records(&self) -> Result<u64, SyncError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        to_u64("count", count)
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn commit_page(&self, page: PageCommit<'_>) -> Result<(), SyncError> {
        let execution_id = to_bigint(page.execution_id)?;
        let last_offset = to_bigint(page.offset)?;
        let next_offset = to_bigint(page.next_offset)?;

        let upsert = format!(
            r#"
            INSERT INTO {} (address, total_gas_used, "updatedAt")
            VALUES ($1, $2, NOW())
            ON CONFLICT (address) DO UPDATE
            SET total_gas_used = $2, "updatedAt" = NOW()
            "#,
            self.table
        );

        // One connection for the whole page
        let mut tx = self.pool.begin().await?;

        for row in page.rows {
            sqlx::query(&upsert)
                .bind(&row.address)
                .bind(&row.total_gas_used)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (execution_id, last_offset, next_offset, "updatedAt")
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (execution_id) DO UPDATE
            SET last_offset = $2, next_offset = $3, "updatedAt" = NOW()
            "#,
            self.checkpoint_table
        ))
        .bind(execution_id)
        .bind(last_offset)
        .bind(next_offset)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Committed {} rows for execution {} offset {}",
            page.rows.len(),
            page.execution_id,
            page.offset
        );
        Ok(())
    }

    async fn load_checkpoint(&self, execution_id: u64) -> Result<Option<Checkpoint>, SyncError> {
        let row = sqlx::query(&format!(
            r#"SELECT execution_id, last_offset, next_offset, "updatedAt" AS updated_at FROM {} WHERE execution_id = $1"#,
            self.checkpoint_table
        ))
        .bind(to_bigint(execution_id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_checkpoint).transpose()
    }

    async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, SyncError> {
        let rows = sqlx::query(&format!(
            r#"SELECT execution_id, last_offset, next_offset, "updatedAt" AS updated_at FROM {} ORDER BY execution_id"#,
            self.checkpoint_table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_checkpoint).collect()
    }

    async fn clear_checkpoint(&self, execution_id: u64) -> Result<bool, SyncError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE execution_id = $1",
            self.checkpoint_table
        ))
        .bind(to_bigint(execution_id)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn to_bigint(value: u64) -> Result<i64, SyncError> {
    i64::try_from(value)
        .map_err(|_| SyncError::InvalidConfig(format!("{} does not fit in BIGINT", value)))
}

/// Convert a database row to a Checkpoint
fn row_to_checkpoint(row: PgRow) -> Result<Checkpoint, SyncError> {
    Ok(Checkpoint {
        execution_id: to_u64("execution_id", row.try_get("execution_id")?)?,
        last_offset: to_u64("last_offset", row.try_get("last_offset")?)?,
        next_offset: to_u64("next_offset", row.try_get("next_offset")?)?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Read back a BIGINT column that must hold a non-negative value
fn to_u64(column: &str, value: i64) -> Result<u64, SyncError> {
    u64::try_from(value).map_err(|e| {
        SyncError::StorageWrite(sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
}
