//! Postgres implementation of ScanCursorRepository and FailureRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ReconciliationFailureRow, ScanCursorRow};
use crate::domain::{ObservedTransfer, ReconciliationFailure, ScanCursor};
use crate::ports::{FailureRepository, RepositoryResult, ScanCursorRepository};

#[derive(Clone)]
pub struct PostgresScanRepository {
    pool: PgPool,
}

impl PostgresScanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanCursorRepository for PostgresScanRepository {
    async fn load(&self) -> RepositoryResult<Option<ScanCursor>> {
        let row = sqlx::query_as::<_, ScanCursorRow>(
            r#"
            SELECT last_processed_block_number, last_processed_timestamp,
                   last_successful_scan, updated_at
            FROM scan_cursor WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ScanCursorRow::into_domain))
    }

    async fn save(&self, cursor: &ScanCursor) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_cursor (
                id, last_processed_block_number, last_processed_timestamp,
                last_successful_scan, updated_at
            ) VALUES (1, $1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                last_processed_block_number = EXCLUDED.last_processed_block_number,
                last_processed_timestamp = EXCLUDED.last_processed_timestamp,
                last_successful_scan = EXCLUDED.last_successful_scan,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(i64::try_from(cursor.last_processed_block_number).unwrap_or(i64::MAX))
        .bind(cursor.last_processed_timestamp)
        .bind(cursor.last_successful_scan)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl FailureRepository for PostgresScanRepository {
    async fn record(
        &self,
        transfer: &ObservedTransfer,
        error: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReconciliationFailure> {
        let row = sqlx::query_as::<_, ReconciliationFailureRow>(
            r#"
            INSERT INTO reconciliation_failures (
                id, tx_hash, from_address, to_address, amount, error,
                attempts, first_seen_at, last_seen_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $7)
            ON CONFLICT (tx_hash) WHERE resolved_at IS NULL DO UPDATE SET
                attempts = reconciliation_failures.attempts + 1,
                error = EXCLUDED.error,
                last_seen_at = EXCLUDED.last_seen_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&transfer.tx_hash)
        .bind(&transfer.from)
        .bind(&transfer.to)
        .bind(transfer.amount.to_bigdecimal())
        .bind(error)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn resolve(&self, tx_hash: &str, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query(
            "UPDATE reconciliation_failures SET resolved_at = $2 WHERE tx_hash = $1 AND resolved_at IS NULL",
        )
        .bind(tx_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_open(&self, limit: i64) -> RepositoryResult<Vec<ReconciliationFailure>> {
        let rows = sqlx::query_as::<_, ReconciliationFailureRow>(
            r#"
            SELECT * FROM reconciliation_failures
            WHERE resolved_at IS NULL
            ORDER BY last_seen_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(ReconciliationFailureRow::into_domain)
            .collect()
    }
}
