//! SQLite idempotency ledger.
//!
//! `INSERT OR IGNORE` on the primary key is the conditional create; when the
//! insert is ignored the original record is returned so the loser of a race
//! can observe what the winner committed.

use chrono::Utc;
use sqlx::Row;
use windlass_core::repository::{IdempotencyLedger, LedgerEntry};
use windlass_types::error::StoreError;

use super::workflow::{SqliteStore, format_datetime};

impl IdempotencyLedger for SqliteStore {
    async fn create_if_absent(
        &self,
        key: &str,
        record: &serde_json::Value,
    ) -> Result<LedgerEntry, StoreError> {
        let record_str =
            serde_json::to_string(record).map_err(|e| StoreError::Query(e.to_string()))?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO idempotency_ledger (key, record, created_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(&record_str)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(LedgerEntry {
                created: true,
                record: record.clone(),
            });
        }

        let existing = self
            .get(key)
            .await?
            .ok_or_else(|| StoreError::Query(format!("ledger key vanished: {key}")))?;
        Ok(LedgerEntry {
            created: false,
            record: existing,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT record FROM idempotency_ledger WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|row| {
            let record: String = row
                .try_get("record")
                .map_err(|e| StoreError::Query(e.to_string()))?;
            serde_json::from_str(&record)
                .map_err(|e| StoreError::Query(format!("invalid ledger record: {e}")))
        })
        .transpose()
    }
}
