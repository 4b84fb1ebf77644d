//! SQLite workflow store.
//!
//! Implements `WorkflowStore` from `windlass-core` using sqlx with split
//! read/write pools. Conditional creates map to `INSERT OR IGNORE`, terminal
//! commits to status-guarded `UPDATE`s checked via `rows_affected`, so the
//! at-most-once guarantees hold across processes sharing one database.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use uuid::Uuid;
use windlass_core::repository::{StepCreate, WorkflowStore};
use windlass_types::error::StoreError;
use windlass_types::event::{EventKind, RunEvent};
use windlass_types::run::{Run, RunStatus};
use windlass_types::step::{Step, StepStatus};

use super::pool::DatabasePool;

/// SQLite-backed workflow store and idempotency ledger.
pub struct SqliteStore {
    pub(crate) pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    workflow: String,
    status: String,
    input: Option<String>,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow: row.try_get("workflow")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_run(self) -> Result<Run, StoreError> {
        Ok(Run {
            id: parse_uuid(&self.id)?,
            workflow: self.workflow,
            status: decode_status(&self.status)?,
            input: parse_json_opt(self.input.as_deref(), "run input")?,
            result: parse_json_opt(self.result.as_deref(), "run result")?,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepRow {
    run_id: String,
    step_id: String,
    name: String,
    status: String,
    attempt: i64,
    idempotency_key: String,
    input: Option<String>,
    output: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            idempotency_key: row.try_get("idempotency_key")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_step(self) -> Result<Step, StoreError> {
        Ok(Step {
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            name: self.name,
            status: decode_status(&self.status)?,
            attempt: self.attempt as u32,
            idempotency_key: self.idempotency_key,
            input: parse_json_opt(self.input.as_deref(), "step input")?,
            output: parse_json_opt(self.output.as_deref(), "step output")?,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct EventRow {
    id: String,
    run_id: String,
    kind: String,
    payload: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_event(self) -> Result<RunEvent, StoreError> {
        let kind: EventKind = decode_status(&self.kind)?;
        Ok(RunEvent {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            kind,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| StoreError::Query(format!("invalid event payload: {e}")))?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse::<Uuid>()
        .map_err(|e| StoreError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json_opt(
    s: Option<&str>,
    what: &str,
) -> Result<Option<serde_json::Value>, StoreError> {
    s.map(|s| {
        serde_json::from_str(s).map_err(|e| StoreError::Query(format!("invalid {what}: {e}")))
    })
    .transpose()
}

fn json_opt(value: Option<&serde_json::Value>) -> Result<Option<String>, StoreError> {
    value
        .map(|v| serde_json::to_string(v).map_err(|e| StoreError::Query(e.to_string())))
        .transpose()
}

/// Serialize a snake_case status enum to its bare string form.
fn encode_status<T: Serialize>(status: &T) -> Result<String, StoreError> {
    let value = serde_json::to_value(status).map_err(|e| StoreError::Query(e.to_string()))?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StoreError::Query("status did not serialize to a string".to_string()))
}

fn decode_status<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| StoreError::Query(format!("invalid status: {s}")))
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

const RUN_NON_TERMINAL: &str = "status IN ('created', 'running')";
const STEP_NON_TERMINAL: &str = "status NOT IN ('completed', 'failed')";

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteStore {
    async fn create_run(&self, run: &Run) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO runs
               (id, workflow, status, input, result, error, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.workflow)
        .bind(encode_status(&run.status)?)
        .bind(json_opt(run.input.as_ref())?)
        .bind(json_opt(run.result.as_ref())?)
        .bind(&run.error)
        .bind(format_datetime(&run.created_at))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| RunRow::from_row(&row).map_err(query_err)?.into_run())
            .transpose()
    }

    async fn mark_run_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE runs SET status = 'running' WHERE id = ? AND status = 'created'")
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(&format!(
            "UPDATE runs SET status = ?, result = ?, error = ?, completed_at = ? \
             WHERE id = ? AND {RUN_NON_TERMINAL}"
        ))
        .bind(encode_status(&status)?)
        .bind(json_opt(result)?)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish "already terminal" from "no such run".
        match self.get_run(run_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn create_step_if_absent(&self, step: &Step) -> Result<StepCreate, StoreError> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO steps
               (run_id, step_id, name, status, attempt, idempotency_key,
                input, output, error, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.run_id.to_string())
        .bind(&step.step_id)
        .bind(&step.name)
        .bind(encode_status(&step.status)?)
        .bind(step.attempt as i64)
        .bind(&step.idempotency_key)
        .bind(json_opt(step.input.as_ref())?)
        .bind(json_opt(step.output.as_ref())?)
        .bind(&step.error)
        .bind(format_datetime(&step.created_at))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() > 0 {
            return Ok(StepCreate::Created);
        }

        let row = sqlx::query("SELECT * FROM steps WHERE run_id = ? AND step_id = ?")
            .bind(step.run_id.to_string())
            .bind(&step.step_id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(StepCreate::Existing(
            StepRow::from_row(&row).map_err(query_err)?.into_step()?,
        ))
    }

    async fn mark_step_running(
        &self,
        run_id: Uuid,
        step_id: &str,
        attempt: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "UPDATE steps SET status = 'running', attempt = ? \
             WHERE run_id = ? AND step_id = ? AND {STEP_NON_TERMINAL}"
        ))
        .bind(attempt as i64)
        .bind(run_id.to_string())
        .bind(step_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn mark_step_deferred(&self, run_id: Uuid, step_id: &str) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "UPDATE steps SET status = 'deferred' \
             WHERE run_id = ? AND step_id = ? AND {STEP_NON_TERMINAL}"
        ))
        .bind(run_id.to_string())
        .bind(step_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn complete_step(
        &self,
        run_id: Uuid,
        step_id: &str,
        output: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let output_str =
            serde_json::to_string(output).map_err(|e| StoreError::Query(e.to_string()))?;
        let updated = sqlx::query(&format!(
            "UPDATE steps SET status = 'completed', output = ?, completed_at = ? \
             WHERE run_id = ? AND step_id = ? AND {STEP_NON_TERMINAL}"
        ))
        .bind(output_str)
        .bind(format_datetime(&Utc::now()))
        .bind(run_id.to_string())
        .bind(step_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        self.step_exists(run_id, step_id).await?;
        Ok(false)
    }

    async fn fail_step(&self, run_id: Uuid, step_id: &str, error: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(&format!(
            "UPDATE steps SET status = 'failed', error = ?, completed_at = ? \
             WHERE run_id = ? AND step_id = ? AND {STEP_NON_TERMINAL}"
        ))
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(run_id.to_string())
        .bind(step_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        self.step_exists(run_id, step_id).await?;
        Ok(false)
    }

    async fn list_steps(&self, run_id: Uuid) -> Result<Vec<Step>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM steps WHERE run_id = ? ORDER BY created_at ASC, step_id ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| StepRow::from_row(row).map_err(query_err)?.into_step())
            .collect()
    }

    async fn append_event(&self, event: &RunEvent) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(&event.payload).map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query(
            "INSERT INTO run_events (id, run_id, kind, payload, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.run_id.to_string())
        .bind(encode_status(&event.kind)?)
        .bind(payload)
        .bind(format_datetime(&event.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, run_id, kind, payload, created_at FROM run_events \
             WHERE run_id = ? ORDER BY seq ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| EventRow::from_row(row).map_err(query_err)?.into_event())
            .collect()
    }
}

impl SqliteStore {
    async fn step_exists(&self, run_id: Uuid, step_id: &str) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT 1 FROM steps WHERE run_id = ? AND step_id = ?")
            .bind(run_id.to_string())
            .bind(step_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        match row {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }
}
