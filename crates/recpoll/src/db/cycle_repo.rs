//! Poll cycle history, one row per completed or skipped cycle.

use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};

/// A single cycle history row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCycleRow {
    pub instance_id: String,
    pub started_at: String,
    pub checked: u32,
    pub processed: u32,
    pub errors: u32,
    pub skipped: u32,
    pub cancelled: u32,
    pub circuit_open: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Appends a cycle to the history.
pub fn insert(db: &Database, row: &PollCycleRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO poll_cycles (instance_id, started_at, checked, processed, errors,
             skipped, cancelled, circuit_open, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.instance_id,
                row.started_at,
                row.checked,
                row.processed,
                row.errors,
                row.skipped,
                row.cancelled,
                row.circuit_open,
                row.duration_ms as i64,
                row.error,
            ],
        )?;
        Ok(())
    })
}

/// Returns the most recent cycles, newest first.
pub fn recent(db: &Database, limit: u32) -> Result<Vec<PollCycleRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT instance_id, started_at, checked, processed, errors, skipped, cancelled,
                    circuit_open, duration_ms, error
             FROM poll_cycles ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(PollCycleRow {
                    instance_id: row.get(0)?,
                    started_at: row.get(1)?,
                    checked: row.get(2)?,
                    processed: row.get(3)?,
                    errors: row.get(4)?,
                    skipped: row.get(5)?,
                    cancelled: row.get(6)?,
                    circuit_open: row.get(7)?,
                    duration_ms: row.get::<_, i64>(8)?.max(0) as u64,
                    error: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
