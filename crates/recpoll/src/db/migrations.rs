//! Schema versioning for the poller store.
//!
//! Each migration is applied inside its own transaction together with its
//! `_migrations` row, so a crash never leaves a half-applied version.

use chrono::Utc;
use rusqlite::{params, Connection};

use super::error::DatabaseError;
use super::format_timestamp;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "recording_jobs",
        sql: include_str!("sql/001_create_recording_jobs.sql"),
    },
    Migration {
        version: 2,
        name: "poll_cycles",
        sql: include_str!("sql/002_create_poll_cycles.sql"),
    },
];

fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| {
        r.get(0)
    })?;
    Ok(version)
}

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let failed = |e: rusqlite::Error| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, format_timestamp(Utc::now())],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        log::info!("Applied migration v{}: {}", migration.version, migration.name);
    }

    Ok(())
}
