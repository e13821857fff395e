//! Job repository: queries and conditional updates for the `recording_jobs` table.
//!
//! Every write that touches the lease is a single statement, so concurrent
//! pollers (threads or processes) racing on the same row are serialized by
//! SQLite and exactly one of them observes an affected row.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_CANCELLED: &str = "cancelled";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub external_meeting_ref: String,
    pub correlation_ref: Option<String>,
    pub processing_status: String,
    pub matched_video_ref: Option<String>,
    pub matched_transcript_ref: Option<String>,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<String>,
    pub attempt_count: u32,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            external_meeting_ref: row.get("external_meeting_ref")?,
            correlation_ref: row.get("correlation_ref")?,
            processing_status: row.get("processing_status")?,
            matched_video_ref: row.get("matched_video_ref")?,
            matched_transcript_ref: row.get("matched_transcript_ref")?,
            lease_holder: row.get("lease_holder")?,
            lease_expires_at: row.get("lease_expires_at")?,
            attempt_count: row.get("attempt_count")?,
            failure_count: row.get("failure_count")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Filter for pending-job selection.
#[derive(Debug, Clone)]
pub struct PendingFilter {
    /// Current time; leases expiring at or before it are considered free.
    pub now: String,
    /// Only jobs created at or after this instant (recency bound).
    pub created_after: Option<String>,
    /// Only jobs created at or after this instant (age ceiling).
    pub not_older_than: Option<String>,
    pub limit: u32,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO recording_jobs (id, external_meeting_ref, correlation_ref,
             processing_status, matched_video_ref, matched_transcript_ref, lease_holder,
             lease_expires_at, attempt_count, failure_count, last_error, created_at,
             updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.id,
                job.external_meeting_ref,
                job.correlation_ref,
                job.processing_status,
                job.matched_video_ref,
                job.matched_transcript_ref,
                job.lease_holder,
                job.lease_expires_at,
                job.attempt_count,
                job.failure_count,
                job.last_error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM recording_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns pending jobs whose lease is free, most recent first.
pub fn query_pending(db: &Database, filter: &PendingFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec![
            "processing_status = ?1".to_string(),
            "(lease_expires_at IS NULL OR lease_expires_at <= ?2)".to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(STATUS_PENDING.to_string()),
            Box::new(filter.now.clone()),
        ];

        if let Some(ref created_after) = filter.created_after {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(created_after.clone()));
        }
        if let Some(ref not_older_than) = filter.not_older_than {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(not_older_than.clone()));
        }

        param_values.push(Box::new(filter.limit as i64));
        let sql = format!(
            "SELECT * FROM recording_jobs WHERE {} ORDER BY created_at DESC LIMIT ?{}",
            conditions.join(" AND "),
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Cancels every pending job created before `cutoff`, whatever its lease
/// state. Returns the cancelled job ids.
pub fn cancel_stale(db: &Database, cutoff: &str, now: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE recording_jobs
             SET processing_status = ?1, lease_holder = NULL, lease_expires_at = NULL,
                 updated_at = ?3
             WHERE processing_status = ?2 AND created_at < ?4
             RETURNING id",
        )?;
        let ids = stmt
            .query_map(
                params![STATUS_CANCELLED, STATUS_PENDING, now, cutoff],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Cancels a single pending job. Returns false if it was no longer pending.
pub fn cancel(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE recording_jobs
             SET processing_status = ?2, lease_holder = NULL, lease_expires_at = NULL,
                 updated_at = ?4
             WHERE id = ?1 AND processing_status = ?3",
            params![id, STATUS_CANCELLED, STATUS_PENDING, now],
        )?;
        Ok(changed == 1)
    })
}

/// Conditionally takes the lease on a pending job.
///
/// Succeeds only if the lease is absent or expired at `now`. Returns whether
/// this caller won the lease.
pub fn try_acquire_lease(
    db: &Database,
    id: &str,
    holder: &str,
    now: &str,
    expires_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE recording_jobs
             SET lease_holder = ?2, lease_expires_at = ?4, updated_at = ?3,
                 attempt_count = attempt_count + 1
             WHERE id = ?1 AND processing_status = ?5
               AND (lease_expires_at IS NULL OR lease_expires_at <= ?3)",
            params![id, holder, now, expires_at, STATUS_PENDING],
        )?;
        Ok(changed == 1)
    })
}

/// Clears the lease held by `holder`, optionally recording the attempt's error.
///
/// Returns false if the lease had already passed to another holder.
pub fn release_lease(
    db: &Database,
    id: &str,
    holder: &str,
    last_error: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE recording_jobs
             SET lease_holder = NULL, lease_expires_at = NULL, updated_at = ?3,
                 last_error = COALESCE(?4, last_error)
             WHERE id = ?1 AND lease_holder = ?2",
            params![id, holder, now, last_error],
        )?;
        Ok(changed == 1)
    })
}

/// Records a downstream processing failure and clears the lease.
///
/// Once `max_failures` is reached the job moves to `error`; otherwise it
/// stays `pending` for a later cycle. Returns the resulting status.
pub fn record_failure(
    db: &Database,
    id: &str,
    holder: &str,
    error: &str,
    max_failures: u32,
    now: &str,
) -> Result<String, DatabaseError> {
    db.with_conn(|conn| {
        let status: Option<String> = conn
            .query_row(
                "UPDATE recording_jobs
                 SET failure_count = failure_count + 1,
                     last_error = ?3,
                     processing_status = CASE WHEN failure_count + 1 >= ?4 THEN ?5
                                              ELSE processing_status END,
                     lease_holder = NULL, lease_expires_at = NULL, updated_at = ?6
                 WHERE id = ?1 AND lease_holder = ?2
                 RETURNING processing_status",
                params![id, holder, error, max_failures, STATUS_ERROR, now],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(status.unwrap_or_else(|| STATUS_PENDING.to_string()))
    })
}

/// Marks a job completed with its matched files and clears the lease.
///
/// Only applies while `holder` still owns the lease on a pending job.
/// Returns false if the job was cancelled or re-leased in the meantime.
pub fn mark_completed(
    db: &Database,
    id: &str,
    holder: &str,
    video_ref: Option<&str>,
    transcript_ref: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE recording_jobs
             SET processing_status = ?3, matched_video_ref = ?4, matched_transcript_ref = ?5,
                 lease_holder = NULL, lease_expires_at = NULL, last_error = NULL,
                 updated_at = ?6, completed_at = ?6
             WHERE id = ?1 AND lease_holder = ?2 AND processing_status = ?7",
            params![
                id,
                holder,
                STATUS_COMPLETED,
                video_ref,
                transcript_ref,
                now,
                STATUS_PENDING
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM recording_jobs WHERE processing_status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-03-01T10:00:00.000Z";
    const T1: &str = "2026-03-01T10:01:00.000Z";
    const T2: &str = "2026-03-01T10:02:00.000Z";
    const T3: &str = "2026-03-01T10:03:00.000Z";

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str, created_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            external_meeting_ref: "abc-defg-hij".to_string(),
            correlation_ref: Some("alert-7".to_string()),
            processing_status: STATUS_PENDING.to_string(),
            matched_video_ref: None,
            matched_transcript_ref: None,
            lease_holder: None,
            lease_expires_at: None,
            attempt_count: 0,
            failure_count: 0,
            last_error: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            completed_at: None,
        }
    }

    fn pending(now: &str, limit: u32) -> PendingFilter {
        PendingFilter {
            now: now.to_string(),
            created_after: None,
            not_older_than: None,
            limit,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.external_meeting_ref, "abc-defg-hij");
        assert_eq!(found.processing_status, STATUS_PENDING);
        assert_eq!(found.attempt_count, 0);
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_acquire_is_exclusive_until_expiry() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();

        assert!(try_acquire_lease(&db, "job-1", "a", T1, T3).unwrap());
        assert!(!try_acquire_lease(&db, "job-1", "b", T2, T3).unwrap());
        // At the expiry instant the lease is free again.
        assert!(try_acquire_lease(&db, "job-1", "b", T3, "2026-03-01T10:05:00.000Z").unwrap());

        let row = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.lease_holder.as_deref(), Some("b"));
        assert_eq!(row.attempt_count, 2);
    }

    #[test]
    fn test_acquire_rejects_non_pending() {
        let db = test_db();
        let mut job = sample_job("job-1", T0);
        job.processing_status = STATUS_COMPLETED.to_string();
        insert(&db, &job).unwrap();

        assert!(!try_acquire_lease(&db, "job-1", "a", T1, T3).unwrap());
    }

    #[test]
    fn test_release_only_by_holder() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();
        try_acquire_lease(&db, "job-1", "a", T1, T3).unwrap();

        assert!(!release_lease(&db, "job-1", "b", None, T2).unwrap());
        assert!(release_lease(&db, "job-1", "a", Some("no transcript yet"), T2).unwrap());

        let row = find_by_id(&db, "job-1").unwrap().unwrap();
        assert!(row.lease_holder.is_none());
        assert!(row.lease_expires_at.is_none());
        assert_eq!(row.last_error.as_deref(), Some("no transcript yet"));
        assert_eq!(row.processing_status, STATUS_PENDING);
    }

    #[test]
    fn test_query_pending_skips_leased_and_orders_by_recency() {
        let db = test_db();
        insert(&db, &sample_job("old", T0)).unwrap();
        insert(&db, &sample_job("mid", T1)).unwrap();
        insert(&db, &sample_job("new", T2)).unwrap();
        try_acquire_lease(&db, "mid", "a", T2, "2026-03-01T10:04:00.000Z").unwrap();

        let rows = query_pending(&db, &pending(T3, 10)).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let rows = query_pending(&db, &pending(T3, 1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "new");
    }

    #[test]
    fn test_query_pending_recency_bound() {
        let db = test_db();
        insert(&db, &sample_job("old", T0)).unwrap();
        insert(&db, &sample_job("new", T2)).unwrap();

        let rows = query_pending(
            &db,
            &PendingFilter {
                created_after: Some(T1.to_string()),
                ..pending(T3, 10)
            },
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "new");
    }

    #[test]
    fn test_cancel_stale_ignores_lease() {
        let db = test_db();
        insert(&db, &sample_job("stale", T0)).unwrap();
        insert(&db, &sample_job("fresh", T2)).unwrap();
        try_acquire_lease(&db, "stale", "a", T1, T3).unwrap();

        let cancelled = cancel_stale(&db, T1, T2).unwrap();
        assert_eq!(cancelled, vec!["stale".to_string()]);

        let row = find_by_id(&db, "stale").unwrap().unwrap();
        assert_eq!(row.processing_status, STATUS_CANCELLED);
        assert!(row.lease_holder.is_none());
        assert_eq!(count_by_status(&db, STATUS_PENDING).unwrap(), 1);
    }

    #[test]
    fn test_cancel_single() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();
        assert!(cancel(&db, "job-1", T1).unwrap());
        assert!(!cancel(&db, "job-1", T2).unwrap());
    }

    #[test]
    fn test_record_failure_escalates_to_error() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();

        try_acquire_lease(&db, "job-1", "a", T1, T2).unwrap();
        let status = record_failure(&db, "job-1", "a", "processor down", 2, T1).unwrap();
        assert_eq!(status, STATUS_PENDING);

        try_acquire_lease(&db, "job-1", "a", T2, T3).unwrap();
        let status = record_failure(&db, "job-1", "a", "processor down", 2, T2).unwrap();
        assert_eq!(status, STATUS_ERROR);

        let row = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.failure_count, 2);
        assert!(row.lease_holder.is_none());
        assert_eq!(row.last_error.as_deref(), Some("processor down"));
    }

    #[test]
    fn test_mark_completed() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();
        try_acquire_lease(&db, "job-1", "a", T1, T3).unwrap();

        assert!(mark_completed(&db, "job-1", "a", Some("video-9"), "doc-4", T2).unwrap());

        let row = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.processing_status, STATUS_COMPLETED);
        assert_eq!(row.matched_video_ref.as_deref(), Some("video-9"));
        assert_eq!(row.matched_transcript_ref.as_deref(), Some("doc-4"));
        assert_eq!(row.completed_at.as_deref(), Some(T2));
        assert!(row.lease_holder.is_none());
        assert_eq!(count_by_status(&db, STATUS_COMPLETED).unwrap(), 1);
    }

    #[test]
    fn test_mark_completed_requires_lease_and_pending() {
        let db = test_db();
        insert(&db, &sample_job("job-1", T0)).unwrap();
        try_acquire_lease(&db, "job-1", "a", T1, T3).unwrap();

        assert!(!mark_completed(&db, "job-1", "b", None, "doc-4", T2).unwrap());

        cancel_stale(&db, T1, T2).unwrap();
        assert!(!mark_completed(&db, "job-1", "a", None, "doc-4", T2).unwrap());

        let row = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(row.processing_status, STATUS_CANCELLED);
        assert!(row.matched_transcript_ref.is_none());
    }
}
