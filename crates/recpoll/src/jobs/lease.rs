//! Database-backed job leases.
//!
//! A lease is the only concurrency control between poller instances. Taking
//! one is a single conditional UPDATE; whoever sees an affected row owns the
//! job until it releases or the lease expires.

use chrono::{DateTime, Duration, Utc};

use crate::db::{format_timestamp, job_repo, Database, DatabaseError};
use crate::jobs::job::{Lease, ProcessingStatus};

pub const DEFAULT_LEASE_TIMEOUT_SECS: i64 = 120;

#[derive(Debug, Clone)]
pub struct LeaseStore {
    db: Database,
    holder: String,
    timeout: Duration,
}

impl LeaseStore {
    pub fn new(db: Database, holder: impl Into<String>, timeout: Duration) -> Self {
        Self {
            db,
            holder: holder.into(),
            timeout,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tries to take the lease on a pending job. Losing is not an error.
    pub fn try_acquire(&self, job_id: &str) -> Result<Option<Lease>, DatabaseError> {
        self.try_acquire_at(job_id, Utc::now())
    }

    pub fn try_acquire_at(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, DatabaseError> {
        let expires_at = now + self.timeout;
        let won = job_repo::try_acquire_lease(
            &self.db,
            job_id,
            &self.holder,
            &format_timestamp(now),
            &format_timestamp(expires_at),
        )?;

        if !won {
            tracing::debug!(job_id, holder = %self.holder, "Lease held elsewhere");
            return Ok(None);
        }

        tracing::debug!(job_id, holder = %self.holder, %expires_at, "Lease acquired");
        Ok(Some(Lease {
            holder: self.holder.clone(),
            expires_at,
        }))
    }

    /// Clears our lease, leaving the job pending. `note` is kept as `last_error`.
    pub fn release(&self, job_id: &str, note: Option<&str>) -> Result<bool, DatabaseError> {
        let released =
            job_repo::release_lease(&self.db, job_id, &self.holder, note, &now_timestamp())?;
        if !released {
            tracing::warn!(
                job_id,
                holder = %self.holder,
                "Lease was no longer ours at release (expired and re-acquired?)"
            );
        }
        Ok(released)
    }

    /// Clears our lease and records a processing failure.
    ///
    /// The job moves to `error` after `max_failures` failures.
    pub fn release_failed(
        &self,
        job_id: &str,
        error: &str,
        max_failures: u32,
    ) -> Result<ProcessingStatus, DatabaseError> {
        let status = job_repo::record_failure(
            &self.db,
            job_id,
            &self.holder,
            error,
            max_failures,
            &now_timestamp(),
        )?;
        status.parse()
    }

    /// Marks the job completed with its matched files, clearing the lease.
    ///
    /// Returns false if the lease was lost or the job left `pending` (for
    /// example a stale sweep cancelled it); the row is then left untouched.
    pub fn release_completed(
        &self,
        job_id: &str,
        video_ref: Option<&str>,
        transcript_ref: &str,
    ) -> Result<bool, DatabaseError> {
        let completed = job_repo::mark_completed(
            &self.db,
            job_id,
            &self.holder,
            video_ref,
            transcript_ref,
            &now_timestamp(),
        )?;
        if !completed {
            tracing::warn!(
                job_id,
                holder = %self.holder,
                "Job no longer leased and pending at completion"
            );
        }
        Ok(completed)
    }
}

fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
