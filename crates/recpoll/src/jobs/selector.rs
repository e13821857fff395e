//! Pending-job selection.
//!
//! Before selecting, jobs past the age ceiling are swept to `cancelled`
//! whatever their lease state. Candidates are then read most-recent-first
//! from the recency window, falling back to the whole eligible backlog when
//! the window is empty.

use chrono::{DateTime, Duration, Utc};

use crate::db::job_repo::{self, PendingFilter};
use crate::db::{format_timestamp, Database, DatabaseError};
use crate::jobs::job::Job;

#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Pending, unleased jobs, most recent first.
    pub candidates: Vec<Job>,
    /// Ids of jobs cancelled for exceeding the age ceiling.
    pub cancelled: Vec<String>,
    /// Whether candidates came from the unbounded fallback query.
    pub used_fallback: bool,
}

impl Selection {
    /// Jobs looked at this cycle, evicted ones included.
    pub fn checked(&self) -> usize {
        self.candidates.len() + self.cancelled.len()
    }
}

#[derive(Debug, Clone)]
pub struct JobSelector {
    db: Database,
    recency_lookback: Duration,
    max_age: Duration,
}

impl JobSelector {
    pub fn new(db: Database, recency_lookback: Duration, max_age: Duration) -> Self {
        Self {
            db,
            recency_lookback,
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn select_pending(&self, limit: u32) -> Result<Selection, DatabaseError> {
        self.select_pending_at(limit, Utc::now())
    }

    pub fn select_pending_at(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Selection, DatabaseError> {
        let now_ts = format_timestamp(now);
        let cutoff = format_timestamp(now - self.max_age);

        let cancelled = job_repo::cancel_stale(&self.db, &cutoff, &now_ts)?;
        if !cancelled.is_empty() {
            tracing::info!(
                count = cancelled.len(),
                max_age_hours = self.max_age.num_hours(),
                "Cancelled stale pending jobs"
            );
        }

        let primary = PendingFilter {
            now: now_ts,
            created_after: Some(format_timestamp(now - self.recency_lookback)),
            not_older_than: Some(cutoff),
            limit,
        };
        let mut rows = job_repo::query_pending(&self.db, &primary)?;
        let mut used_fallback = false;

        if rows.is_empty() {
            let fallback = PendingFilter {
                created_after: None,
                ..primary
            };
            rows = job_repo::query_pending(&self.db, &fallback)?;
            used_fallback = !rows.is_empty();
        }

        let candidates = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            candidates = candidates.len(),
            cancelled = cancelled.len(),
            used_fallback,
            "Selected pending jobs"
        );

        Ok(Selection {
            candidates,
            cancelled,
            used_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{enqueue, load, NewJob, ProcessingStatus};
    use crate::jobs::lease::LeaseStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn selector(db: &Database) -> JobSelector {
        JobSelector::new(db.clone(), Duration::minutes(120), Duration::hours(24))
    }

    fn job_aged(db: &Database, meeting: &str, age: Duration) -> Job {
        enqueue(db, NewJob::new(meeting).created_at(now() - age)).unwrap()
    }

    #[test]
    fn test_primary_window_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        job_aged(&db, "older", Duration::minutes(90));
        job_aged(&db, "newer", Duration::minutes(10));
        job_aged(&db, "outside", Duration::hours(5));

        let selection = selector(&db).select_pending_at(10, now()).unwrap();
        let meetings: Vec<&str> = selection
            .candidates
            .iter()
            .map(|j| j.external_meeting_ref.as_str())
            .collect();
        assert_eq!(meetings, vec!["newer", "older"]);
        assert!(!selection.used_fallback);
    }

    #[test]
    fn test_fallback_when_window_empty() {
        let db = Database::open_in_memory().unwrap();
        job_aged(&db, "five-hours", Duration::hours(5));
        job_aged(&db, "ten-hours", Duration::hours(10));

        let selection = selector(&db).select_pending_at(1, now()).unwrap();
        assert!(selection.used_fallback);
        assert_eq!(selection.candidates.len(), 1);
        assert_eq!(selection.candidates[0].external_meeting_ref, "five-hours");
    }

    #[test]
    fn test_stale_jobs_cancelled_even_when_leased() {
        let db = Database::open_in_memory().unwrap();
        let stale = job_aged(&db, "stale", Duration::hours(25));
        let fresh = job_aged(&db, "fresh", Duration::minutes(5));

        LeaseStore::new(db.clone(), "other-host", Duration::minutes(2))
            .try_acquire_at(&stale.id, now())
            .unwrap()
            .unwrap();

        let selection = selector(&db).select_pending_at(10, now()).unwrap();
        assert_eq!(selection.cancelled, vec![stale.id.clone()]);
        assert_eq!(selection.candidates.len(), 1);
        assert_eq!(selection.candidates[0].id, fresh.id);
        assert_eq!(selection.checked(), 2);

        let stale = load(&db, &stale.id).unwrap().unwrap();
        assert_eq!(stale.processing_status, ProcessingStatus::Cancelled);
        assert!(stale.lease.is_none());
    }

    #[test]
    fn test_leased_jobs_excluded() {
        let db = Database::open_in_memory().unwrap();
        let leased = job_aged(&db, "leased", Duration::minutes(5));
        job_aged(&db, "free", Duration::minutes(6));

        LeaseStore::new(db.clone(), "other-host", Duration::minutes(2))
            .try_acquire_at(&leased.id, now())
            .unwrap()
            .unwrap();

        let selection = selector(&db).select_pending_at(10, now()).unwrap();
        assert_eq!(selection.candidates.len(), 1);
        assert_eq!(selection.candidates[0].external_meeting_ref, "free");

        // Expired leases make the job selectable again.
        let later = now() + Duration::minutes(3);
        let selection = selector(&db).select_pending_at(10, later).unwrap();
        assert_eq!(selection.candidates.len(), 2);
    }

    #[test]
    fn test_empty_store() {
        let db = Database::open_in_memory().unwrap();
        let selection = selector(&db).select_pending_at(10, now()).unwrap();
        assert!(selection.candidates.is_empty());
        assert!(!selection.used_fallback);
        assert_eq!(selection.checked(), 0);
    }
}
