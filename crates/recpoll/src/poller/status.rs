use serde::Serialize;

use crate::db::cycle_repo::{self, PollCycleRow};
use crate::db::{job_repo, Database, DatabaseError};
use crate::poller::orchestrator::PollStats;
use crate::resilience::{CircuitBreakerSnapshot, RateLimiterSnapshot};

const RECENT_CYCLES: u32 = 5;

/// Operational view of a poller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Absent when rate limiting is disabled or the poller is not running here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<RateLimiterSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<PollStats>,
    pub pending_jobs: u64,
    /// Latest persisted cycles across all instances, newest first.
    pub recent_cycles: Vec<PollCycleRow>,
}

impl PollerStatus {
    /// Status readable from the shared database alone.
    pub fn from_store(db: &Database) -> Result<Self, DatabaseError> {
        Ok(Self {
            instance_id: None,
            rate_limiter: None,
            circuit_breaker: None,
            last_cycle: None,
            pending_jobs: job_repo::count_by_status(db, job_repo::STATUS_PENDING)?,
            recent_cycles: cycle_repo::recent(db, RECENT_CYCLES)?,
        })
    }
}
