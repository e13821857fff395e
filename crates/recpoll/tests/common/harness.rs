use std::sync::Arc;

use chrono::{Duration, Utc};
use recpoll::db::Database;
use recpoll::jobs::{enqueue, job, Job, NewJob};
use recpoll::{Poller, PollerConfig};

use super::fakes::{FakeFileApi, FakeProcessor};

/// In-memory database plus fake collaborators, shared by any number of pollers.
pub struct Harness {
    pub db: Database,
    pub api: Arc<FakeFileApi>,
    pub processor: Arc<FakeProcessor>,
    pub config: PollerConfig,
}

impl Harness {
    pub fn new() -> Self {
        let mut harness = Self::with_default_rate_limits();
        // Request spacing only adds wall-clock time here.
        harness.config.rate_limit.min_interval_ms = 0;
        harness
    }

    /// Same collaborators, but with the shipped rate-limit settings.
    pub fn with_default_rate_limits() -> Self {
        let mut config = PollerConfig::default();
        config.lease.holder = Some("test-poller".to_string());

        Self {
            db: Database::open_in_memory().expect("in-memory database"),
            api: Arc::new(FakeFileApi::new()),
            processor: Arc::new(FakeProcessor::new()),
            config,
        }
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.config.clone(),
            self.db.clone(),
            self.api.clone(),
            self.processor.clone(),
        )
    }

    /// A second poller instance against the same store.
    pub fn poller_as(&self, holder: &str) -> Poller {
        let mut config = self.config.clone();
        config.lease.holder = Some(holder.to_string());
        Poller::new(config, self.db.clone(), self.api.clone(), self.processor.clone())
    }

    /// A pending job created `age` ago.
    pub fn pending_job(&self, meeting_ref: &str, age: Duration) -> Job {
        enqueue(&self.db, NewJob::new(meeting_ref).created_at(Utc::now() - age))
            .expect("enqueue job")
    }

    pub fn reload(&self, job: &Job) -> Job {
        job::load(&self.db, &job.id)
            .expect("load job")
            .expect("job exists")
    }
}
