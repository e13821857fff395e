//! One poll cycle: select, fan out, aggregate, update the breaker.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::db::cycle_repo::{self, PollCycleRow};
use crate::db::{format_timestamp, job_repo, Database, DatabaseError};
use crate::drive::FileMatcher;
use crate::error::Result;
use crate::jobs::{Job, JobSelector, LeaseStore, ProcessingStatus};
use crate::processor::{ProcessInput, Processor};
use crate::resilience::{CircuitBreaker, RateLimiter};

/// Per-cycle knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    pub max_results: u32,
    pub concurrency: usize,
    pub enable_rate_limit: bool,
    pub enable_circuit_breaker: bool,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            max_results: 10,
            concurrency: 3,
            enable_rate_limit: true,
            enable_circuit_breaker: true,
        }
    }
}

/// Aggregate result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStats {
    /// Jobs looked at, stale ones included.
    pub checked: u32,
    pub processed: u32,
    pub errors: u32,
    /// Rate-limited or lost to another lease holder.
    pub skipped: u32,
    /// Stale jobs moved to `cancelled`.
    pub cancelled: u32,
    /// The cycle was skipped because the breaker was open.
    pub circuit_open: bool,
    pub duration_ms: u64,
}

impl PollStats {
    fn circuit_open() -> Self {
        Self {
            circuit_open: true,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.processed += 1,
            JobOutcome::NoMatch => {}
            JobOutcome::Stale => self.cancelled += 1,
            JobOutcome::LeaseLost | JobOutcome::RateLimited => self.skipped += 1,
            JobOutcome::SearchFailed(_)
            | JobOutcome::ProcessingFailed { .. }
            | JobOutcome::Failed(_) => self.errors += 1,
        }
    }
}

/// How a single job's attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    NoMatch,
    /// Passed the age ceiling between selection and processing.
    Stale,
    LeaseLost,
    RateLimited,
    SearchFailed(String),
    ProcessingFailed { error: String, status: ProcessingStatus },
    /// Storage failure or worker panic.
    Failed(String),
}

impl JobOutcome {
    /// Whether the external search answered for this job.
    fn search_succeeded(&self) -> bool {
        matches!(
            self,
            JobOutcome::Completed | JobOutcome::NoMatch | JobOutcome::ProcessingFailed { .. }
        )
    }
}

/// Runs storage work on the blocking pool, off the polling runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, DatabaseError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

/// Shared state for the per-job workers.
struct Worker {
    db: Database,
    leases: LeaseStore,
    matcher: FileMatcher,
    processor: Arc<dyn Processor>,
    rate_limiter: Arc<RateLimiter>,
    max_age: Duration,
    max_processing_failures: u32,
}

impl Worker {
    async fn run(&self, job: Job, rate_limit: bool) -> JobOutcome {
        match self.attempt(&job, rate_limit).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job attempt failed");
                // Best effort; the lease expires on its own otherwise.
                let note = e.to_string();
                if let Err(release_err) = self.release(&job.id, Some(note.clone())).await {
                    warn!(job_id = %job.id, error = %release_err, "Failed to release lease");
                }
                JobOutcome::Failed(note)
            }
        }
    }

    async fn release(&self, job_id: &str, note: Option<String>) -> Result<bool> {
        let leases = self.leases.clone();
        let job_id = job_id.to_string();
        blocking(move || leases.release(&job_id, note.as_deref())).await
    }

    async fn attempt(&self, job: &Job, rate_limit: bool) -> Result<JobOutcome> {
        let now = Utc::now();
        if job.is_stale(now, self.max_age) {
            let db = self.db.clone();
            let job_id = job.id.clone();
            let cancelled =
                blocking(move || job_repo::cancel(&db, &job_id, &format_timestamp(now))).await?;
            if !cancelled {
                debug!(job_id = %job.id, "Stale job already left pending");
                return Ok(JobOutcome::LeaseLost);
            }
            info!(job_id = %job.id, "Cancelled stale job");
            return Ok(JobOutcome::Stale);
        }

        let leases = self.leases.clone();
        let job_id = job.id.clone();
        if blocking(move || leases.try_acquire(&job_id)).await?.is_none() {
            return Ok(JobOutcome::LeaseLost);
        }

        if rate_limit && !self.rate_limiter.acquire().await {
            debug!(job_id = %job.id, "Rate limited, leaving for next cycle");
            self.release(&job.id, None).await?;
            return Ok(JobOutcome::RateLimited);
        }

        let files = match self.matcher.find(job).await {
            Ok(files) => files,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, transient = e.is_transient(), "File search failed");
                self.release(&job.id, Some(e.to_string())).await?;
                return Ok(JobOutcome::SearchFailed(e.to_string()));
            }
        };

        let Some(transcript) = files.transcript else {
            debug!(job_id = %job.id, "No transcript yet");
            self.release(&job.id, None).await?;
            return Ok(JobOutcome::NoMatch);
        };

        let video_ref = files.video.map(|v| v.id);
        let input = ProcessInput {
            job_id: job.id.clone(),
            video_ref: video_ref.clone(),
            transcript_ref: transcript.id.clone(),
            meeting_ref: job.external_meeting_ref.clone(),
            meeting_start_time: Some(job.created_at),
        };

        let failure = match self.processor.process(&input).await {
            Ok(outcome) if outcome.success => None,
            Ok(outcome) => Some(
                outcome
                    .error
                    .unwrap_or_else(|| "processor reported failure".to_string()),
            ),
            Err(e) => Some(e.to_string()),
        };

        let leases = self.leases.clone();
        let job_id = job.id.clone();
        match failure {
            None => {
                let video = video_ref.clone();
                let transcript_id = transcript.id.clone();
                let completed = blocking(move || {
                    leases.release_completed(&job_id, video.as_deref(), &transcript_id)
                })
                .await?;
                if !completed {
                    warn!(
                        job_id = %job.id,
                        "Processed, but the job was cancelled or re-leased meanwhile"
                    );
                    return Ok(JobOutcome::LeaseLost);
                }
                info!(
                    job_id = %job.id,
                    transcript = %transcript.id,
                    video = ?video_ref,
                    rule = ?files.transcript_rule,
                    "Job completed"
                );
                Ok(JobOutcome::Completed)
            }
            Some(error) => {
                let max_failures = self.max_processing_failures;
                let message = error.clone();
                let status =
                    blocking(move || leases.release_failed(&job_id, &message, max_failures))
                        .await?;
                warn!(job_id = %job.id, %error, %status, "Processing failed");
                Ok(JobOutcome::ProcessingFailed { error, status })
            }
        }
    }
}

pub struct BatchOrchestrator {
    db: Database,
    instance_id: String,
    selector: JobSelector,
    worker: Arc<Worker>,
    breaker: Arc<CircuitBreaker>,
    settings: CycleSettings,
    last_cycle: Mutex<Option<PollStats>>,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("instance_id", &self.instance_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Everything a [`BatchOrchestrator`] is built from.
pub struct OrchestratorParts {
    pub db: Database,
    pub selector: JobSelector,
    pub leases: LeaseStore,
    pub matcher: FileMatcher,
    pub processor: Arc<dyn Processor>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub settings: CycleSettings,
    pub max_processing_failures: u32,
}

impl BatchOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let instance_id = parts.leases.holder().to_string();
        let worker = Worker {
            db: parts.db.clone(),
            leases: parts.leases,
            matcher: parts.matcher,
            processor: parts.processor,
            rate_limiter: parts.rate_limiter,
            max_age: parts.selector.max_age(),
            max_processing_failures: parts.max_processing_failures,
        };

        Self {
            db: parts.db,
            instance_id,
            selector: parts.selector,
            worker: Arc::new(worker),
            breaker: parts.breaker,
            settings: parts.settings,
            last_cycle: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.worker.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn last_cycle(&self) -> Option<PollStats> {
        self.last_cycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Runs one cycle with the configured settings.
    pub async fn run_cycle(&self) -> Result<PollStats> {
        let settings = self.settings.clone();
        self.run_cycle_with(&settings).await
    }

    /// Runs one cycle. Only a selection failure is returned as an error;
    /// job failures are counted in the stats.
    pub async fn run_cycle_with(&self, settings: &CycleSettings) -> Result<PollStats> {
        let span = tracing::info_span!("poll_cycle", instance = %self.instance_id);
        self.cycle(settings).instrument(span).await
    }

    async fn cycle(&self, settings: &CycleSettings) -> Result<PollStats> {
        let started = Instant::now();
        let started_at = Utc::now();

        if settings.enable_circuit_breaker && !self.breaker.can_proceed() {
            warn!("Circuit breaker open, skipping cycle");
            let stats = PollStats::circuit_open();
            self.finish(started_at, &stats, None).await;
            return Ok(stats);
        }

        let selector = self.selector.clone();
        let max_results = settings.max_results;
        let selection = match blocking(move || selector.select_pending(max_results)).await {
            Ok(selection) => selection,
            Err(err) => {
                error!(error = %err, "Job selection failed");
                if settings.enable_circuit_breaker {
                    self.breaker.record_failure();
                }
                let stats = PollStats {
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                };
                self.finish(started_at, &stats, Some(err.to_string())).await;
                return Err(err);
            }
        };

        let mut stats = PollStats {
            checked: selection.checked() as u32,
            cancelled: selection.cancelled.len() as u32,
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let mut workers = JoinSet::new();
        for job in selection.candidates {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(&self.worker);
            let rate_limit = settings.enable_rate_limit;
            let span = tracing::debug_span!("job", job_id = %job.id);
            workers.spawn(
                async move {
                    let _permit = permit;
                    worker.run(job, rate_limit).await
                }
                .instrument(span),
            );
        }

        let mut search_succeeded = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    search_succeeded |= outcome.search_succeeded();
                    stats.record(&outcome);
                }
                Err(e) => {
                    error!(error = %e, "Job worker panicked");
                    stats.errors += 1;
                }
            }
        }

        if settings.enable_circuit_breaker {
            if stats.processed > 0 {
                self.breaker.record_success();
            } else if stats.errors > 0 {
                self.breaker.record_failure();
            } else if search_succeeded {
                self.breaker.record_success();
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            checked = stats.checked,
            processed = stats.processed,
            errors = stats.errors,
            skipped = stats.skipped,
            cancelled = stats.cancelled,
            duration_ms = stats.duration_ms,
            "Poll cycle finished"
        );
        self.finish(started_at, &stats, None).await;
        Ok(stats)
    }

    async fn finish(&self, started_at: DateTime<Utc>, stats: &PollStats, error: Option<String>) {
        *self.last_cycle.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats.clone());

        let row = PollCycleRow {
            instance_id: self.instance_id.clone(),
            started_at: format_timestamp(started_at),
            checked: stats.checked,
            processed: stats.processed,
            errors: stats.errors,
            skipped: stats.skipped,
            cancelled: stats.cancelled,
            circuit_open: stats.circuit_open,
            duration_ms: stats.duration_ms,
            error,
        };
        let db = self.db.clone();
        if let Err(e) = blocking(move || cycle_repo::insert(&db, &row)).await {
            warn!(error = %e, "Failed to record poll cycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::drive::{FileQuery, FileSearchApi, RemoteFile};
    use crate::error::{ApiError, ProcessorError};
    use crate::jobs::job::{enqueue, load, NewJob};
    use crate::processor::ProcessOutcome;
    use crate::resilience::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSearch(AtomicUsize);

    #[async_trait]
    impl FileSearchApi for CountingSearch {
        async fn list_files(
            &self,
            _query: &FileQuery,
        ) -> std::result::Result<Vec<RemoteFile>, ApiError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct RejectingProcessor;

    #[async_trait]
    impl Processor for RejectingProcessor {
        async fn process(
            &self,
            _input: &ProcessInput,
        ) -> std::result::Result<ProcessOutcome, ProcessorError> {
            Err(ProcessorError::NotConfigured("no webhook in tests".to_string()))
        }
    }

    fn worker(db: &Database, search: Arc<CountingSearch>) -> Worker {
        Worker {
            db: db.clone(),
            leases: LeaseStore::new(db.clone(), "me", Duration::minutes(2)),
            matcher: FileMatcher::new(search, RetryPolicy::default(), MatcherConfig::default()),
            processor: Arc::new(RejectingProcessor),
            rate_limiter: Arc::new(RateLimiter::new(
                50,
                std::time::Duration::from_secs(60),
                std::time::Duration::ZERO,
            )),
            max_age: Duration::hours(24),
            max_processing_failures: 3,
        }
    }

    #[tokio::test]
    async fn test_job_turning_stale_is_cancelled_despite_foreign_lease() {
        let db = Database::open_in_memory().unwrap();
        let job = enqueue(
            &db,
            NewJob::new("old-meeting").created_at(Utc::now() - Duration::hours(25)),
        )
        .unwrap();
        LeaseStore::new(db.clone(), "other", Duration::minutes(2))
            .try_acquire(&job.id)
            .unwrap()
            .unwrap();
        let job = load(&db, &job.id).unwrap().unwrap();
        assert!(job.lease.is_some());

        let search = Arc::new(CountingSearch::default());
        let outcome = worker(&db, Arc::clone(&search)).run(job.clone(), true).await;

        assert_eq!(outcome, JobOutcome::Stale);
        assert_eq!(search.0.load(Ordering::SeqCst), 0);
        let job = load(&db, &job.id).unwrap().unwrap();
        assert_eq!(job.processing_status, ProcessingStatus::Cancelled);
        assert!(job.lease.is_none());
    }

    #[tokio::test]
    async fn test_stale_job_already_finished_is_left_alone() {
        let db = Database::open_in_memory().unwrap();
        let job = enqueue(
            &db,
            NewJob::new("old-meeting").created_at(Utc::now() - Duration::hours(25)),
        )
        .unwrap();
        job_repo::cancel(&db, &job.id, &format_timestamp(Utc::now())).unwrap();

        let outcome = worker(&db, Arc::default()).run(job, true).await;
        assert_eq!(outcome, JobOutcome::LeaseLost);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = PollStats::default();
        stats.record(&JobOutcome::Completed);
        stats.record(&JobOutcome::NoMatch);
        stats.record(&JobOutcome::RateLimited);
        stats.record(&JobOutcome::LeaseLost);
        stats.record(&JobOutcome::Stale);
        stats.record(&JobOutcome::SearchFailed("HTTP 403: quota".to_string()));
        stats.record(&JobOutcome::ProcessingFailed {
            error: "webhook down".to_string(),
            status: ProcessingStatus::Pending,
        });
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.cancelled, 1);
    }

    #[test]
    fn test_search_succeeded() {
        assert!(JobOutcome::NoMatch.search_succeeded());
        assert!(!JobOutcome::RateLimited.search_succeeded());
        assert!(!JobOutcome::SearchFailed("x".to_string()).search_succeeded());
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(PollStats::circuit_open()).unwrap();
        assert_eq!(json["circuitOpen"], true);
        assert_eq!(json["durationMs"], 0);
    }
}
