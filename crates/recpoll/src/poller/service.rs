//! Wiring from [`PollerConfig`] to a ready-to-run orchestrator.

use std::sync::Arc;

use chrono::Duration;

use crate::config::PollerConfig;
use crate::db::Database;
use crate::drive::{DriveClient, FileMatcher, FileSearchApi};
use crate::error::{ConfigError, Result};
use crate::jobs::{JobSelector, LeaseStore};
use crate::poller::orchestrator::{BatchOrchestrator, OrchestratorParts, PollStats};
use crate::poller::scheduler::{PollingLoop, PollingOptions};
use crate::poller::status::PollerStatus;
use crate::processor::{Processor, WebhookProcessor};
use crate::resilience::{CircuitBreaker, RateLimiter, RetryPolicy};

pub struct Poller {
    config: PollerConfig,
    orchestrator: Arc<BatchOrchestrator>,
}

impl Poller {
    /// Builds a poller around the given collaborators.
    pub fn new(
        config: PollerConfig,
        db: Database,
        api: Arc<dyn FileSearchApi>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let holder = config
            .lease
            .holder
            .clone()
            .unwrap_or_else(default_instance_id);

        let selector = JobSelector::new(
            db.clone(),
            Duration::minutes(config.selection.recency_lookback_minutes),
            Duration::hours(config.selection.max_age_hours),
        );
        let leases = LeaseStore::new(
            db.clone(),
            holder,
            Duration::seconds(config.lease.timeout_secs as i64),
        );
        let matcher = FileMatcher::new(
            api,
            RetryPolicy::from_config(&config.retry),
            config.matcher.clone(),
        );

        let orchestrator = BatchOrchestrator::new(OrchestratorParts {
            db,
            selector,
            leases,
            matcher,
            processor,
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            breaker: Arc::new(CircuitBreaker::from_config(
                "file-search",
                &config.circuit_breaker,
            )),
            settings: PollingOptions::from(&config).cycle_settings(),
            max_processing_failures: config.processor.max_failures,
        });

        Self {
            config,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Opens the database and builds the Drive client and webhook processor.
    pub fn from_config(config: PollerConfig) -> Result<Self> {
        let path = config
            .database
            .resolved_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "database.path is unset and no home directory was found".to_string(),
            })?;
        let db = Database::open(&path)?;
        let api = Arc::new(DriveClient::new(&config.drive)?);
        let processor = Arc::new(WebhookProcessor::new(&config.processor)?);
        Ok(Self::new(config, db, api, processor))
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<BatchOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub async fn run_once(&self) -> Result<PollStats> {
        self.orchestrator.run_cycle().await
    }

    pub fn start_polling(&self) -> PollingLoop {
        PollingLoop::start(self.orchestrator(), PollingOptions::from(&self.config))
    }

    pub fn status(&self) -> Result<PollerStatus> {
        let orchestrator = &self.orchestrator;
        let mut status = PollerStatus::from_store(orchestrator.database())?;
        status.instance_id = Some(orchestrator.instance_id().to_string());
        if self.config.rate_limit.enabled {
            status.rate_limiter = Some(orchestrator.rate_limiter().snapshot());
        }
        if self.config.circuit_breaker.enabled {
            status.circuit_breaker = Some(orchestrator.circuit_breaker().snapshot());
        }
        status.last_cycle = orchestrator.last_cycle();
        Ok(status)
    }
}

/// `<hostname>-<8 hex>` so leases are attributable to a host.
pub fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "recpoll".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}
