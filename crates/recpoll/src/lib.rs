pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod poller;
pub mod processor;
pub mod resilience;
pub mod secrets;

pub use config::{load_config, load_config_from_str, PollerConfig};
pub use db::Database;
pub use drive::{DriveClient, FileMatcher, FileQuery, FileSearchApi, MatchedFiles, RemoteFile};
pub use error::{ApiError, ConfigError, ProcessorError, RecpollError, Result};
pub use jobs::{Job, JobSelector, Lease, LeaseStore, NewJob, ProcessingStatus};
pub use poller::{BatchOrchestrator, PollStats, Poller, PollerStatus, PollingLoop, PollingOptions};
pub use processor::{ProcessInput, ProcessOutcome, Processor, WebhookProcessor};
pub use resilience::{CircuitBreaker, CircuitState, RateLimiter, RetryPolicy};
pub use secrets::{resolve_secret, SecretError, SecretSource};
