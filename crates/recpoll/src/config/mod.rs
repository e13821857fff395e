pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    CircuitBreakerConfig, DatabaseConfig, DriveConfig, LeaseConfig, LogFormat, LoggingConfig,
    MatcherConfig, PollerConfig, PollingConfig, ProcessorConfig, RateLimitConfig, RetryConfig,
    SelectionConfig,
};
