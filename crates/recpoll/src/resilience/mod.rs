//! Guards around the external file-search API: admission control, failure
//! isolation and retry with backoff.
//!
//! All three are process-local. Several pollers sharing one quota each
//! enforce their own limits.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterSnapshot};
pub use retry::RetryPolicy;
