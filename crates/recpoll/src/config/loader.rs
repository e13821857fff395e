use std::path::Path;

use crate::config::schema::PollerConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PollerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<PollerConfig, ConfigError> {
    let config: PollerConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &PollerConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let rate = &config.rate_limit;
    if rate.enabled && (rate.max_requests_per_minute == 0 || rate.window_secs == 0) {
        return Err(invalid(
            "rateLimit.maxRequestsPerMinute and rateLimit.windowSecs must be greater than 0",
        ));
    }

    if config.circuit_breaker.enabled && config.circuit_breaker.failure_threshold == 0 {
        return Err(invalid("circuitBreaker.failureThreshold must be greater than 0"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.maxAttempts must be at least 1"));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(invalid(format!(
            "retry.maxDelayMs ({}) must not be below retry.baseDelayMs ({})",
            retry.max_delay_ms, retry.base_delay_ms
        )));
    }

    if config.lease.timeout_secs == 0 {
        return Err(invalid("lease.timeoutSecs must be greater than 0"));
    }
    if config.lease.holder.as_deref() == Some("") {
        return Err(invalid("lease.holder must not be empty"));
    }

    let selection = &config.selection;
    if selection.max_results == 0 {
        return Err(invalid("selection.maxResults must be greater than 0"));
    }
    if selection.max_age_hours <= 0 || selection.recency_lookback_minutes <= 0 {
        return Err(invalid(
            "selection.maxAgeHours and selection.recencyLookbackMinutes must be positive",
        ));
    }

    if config.polling.concurrency == 0 {
        return Err(invalid("polling.concurrency must be greater than 0"));
    }
    if config.polling.interval_minutes == 0 {
        return Err(invalid("polling.intervalMinutes must be greater than 0"));
    }

    let matcher = &config.matcher;
    if matcher.video_window_minutes <= 0 || matcher.transcript_window_minutes <= 0 {
        return Err(invalid("matcher windows must be positive"));
    }
    if matcher.transcript_marker.trim().is_empty() {
        return Err(invalid("matcher.transcriptMarker must not be empty"));
    }

    if let Some(url) = &config.processor.webhook_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(format!(
                "processor.webhookUrl must be an http(s) URL: {}",
                url
            )));
        }
    }

    Ok(())
}
