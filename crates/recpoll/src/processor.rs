//! Downstream processing of matched recordings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, RecpollError};

/// What the processor receives for a matched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInput {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<String>,
    pub transcript_ref: String,
    pub meeting_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Consumes matched jobs. Must tolerate redelivery of the same `job_id`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, input: &ProcessInput) -> Result<ProcessOutcome, ProcessorError>;
}

/// Posts each matched job as JSON to a webhook.
///
/// A 2xx with a JSON body is read as a [`ProcessOutcome`]; a 2xx without one
/// counts as success.
pub struct WebhookProcessor {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for WebhookProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProcessor")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebhookProcessor {
    pub fn new(config: &ProcessorConfig) -> Result<Self, RecpollError> {
        let url = config
            .webhook_url
            .clone()
            .ok_or_else(|| ProcessorError::NotConfigured("processor.webhookUrl".to_string()))?;
        let token = config.token.resolve_optional()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ProcessorError::Request)?;

        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Processor for WebhookProcessor {
    async fn process(&self, input: &ProcessInput) -> Result<ProcessOutcome, ProcessorError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", input.job_id.as_str())
            .json(input);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProcessorError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        if body.trim().is_empty() {
            return Ok(ProcessOutcome::ok());
        }
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| ProcessOutcome::ok()))
    }
}
