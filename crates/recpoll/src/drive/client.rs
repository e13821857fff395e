//! File-search API: the trait the matcher queries, and a Google Drive v3
//! implementation over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::DriveConfig;
use crate::error::{ApiError, RecpollError};

pub const GOOGLE_DOC_MIME_TYPE: &str = "application/vnd.google-apps.document";
pub const VIDEO_MIME_PREFIX: &str = "video/";

/// Longest error body kept in an [`ApiError`] message.
const MAX_ERROR_BODY_LENGTH: usize = 300;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A file returned by the external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimeFilter {
    /// `mimeType contains '<prefix>'`
    Prefix(String),
    /// `mimeType = '<type>'`
    Exact(String),
}

/// A files.list search: MIME type, creation window, optional parent folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuery {
    pub mime: MimeFilter,
    pub created_after: DateTime<Utc>,
    pub created_before: DateTime<Utc>,
    pub parent_id: Option<String>,
}

impl FileQuery {
    pub fn videos(created_after: DateTime<Utc>, created_before: DateTime<Utc>) -> Self {
        Self {
            mime: MimeFilter::Prefix(VIDEO_MIME_PREFIX.to_string()),
            created_after,
            created_before,
            parent_id: None,
        }
    }

    pub fn documents(created_after: DateTime<Utc>, created_before: DateTime<Utc>) -> Self {
        Self {
            mime: MimeFilter::Exact(GOOGLE_DOC_MIME_TYPE.to_string()),
            created_after,
            created_before,
            parent_id: None,
        }
    }

    pub fn in_folder(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Whether a file satisfies this query. Used by in-memory stores.
    pub fn matches(&self, file: &RemoteFile) -> bool {
        let mime_ok = match &self.mime {
            MimeFilter::Prefix(prefix) => file.mime_type.contains(prefix.as_str()),
            MimeFilter::Exact(mime) => file.mime_type == *mime,
        };
        mime_ok && file.created_time > self.created_after && file.created_time < self.created_before
    }

    /// Renders the Drive `q` expression.
    pub fn to_drive_query(&self) -> String {
        let mut clauses = vec![
            match &self.mime {
                MimeFilter::Prefix(prefix) => format!("mimeType contains '{}'", escape(prefix)),
                MimeFilter::Exact(mime) => format!("mimeType = '{}'", escape(mime)),
            },
            format!("createdTime > '{}'", drive_time(self.created_after)),
            format!("createdTime < '{}'", drive_time(self.created_before)),
            "trashed = false".to_string(),
        ];
        if let Some(parent) = &self.parent_id {
            clauses.push(format!("'{}' in parents", escape(parent)));
        }
        clauses.join(" and ")
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn drive_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
pub trait FileSearchApi: Send + Sync {
    /// Lists files matching the query, newest first.
    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    message: String,
}

/// Pulls the human message out of a Google error body, else a truncated raw body.
fn error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<GoogleErrorEnvelope>(body) {
        return envelope.error.message;
    }
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

pub struct DriveClient {
    client: Client,
    base_url: String,
    token: SecretString,
    page_size: u32,
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveClient")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    pub fn new(config: &DriveConfig) -> Result<Self, RecpollError> {
        let token = config.token.resolve()?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl FileSearchApi for DriveClient {
    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, ApiError> {
        let q = query.to_drive_query();
        let page_size = self.page_size.to_string();
        tracing::trace!(%q, "Drive files.list");

        let response = self
            .client
            .get(format!("{}/files", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .query(&[
                ("q", q.as_str()),
                ("fields", "files(id,name,mimeType,createdTime)"),
                ("orderBy", "createdTime desc"),
                ("pageSize", page_size.as_str()),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::new(status.as_u16(), error_message(&body)));
        }

        let list: FileListResponse = response
            .json()
            .await
            .map_err(|e| ApiError::transport(format!("Failed to parse file list: {}", e)))?;
        Ok(list.files)
    }
}
