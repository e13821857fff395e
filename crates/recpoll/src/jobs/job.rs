use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::{self, JobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// Processing status of a recording job.
///
/// Only `Pending` jobs are polled. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => job_repo::STATUS_PENDING,
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => job_repo::STATUS_COMPLETED,
            ProcessingStatus::Error => job_repo::STATUS_ERROR,
            ProcessingStatus::Cancelled => job_repo::STATUS_CANCELLED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Cancelled
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "error" => Ok(ProcessingStatus::Error),
            "cancelled" => Ok(ProcessingStatus::Cancelled),
            other => Err(DatabaseError::InvalidValue {
                column: "processing_status",
                value: other.to_string(),
            }),
        }
    }
}

/// An expiring claim on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A recording job awaiting correlation with external recording files.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub external_meeting_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_video_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_transcript_ref: Option<String>,
    pub processing_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// True once the job has outlived the age ceiling.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.created_at > max_age
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let lease = match (row.lease_holder, row.lease_expires_at.as_deref()) {
            (Some(holder), Some(expires_at)) => Some(Lease {
                holder,
                expires_at: parse_timestamp(expires_at)?,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id,
            external_meeting_ref: row.external_meeting_ref,
            correlation_ref: row.correlation_ref,
            created_at: parse_timestamp(&row.created_at)?,
            matched_video_ref: row.matched_video_ref,
            matched_transcript_ref: row.matched_transcript_ref,
            processing_status: row.processing_status.parse()?,
            lease,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
        })
    }
}

/// A job to be created in `pending` state.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub external_meeting_ref: String,
    pub correlation_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(external_meeting_ref: impl Into<String>) -> Self {
        Self {
            external_meeting_ref: external_meeting_ref.into(),
            correlation_ref: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_correlation_ref(mut self, correlation_ref: impl Into<String>) -> Self {
        self.correlation_ref = Some(correlation_ref.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Creates a pending job and returns it.
pub fn enqueue(db: &Database, new_job: NewJob) -> Result<Job, DatabaseError> {
    let created_at = format_timestamp(new_job.created_at);
    let row = JobRow {
        id: uuid::Uuid::new_v4().to_string(),
        external_meeting_ref: new_job.external_meeting_ref,
        correlation_ref: new_job.correlation_ref,
        processing_status: job_repo::STATUS_PENDING.to_string(),
        matched_video_ref: None,
        matched_transcript_ref: None,
        lease_holder: None,
        lease_expires_at: None,
        attempt_count: 0,
        failure_count: 0,
        last_error: None,
        created_at: created_at.clone(),
        updated_at: created_at,
        completed_at: None,
    };
    job_repo::insert(db, &row)?;
    log::debug!("Enqueued recording job {}", row.id);
    Job::try_from(row)
}

/// Loads a job by id.
pub fn load(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    job_repo::find_by_id(db, id)?.map(Job::try_from).transpose()
}
