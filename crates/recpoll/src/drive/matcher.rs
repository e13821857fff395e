//! Correlates a pending job with its recording and transcript.
//!
//! Two searches run around the job's start time: videos within the video
//! window, and documents within the (wider) transcript window. Videos are
//! picked by meeting ref, then by proximity to the start. Transcripts are
//! picked by the first [`TranscriptRule`] that matches any candidate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::try_join;
use serde::Serialize;

use crate::config::MatcherConfig;
use crate::drive::client::{FileQuery, FileSearchApi, RemoteFile};
use crate::error::ApiError;
use crate::jobs::Job;
use crate::resilience::RetryPolicy;

const GENERIC_KEYWORDS: &[&str] = &["transcript", "meeting", "notes"];

/// Transcript filename rules, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TranscriptRule {
    MarkerAndJobId,
    MarkerAndCorrelationRef,
    Marker,
    JobId,
    CorrelationRef,
    GenericKeyword,
    MostRecent,
}

impl TranscriptRule {
    pub const PRIORITY: [TranscriptRule; 7] = [
        TranscriptRule::MarkerAndJobId,
        TranscriptRule::MarkerAndCorrelationRef,
        TranscriptRule::Marker,
        TranscriptRule::JobId,
        TranscriptRule::CorrelationRef,
        TranscriptRule::GenericKeyword,
        TranscriptRule::MostRecent,
    ];

    fn matches(&self, name: &str, ctx: &MatchContext<'_>) -> bool {
        let has_marker = name.contains(ctx.marker);
        let has_job_id = !ctx.job_id.is_empty() && name.contains(ctx.job_id);
        let has_correlation = ctx
            .correlation_ref
            .is_some_and(|r| !r.is_empty() && name.contains(r));

        match self {
            TranscriptRule::MarkerAndJobId => has_marker && has_job_id,
            TranscriptRule::MarkerAndCorrelationRef => has_marker && has_correlation,
            TranscriptRule::Marker => has_marker,
            TranscriptRule::JobId => has_job_id,
            TranscriptRule::CorrelationRef => ctx.correlation_ref.is_some_and(|r| {
                !r.is_empty() && name.to_lowercase().contains(&r.to_lowercase())
            }),
            TranscriptRule::GenericKeyword => {
                let lower = name.to_lowercase();
                GENERIC_KEYWORDS.iter().any(|k| lower.contains(k))
            }
            TranscriptRule::MostRecent => true,
        }
    }
}

struct MatchContext<'a> {
    marker: &'a str,
    job_id: &'a str,
    correlation_ref: Option<&'a str>,
}

/// Picks a transcript from candidates. Newest wins within a rule.
pub fn select_transcript<'a>(
    candidates: &'a [RemoteFile],
    marker: &str,
    job_id: &str,
    correlation_ref: Option<&str>,
) -> Option<(&'a RemoteFile, TranscriptRule)> {
    let ctx = MatchContext {
        marker,
        job_id,
        correlation_ref,
    };
    TranscriptRule::PRIORITY.iter().find_map(|rule| {
        candidates
            .iter()
            .filter(|f| rule.matches(&f.name, &ctx))
            .max_by_key(|f| f.created_time)
            .map(|f| (f, *rule))
    })
}

/// Picks a video: one named after the meeting ref, else the closest to `start`.
pub fn select_video<'a>(
    candidates: &'a [RemoteFile],
    meeting_ref: &str,
    start: DateTime<Utc>,
) -> Option<&'a RemoteFile> {
    let distance = |f: &RemoteFile| (f.created_time - start).num_seconds().abs();
    if !meeting_ref.is_empty() {
        if let Some(named) = candidates
            .iter()
            .filter(|f| f.name.contains(meeting_ref))
            .min_by_key(|f| distance(*f))
        {
            return Some(named);
        }
    }
    candidates.iter().min_by_key(|f| distance(*f))
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedFiles {
    pub video: Option<RemoteFile>,
    pub transcript: Option<RemoteFile>,
    pub transcript_rule: Option<TranscriptRule>,
}

#[derive(Clone)]
pub struct FileMatcher {
    api: Arc<dyn FileSearchApi>,
    retry: RetryPolicy,
    config: MatcherConfig,
}

impl FileMatcher {
    pub fn new(api: Arc<dyn FileSearchApi>, retry: RetryPolicy, config: MatcherConfig) -> Self {
        Self { api, retry, config }
    }

    pub async fn find(&self, job: &Job) -> Result<MatchedFiles, ApiError> {
        self.find_matching_files(
            &job.external_meeting_ref,
            job.created_at,
            self.config.video_window_minutes,
            job.correlation_ref.as_deref(),
            &job.id,
        )
        .await
    }

    /// Searches around `start_time`. `window_minutes` bounds the video search;
    /// transcripts use the configured transcript window.
    pub async fn find_matching_files(
        &self,
        meeting_ref: &str,
        start_time: DateTime<Utc>,
        window_minutes: i64,
        correlation_ref: Option<&str>,
        job_id: &str,
    ) -> Result<MatchedFiles, ApiError> {
        let video_window = Duration::minutes(window_minutes);
        let transcript_window = Duration::minutes(self.config.transcript_window_minutes);

        let video_query = FileQuery::videos(start_time - video_window, start_time + video_window);
        let doc_query = FileQuery::documents(
            start_time - transcript_window,
            start_time + transcript_window,
        )
        .in_folder(self.config.transcript_folder_id.clone());

        let (videos, documents) = try_join(
            self.retry
                .run("list_videos", || self.api.list_files(&video_query)),
            self.retry
                .run("list_documents", || self.api.list_files(&doc_query)),
        )
        .await?;

        let video = select_video(&videos, meeting_ref, start_time).cloned();
        let transcript = select_transcript(
            &documents,
            &self.config.transcript_marker,
            job_id,
            correlation_ref,
        );

        tracing::debug!(
            job_id,
            meeting_ref,
            videos = videos.len(),
            documents = documents.len(),
            video = video.as_ref().map(|f| f.id.as_str()),
            rule = ?transcript.map(|(_, rule)| rule),
            "File search finished"
        );

        Ok(MatchedFiles {
            video,
            transcript_rule: transcript.map(|(_, rule)| rule),
            transcript: transcript.map(|(f, _)| f.clone()),
        })
    }
}
