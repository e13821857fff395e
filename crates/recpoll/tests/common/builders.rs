use chrono::{DateTime, Duration, Utc};
use recpoll::drive::client::{GOOGLE_DOC_MIME_TYPE, VIDEO_MIME_PREFIX};
use recpoll::RemoteFile;

pub const MARKER: &str = "Notes by Gemini";

pub fn remote_file(id: &str, name: &str, mime_type: &str, created_time: DateTime<Utc>) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        created_time,
    }
}

/// A notes document created `offset` after `start`.
pub fn transcript(id: &str, name: &str, start: DateTime<Utc>, offset: Duration) -> RemoteFile {
    remote_file(id, name, GOOGLE_DOC_MIME_TYPE, start + offset)
}

pub fn video(id: &str, name: &str, start: DateTime<Utc>, offset: Duration) -> RemoteFile {
    remote_file(id, name, &format!("{}mp4", VIDEO_MIME_PREFIX), start + offset)
}

/// Filename the notes generator would produce for a job.
pub fn gemini_notes_name(job_id: &str) -> String {
    format!("{} - 2026-03-01 10:00 - {}", job_id, MARKER)
}
