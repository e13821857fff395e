pub mod client;
pub mod matcher;

pub use client::{DriveClient, FileQuery, FileSearchApi, MimeFilter, RemoteFile};
pub use matcher::{FileMatcher, MatchedFiles, TranscriptRule};
