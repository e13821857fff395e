use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use recpoll::drive::MimeFilter;
use recpoll::{ApiError, FileQuery, FileSearchApi, ProcessInput, ProcessOutcome, Processor, ProcessorError, RemoteFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Video,
    Document,
}

impl QueryKind {
    fn of(query: &FileQuery) -> Self {
        match query.mime {
            MimeFilter::Prefix(_) => QueryKind::Video,
            MimeFilter::Exact(_) => QueryKind::Document,
        }
    }
}

/// In-memory file store. Scripted errors are returned before any results.
#[derive(Default)]
pub struct FakeFileApi {
    files: Mutex<Vec<RemoteFile>>,
    video_errors: Mutex<VecDeque<ApiError>>,
    document_errors: Mutex<VecDeque<ApiError>>,
    always_fail: Mutex<Option<ApiError>>,
    calls: AtomicUsize,
}

impl FakeFileApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, file: RemoteFile) {
        self.files.lock().unwrap().push(file);
    }

    pub fn fail_next(&self, kind: QueryKind, errors: impl IntoIterator<Item = ApiError>) {
        let queue = match kind {
            QueryKind::Video => &self.video_errors,
            QueryKind::Document => &self.document_errors,
        };
        queue.lock().unwrap().extend(errors);
    }

    pub fn fail_always(&self, error: ApiError) {
        *self.always_fail.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSearchApi for FakeFileApi {
    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFile>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.always_fail.lock().unwrap().clone() {
            return Err(error);
        }

        let scripted = match QueryKind::of(query) {
            QueryKind::Video => self.video_errors.lock().unwrap().pop_front(),
            QueryKind::Document => self.document_errors.lock().unwrap().pop_front(),
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        let mut found: Vec<RemoteFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        Ok(found)
    }
}

#[derive(Debug, Clone)]
pub enum ProcessorBehavior {
    Succeed,
    Reject(String),
    Error(u16),
    Panic,
}

/// Records every call; optionally holds each call for `delay`.
pub struct FakeProcessor {
    behavior: Mutex<ProcessorBehavior>,
    delay: Mutex<Option<Duration>>,
    received: Mutex<Vec<ProcessInput>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for FakeProcessor {
    fn default() -> Self {
        Self {
            behavior: Mutex::new(ProcessorBehavior::Succeed),
            delay: Mutex::new(None),
            received: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, behavior: ProcessorBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn received(&self) -> Vec<ProcessInput> {
        self.received.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for FakeProcessor {
    async fn process(&self, input: &ProcessInput) -> Result<ProcessOutcome, ProcessorError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.received.lock().unwrap().push(input.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            ProcessorBehavior::Succeed => Ok(ProcessOutcome::ok()),
            ProcessorBehavior::Reject(reason) => Ok(ProcessOutcome::failed(reason)),
            ProcessorBehavior::Error(status) => Err(ProcessorError::Status {
                status,
                body: "downstream unavailable".to_string(),
            }),
            ProcessorBehavior::Panic => panic!("processor crashed on {}", input.job_id),
        }
    }
}
