pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod status;

pub use orchestrator::{BatchOrchestrator, CycleSettings, JobOutcome, OrchestratorParts, PollStats};
pub use scheduler::{PollingLoop, PollingOptions};
pub use service::Poller;
pub use status::PollerStatus;
