pub mod extraction;
pub mod notify;
pub mod orchestrator;
pub mod progress;
pub mod traits;

pub use extraction::ChatCompletionsExtractor;
pub use notify::{StatusNotifier, StatusUpdate};
pub use orchestrator::{
    ProcessError, ProcessOutcome, ProcessSummary, ProcessingStage, StatementProcessor,
    DEFAULT_TIMEOUT,
};
pub use progress::{
    Milestone, ProgressError, ProgressState, ProgressStatus, ProgressTracker, ProgressUpdate,
    StatusPoller,
};
pub use traits::{FileStore, StatementStore};
