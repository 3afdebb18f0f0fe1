//! Schematisation uploads: planning and execution.

mod job;
mod plan;
mod runner;

pub use job::{JobStatus, LogEntry, UploadJob};
pub use plan::{build_upload_tasks, UploadTask};
pub use runner::{PollConfig, UploadError, UploadEvent, UploadJobRunner, UploadOutcome};
