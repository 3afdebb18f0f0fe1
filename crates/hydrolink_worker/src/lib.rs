//! Hydrolink worker: the jobs that drive remote operations.
//!
//! An upload turns an [`UploadSpecification`](hydrolink_protocol::UploadSpecification)
//! into an ordered task list ([`upload::build_upload_tasks`]) and executes it on
//! a dedicated thread ([`upload::UploadJobRunner`]). A download streams the
//! result files of a simulation into a directory ([`download::DownloadJobRunner`]).
//! Both report through an [`events::EventBus`].

pub mod cancel;
pub mod download;
pub mod events;
pub mod upload;

pub use cancel::CancellationToken;
pub use download::{DownloadError, DownloadEvent, DownloadJobRunner};
pub use events::EventBus;
pub use upload::{
    build_upload_tasks, JobStatus, PollConfig, UploadError, UploadEvent, UploadJob,
    UploadJobRunner, UploadOutcome, UploadTask,
};
