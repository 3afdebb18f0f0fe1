//! Hydrolink protocol: domain types and remote contracts.
//!
//! Everything the orchestration crates exchange with the UI layer and with the
//! remote modelling service is defined here, so worker, sentinel and test
//! fakes agree on one vocabulary.

pub mod defaults;
pub mod ids;
pub mod push;
pub mod remote;
pub mod status;
pub mod types;

pub use ids::{
    DownloadJobId, IdParseError, ModelId, RasterId, RevisionId, SchematisationId, SimulationId,
    TaskId, UploadRowId,
};
pub use push::{PushMessage, PushParseError};
pub use remote::{
    PushSubscription, RemoteError, RemoteResult, ResultsRemote, SchematisationRemote,
    SimulationRemote, TransferProgress,
};
pub use status::{Status, StatusName};
pub use types::{
    BackgroundTask, CheckIssue, DownloadItem, FileRole, FileState, ModelRef, Progress, RemoteFile,
    RemoteTaskStatus, Revision, RevisionRaster, RevisionTarget, Schematisation, SelectedFile,
    Simulation, SimulationFilter, SubJob, TaskDetail, UploadSpecification,
};
