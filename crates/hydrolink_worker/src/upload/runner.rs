//! Upload job execution.
//!
//! A runner owns one upload: it executes the planned tasks strictly in order
//! on its own thread and reports through an [`EventBus`]. The first failing
//! task aborts the job; tasks already finished stay logged as done.

use super::plan::UploadTask;
use crate::events::EventBus;
use hydrolink_protocol::defaults::{
    DEFAULT_TASK_CHECK_INTERVAL_MS, DEFAULT_TASK_CHECK_RETRIES, DEM_RASTER_TYPE, DONE_TASK_NAME,
    LEGACY_DEM_RASTER_TYPE, MODEL_BUILD_SUBJOBS, MODEL_CHECKER_TASK, NOTHING_TO_UPLOAD_MESSAGE,
    TASK_NOT_STARTED_MESSAGE,
};
use hydrolink_protocol::{
    FileRole, RemoteError, RemoteFile, RemoteTaskStatus, Revision, RevisionTarget,
    SchematisationRemote, UploadRowId, UploadSpecification,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Polling cadence for long-running server-side work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Attempts to find a background task before giving up.
    pub retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_TASK_CHECK_INTERVAL_MS),
            retries: DEFAULT_TASK_CHECK_RETRIES,
        }
    }
}

/// Events emitted by an upload job, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    TaskProgress {
        row: UploadRowId,
        task_name: String,
        task_progress: f64,
        job_progress: f64,
    },
    RevisionCommitted {
        row: UploadRowId,
        revision_number: u32,
    },
    JobSucceeded {
        row: UploadRowId,
        message: String,
    },
    JobFailed {
        row: UploadRowId,
        task_name: String,
        message: String,
    },
}

impl UploadEvent {
    pub fn row(&self) -> UploadRowId {
        match self {
            Self::TaskProgress { row, .. }
            | Self::RevisionCommitted { row, .. }
            | Self::JobSucceeded { row, .. }
            | Self::JobFailed { row, .. } => *row,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobSucceeded { .. } | Self::JobFailed { .. })
    }
}

/// Errors raised by upload tasks.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{} {}", .task, TASK_NOT_STARTED_MESSAGE)]
    TaskNotStarted { task: String },

    #[error("{task} failed: {message}")]
    RemoteTaskFailed { task: String, message: String },

    #[error("validation failed:\n{}", .issues.join("\n"))]
    ValidationFailed { issues: Vec<String> },

    #[error("{name} failed: {detail}")]
    SubJobFailed { name: String, detail: String },

    #[error("Cannot read local file: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// The service answered and refused, as opposed to being unreachable or
    /// the local side failing.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Remote(err) => !err.is_transport(),
            Self::RemoteTaskFailed { .. } | Self::ValidationFailed { .. } | Self::SubJobFailed { .. } => {
                true
            }
            Self::TaskNotStarted { .. } | Self::Io(_) => false,
        }
    }

    /// Message shown to the user.
    pub fn message(&self) -> String {
        match self {
            Self::Remote(err) => err.message(),
            other => format!("Error: {}", other),
        }
    }
}

/// Final result of a job, returned from its thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Succeeded(String),
    Failed { task_name: String, message: String },
}

/// Executes the tasks of one upload.
pub struct UploadJobRunner {
    row: UploadRowId,
    spec: Arc<UploadSpecification>,
    remote: Arc<dyn SchematisationRemote>,
    events: EventBus<UploadEvent>,
    poll: PollConfig,
}

/// Mutable state of a running job. Only the runner thread touches it.
struct Execution {
    revision: Revision,
    task_name: String,
    job_progress: f64,
}

impl UploadJobRunner {
    pub fn new(
        row: UploadRowId,
        spec: Arc<UploadSpecification>,
        remote: Arc<dyn SchematisationRemote>,
        events: EventBus<UploadEvent>,
    ) -> Self {
        Self {
            row,
            spec,
            remote,
            events,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Run the job on a dedicated thread.
    pub fn spawn(self, tasks: Vec<UploadTask>) -> std::io::Result<JoinHandle<UploadOutcome>> {
        thread::Builder::new()
            .name(format!("upload-{}", self.row))
            .spawn(move || self.run(tasks))
    }

    /// Execute every task in order. Blocks until the job is terminal.
    pub fn run(self, tasks: Vec<UploadTask>) -> UploadOutcome {
        info!(
            "Upload {} started: schematisation '{}', {} task(s)",
            self.row,
            self.spec.schematisation.name,
            tasks.len()
        );

        if tasks.is_empty() {
            self.report(DONE_TASK_NAME, 100.0, 100.0);
            return self.succeed(NOTHING_TO_UPLOAD_MESSAGE.to_string());
        }

        let mut exec = Execution {
            revision: self.spec.revision.clone(),
            task_name: String::new(),
            job_progress: 0.0,
        };
        let total = tasks.len();

        for (index, task) in tasks.iter().enumerate() {
            exec.task_name = task.display_name();
            self.report(&exec.task_name, 0.0, exec.job_progress);

            if let Err(err) = self.execute(task, &mut exec) {
                if err.is_rejection() {
                    warn!("Upload {} task '{}' rejected: {}", self.row, exec.task_name, err);
                } else {
                    error!("Upload {} task '{}' failed: {}", self.row, exec.task_name, err);
                }
                let message = err.message();
                self.events.publish(UploadEvent::JobFailed {
                    row: self.row,
                    task_name: exec.task_name.clone(),
                    message: message.clone(),
                });
                return UploadOutcome::Failed {
                    task_name: exec.task_name,
                    message,
                };
            }

            exec.job_progress = (index + 1) as f64 * 100.0 / total as f64;
            self.report(&exec.task_name, 100.0, exec.job_progress);
        }

        self.report(DONE_TASK_NAME, 100.0, 100.0);
        self.succeed(format!(
            "Schematisation '{}' (revision: {}) files uploaded",
            self.spec.schematisation.name, exec.revision.number
        ))
    }

    fn succeed(&self, message: String) -> UploadOutcome {
        info!("Upload {} finished: {}", self.row, message);
        self.events.publish(UploadEvent::JobSucceeded {
            row: self.row,
            message: message.clone(),
        });
        UploadOutcome::Succeeded(message)
    }

    fn report(&self, task_name: &str, task_progress: f64, job_progress: f64) {
        self.events.publish(UploadEvent::TaskProgress {
            row: self.row,
            task_name: task_name.to_string(),
            task_progress,
            job_progress,
        });
    }

    fn target(&self, revision: &Revision) -> RevisionTarget {
        RevisionTarget {
            schematisation_id: self.spec.schematisation.id,
            revision_id: revision.id,
        }
    }

    fn execute(&self, task: &UploadTask, exec: &mut Execution) -> Result<(), UploadError> {
        debug!("Upload {} executing '{}'", self.row, exec.task_name);
        match task {
            UploadTask::CreateRevision => {
                exec.revision = self.remote.create_revision(self.spec.schematisation.id)?;
                info!(
                    "Upload {} created revision {} (id {})",
                    self.row, exec.revision.number, exec.revision.id
                );
                Ok(())
            }
            UploadTask::DeleteSpatialite => {
                let target = self.target(&exec.revision);
                self.remote.delete_file(&target, &RemoteFile::Spatialite)?;
                Ok(())
            }
            UploadTask::UploadSpatialite { local_path } => {
                self.upload(exec, &FileRole::Spatialite, local_path)
            }
            UploadTask::DeleteRaster { raster_type } => self.delete_raster(exec, raster_type),
            UploadTask::UploadRaster {
                raster_type,
                local_path,
            } => self.upload(exec, &FileRole::raster(raster_type.as_str()), local_path),
            UploadTask::CommitRevision { message } => self.commit(exec, message),
            UploadTask::CreateModel => self.create_model(exec),
        }
    }

    fn upload(&self, exec: &Execution, role: &FileRole, local_path: &Path) -> Result<(), UploadError> {
        std::fs::metadata(local_path)?;
        let target = self.target(&exec.revision);
        let mut on_progress = |sent: u64, total: u64| {
            if total > 0 {
                let pct = (sent as f64 / total as f64 * 100.0).min(100.0);
                self.report(&exec.task_name, pct, exec.job_progress);
            }
        };
        self.remote
            .upload_file(&target, role, local_path, &mut on_progress)?;
        Ok(())
    }

    fn delete_raster(&self, exec: &Execution, raster_type: &str) -> Result<(), UploadError> {
        let mut types = vec![raster_type];
        if raster_type == DEM_RASTER_TYPE {
            types.push(LEGACY_DEM_RASTER_TYPE);
        }
        let attached = exec
            .revision
            .rasters
            .iter()
            .find(|raster| types.contains(&raster.raster_type.as_str()));

        match attached {
            Some(raster) => {
                let target = self.target(&exec.revision);
                self.remote.delete_file(
                    &target,
                    &RemoteFile::Raster {
                        id: raster.id,
                        raster_type: raster.raster_type.clone(),
                    },
                )?;
            }
            None => debug!(
                "Upload {}: no '{}' raster attached to revision {}",
                self.row, raster_type, exec.revision.number
            ),
        }
        Ok(())
    }

    fn commit(&self, exec: &mut Execution, message: &str) -> Result<(), UploadError> {
        let target = self.target(&exec.revision);
        exec.revision = self.remote.commit_revision(&target, message)?;
        let target = self.target(&exec.revision);

        let mut checker = None;
        for attempt in 1..=self.poll.retries {
            checker = self.remote.fetch_background_task(&target, MODEL_CHECKER_TASK)?;
            if checker.is_some() {
                break;
            }
            debug!(
                "Upload {}: {} not started yet (attempt {}/{})",
                self.row, MODEL_CHECKER_TASK, attempt, self.poll.retries
            );
            thread::sleep(self.poll.interval);
        }
        let Some(checker) = checker else {
            return Err(UploadError::TaskNotStarted {
                task: MODEL_CHECKER_TASK.to_string(),
            });
        };

        let finished = loop {
            let task = self.remote.fetch_task_status(&target, checker.id)?;
            match task.status {
                RemoteTaskStatus::Success => break task,
                RemoteTaskStatus::Failure => {
                    return Err(UploadError::RemoteTaskFailed {
                        task: MODEL_CHECKER_TASK.to_string(),
                        message: task.detail.message.unwrap_or_default(),
                    })
                }
                RemoteTaskStatus::Other(ref status) => {
                    debug!("Upload {}: {} is {}", self.row, MODEL_CHECKER_TASK, status);
                    thread::sleep(self.poll.interval);
                }
            }
        };

        if !finished.detail.errors.is_empty() {
            return Err(UploadError::ValidationFailed {
                issues: finished
                    .detail
                    .errors
                    .into_iter()
                    .map(|issue| issue.description)
                    .collect(),
            });
        }

        info!("Upload {} committed revision {}", self.row, exec.revision.number);
        self.events.publish(UploadEvent::RevisionCommitted {
            row: self.row,
            revision_number: exec.revision.number,
        });
        Ok(())
    }

    fn create_model(&self, exec: &Execution) -> Result<(), UploadError> {
        let target = self.target(&exec.revision);
        let model = self.remote.create_model(&target)?;
        info!("Upload {} building model {}", self.row, model.id);

        let expected: BTreeSet<&str> = MODEL_BUILD_SUBJOBS.iter().copied().collect();
        let mut finished: BTreeSet<&str> = BTreeSet::new();
        loop {
            for subjob in self.remote.fetch_model_subjobs(&model)? {
                match subjob.status {
                    RemoteTaskStatus::Success => {
                        if let Some(name) = expected.get(subjob.name.as_str()) {
                            finished.insert(*name);
                        }
                    }
                    RemoteTaskStatus::Failure => {
                        return Err(UploadError::SubJobFailed {
                            detail: subjob.detail.unwrap_or_default(),
                            name: subjob.name,
                        })
                    }
                    RemoteTaskStatus::Other(_) => {}
                }
            }
            if self.remote.model_is_valid(&model)? {
                finished = expected.clone();
            }

            let pct = finished.len() as f64 / expected.len() as f64 * 100.0;
            self.report(&exec.task_name, pct, exec.job_progress);
            if finished.len() == expected.len() {
                return Ok(());
            }
            thread::sleep(self.poll.interval);
        }
    }
}
