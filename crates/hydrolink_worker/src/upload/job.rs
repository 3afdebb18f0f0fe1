//! Observable state of one upload, folded from its events.

use super::plan::UploadTask;
use super::runner::UploadEvent;
use hydrolink_protocol::defaults::DONE_TASK_NAME;
use hydrolink_protocol::UploadRowId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    InProgress,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "In progress",
            Self::Success => "Success",
            Self::Failure => "Failure",
        }
    }
}

/// One line of the job log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub success: bool,
}

/// Progress, status and log of an upload.
///
/// Built from the planned tasks and advanced only through [`UploadJob::apply`].
/// Once terminal, further events are ignored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadJob {
    pub row: UploadRowId,
    pub tasks: Vec<String>,
    pub current_task: Option<usize>,
    pub task_name: String,
    pub task_progress: f64,
    pub job_progress: f64,
    pub status: JobStatus,
    pub committed_revision: Option<u32>,
    pub message: Option<String>,
    pub log: Vec<LogEntry>,
}

impl UploadJob {
    pub fn new(row: UploadRowId, tasks: &[UploadTask]) -> Self {
        Self {
            row,
            tasks: tasks.iter().map(UploadTask::display_name).collect(),
            current_task: None,
            task_name: "NO TASK".to_string(),
            task_progress: 0.0,
            job_progress: 0.0,
            status: JobStatus::InProgress,
            committed_revision: None,
            message: None,
            log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != JobStatus::InProgress
    }

    /// Fold one event into the job. Events for other rows are ignored.
    pub fn apply(&mut self, event: &UploadEvent) {
        if self.is_terminal() || event.row() != self.row {
            return;
        }
        match event {
            UploadEvent::TaskProgress {
                task_name,
                task_progress,
                job_progress,
                ..
            } => {
                if task_name != DONE_TASK_NAME {
                    self.current_task = self.tasks.iter().position(|name| name == task_name);
                }
                // Only the report that closes a task advances the job progress;
                // intra-task reports at 100% do not mean the task returned.
                let completed = *task_progress >= 100.0 && *job_progress > self.job_progress;
                self.task_name = task_name.clone();
                self.task_progress = *task_progress;
                self.job_progress = *job_progress;
                if completed && task_name != DONE_TASK_NAME {
                    self.record(format!("{} ==> done", task_name), true);
                }
            }
            UploadEvent::RevisionCommitted {
                revision_number, ..
            } => {
                self.committed_revision = Some(*revision_number);
            }
            UploadEvent::JobSucceeded { message, .. } => {
                self.status = JobStatus::Success;
                self.message = Some(message.clone());
            }
            UploadEvent::JobFailed {
                task_name, message, ..
            } => {
                self.status = JobStatus::Failure;
                self.message = Some(message.clone());
                self.log.push(LogEntry {
                    message: format!("{} ==> failed\n{}", task_name, message),
                    success: false,
                });
            }
        }
    }

    // Success lines are recorded once even if 100% is reported repeatedly.
    fn record(&mut self, message: String, success: bool) {
        let entry = LogEntry { message, success };
        if !self.log.contains(&entry) {
            self.log.push(entry);
        }
    }
}
