//! Domain types exchanged between the UI, the orchestration layer and the
//! remote modelling service.

use crate::ids::{ModelId, RasterId, RevisionId, SchematisationId, SimulationId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Upload input
// ============================================================================

/// State of a local file compared to its remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    New,
    ChangesDetected,
    NoChangesDetected,
    DeletedLocally,
    /// The schematisation references a file that cannot be found locally.
    /// Only an explicit fix of the reference moves a file out of this state.
    InvalidReference,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::ChangesDetected => "CHANGES DETECTED",
            Self::NoChangesDetected => "NO CHANGES DETECTED",
            Self::DeletedLocally => "DELETED LOCALLY",
            Self::InvalidReference => "INVALID REFERENCE!",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a file plays inside a schematisation revision.
///
/// Ordering puts the spatialite first and rasters by type name, which is the
/// order upload tasks are planned in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Spatialite,
    Raster(String),
}

impl FileRole {
    pub fn raster(raster_type: impl Into<String>) -> Self {
        Self::Raster(raster_type.into())
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spatialite => f.write_str("spatialite"),
            Self::Raster(raster_type) => f.write_str(raster_type),
        }
    }
}

/// One candidate file selected in the upload wizard.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    pub state: FileState,
    /// Local path; absent for files deleted locally.
    pub local_path: Option<PathBuf>,
    /// Remote file name the local file was compared against, if any.
    pub remote_name: Option<String>,
    /// Whether the user asked for this file to be acted upon.
    pub make_action: bool,
}

impl SelectedFile {
    pub fn new(state: FileState, local_path: Option<PathBuf>) -> Self {
        Self {
            state,
            local_path,
            remote_name: None,
            make_action: true,
        }
    }

    pub fn with_remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    pub fn without_action(mut self) -> Self {
        self.make_action = false;
        self
    }
}

/// Remote schematisation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schematisation {
    pub id: SchematisationId,
    pub name: String,
}

/// Raster attached to a remote revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRaster {
    pub id: RasterId,
    #[serde(rename = "type")]
    pub raster_type: String,
}

/// Remote schematisation revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub number: u32,
    #[serde(default)]
    pub rasters: Vec<RevisionRaster>,
}

/// Address of a revision on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionTarget {
    pub schematisation_id: SchematisationId,
    pub revision_id: RevisionId,
}

/// Remote file to remove from a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteFile {
    Spatialite,
    Raster { id: RasterId, raster_type: String },
}

/// Everything the UI decided about one upload. Never mutated by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSpecification {
    pub schematisation: Schematisation,
    /// Revision the upload starts from (the latest remote revision).
    pub revision: Revision,
    pub files: BTreeMap<FileRole, SelectedFile>,
    pub commit_message: String,
    /// Create a new revision before pushing files.
    pub create_revision: bool,
    /// Push files only; skip commit and model build.
    pub upload_only: bool,
}

impl UploadSpecification {
    /// Revision number the upload will end up in.
    pub fn target_revision_number(&self) -> u32 {
        if self.create_revision {
            self.revision.number + 1
        } else {
            self.revision.number
        }
    }
}

// ============================================================================
// Remote background work
// ============================================================================

/// Status of a server-side task or sub-job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteTaskStatus {
    Success,
    Failure,
    /// Any non-terminal value (`pending`, `started`, ...).
    Other(String),
}

impl RemoteTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl From<String> for RemoteTaskStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "success" => Self::Success,
            "failure" => Self::Failure,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for RemoteTaskStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<RemoteTaskStatus> for String {
    fn from(value: RemoteTaskStatus) -> Self {
        match value {
            RemoteTaskStatus::Success => "success".to_string(),
            RemoteTaskStatus::Failure => "failure".to_string(),
            RemoteTaskStatus::Other(other) => other,
        }
    }
}

/// Single validation finding reported by the model checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIssue {
    pub description: String,
}

/// Detail block of a background task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<CheckIssue>,
}

/// Background task started by the service for a revision (e.g. the model checker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: TaskId,
    pub name: String,
    pub status: RemoteTaskStatus,
    #[serde(default)]
    pub detail: TaskDetail,
}

/// Handle to a model being built out of a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: ModelId,
}

/// One of the sub-jobs of a model build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubJob {
    pub name: String,
    pub status: RemoteTaskStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

// ============================================================================
// Simulations
// ============================================================================

/// Remote simulation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: SimulationId,
    pub name: String,
    #[serde(default)]
    pub threedimodel_id: Option<ModelId>,
}

/// Progress of a running simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Percentage in `[0, 100]`.
    pub percentage: f64,
    /// Simulated time in seconds.
    pub time: f64,
}

impl Progress {
    pub fn new(percentage: f64, time: f64) -> Self {
        Self {
            percentage: percentage.clamp(0.0, 100.0),
            time,
        }
    }

    pub fn complete(time: f64) -> Self {
        Self::new(100.0, time)
    }
}

/// Which simulations the monitor tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationFilter {
    /// Restrict to simulations of one model.
    pub model_id: Option<ModelId>,
}

impl SimulationFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_model(model_id: ModelId) -> Self {
        Self {
            model_id: Some(model_id),
        }
    }

    pub fn matches(&self, simulation: &Simulation) -> bool {
        match self.model_id {
            Some(model_id) => simulation.threedimodel_id == Some(model_id),
            None => true,
        }
    }
}

/// One downloadable result file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub filename: String,
    /// Expected size in bytes.
    pub size: u64,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_roles_order_spatialite_first() {
        let mut roles = vec![
            FileRole::raster("infiltration_rate_file"),
            FileRole::Spatialite,
            FileRole::raster("dem_file"),
        ];
        roles.sort();
        assert_eq!(
            roles,
            vec![
                FileRole::Spatialite,
                FileRole::raster("dem_file"),
                FileRole::raster("infiltration_rate_file"),
            ]
        );
    }

    #[test]
    fn test_remote_task_status_from_wire() {
        let task: BackgroundTask = serde_json::from_str(
            r#"{"id": 7, "name": "modelchecker", "status": "started", "detail": {}}"#,
        )
        .unwrap();
        assert_eq!(task.status, RemoteTaskStatus::Other("started".to_string()));
        assert!(!task.status.is_terminal());
        assert!(RemoteTaskStatus::from("failure").is_terminal());
    }

    #[test]
    fn test_filter_matches_model() {
        let sim = Simulation {
            id: SimulationId(1),
            name: "rain".to_string(),
            threedimodel_id: Some(ModelId(5)),
        };
        assert!(SimulationFilter::all().matches(&sim));
        assert!(SimulationFilter::for_model(ModelId(5)).matches(&sim));
        assert!(!SimulationFilter::for_model(ModelId(6)).matches(&sim));
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(Progress::new(140.0, 3.0).percentage, 100.0);
        assert_eq!(Progress::new(-1.0, 0.0).percentage, 0.0);
    }
}
