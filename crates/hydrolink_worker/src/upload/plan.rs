//! Turning an upload specification into an ordered task list.

use hydrolink_protocol::{FileRole, FileState, UploadSpecification};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// One step of an upload. Tasks are plain commands; the runner interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTask {
    CreateRevision,
    DeleteSpatialite,
    UploadSpatialite { local_path: PathBuf },
    DeleteRaster { raster_type: String },
    UploadRaster { raster_type: String, local_path: PathBuf },
    CommitRevision { message: String },
    CreateModel,
}

impl UploadTask {
    /// Name shown in progress reports and the job log.
    pub fn display_name(&self) -> String {
        match self {
            Self::CreateRevision => "CREATE REVISION".to_string(),
            Self::DeleteSpatialite => "DELETE SPATIALITE".to_string(),
            Self::UploadSpatialite { .. } => "UPLOAD SPATIALITE".to_string(),
            Self::DeleteRaster { raster_type } => format!("DELETE RASTER ({})", raster_type),
            Self::UploadRaster { raster_type, .. } => format!("UPLOAD RASTER ({})", raster_type),
            Self::CommitRevision { .. } => "COMMIT REVISION".to_string(),
            Self::CreateModel => "MAKE 3DI MODEL".to_string(),
        }
    }

    fn delete(role: &FileRole) -> Self {
        match role {
            FileRole::Spatialite => Self::DeleteSpatialite,
            FileRole::Raster(raster_type) => Self::DeleteRaster {
                raster_type: raster_type.clone(),
            },
        }
    }

    fn upload(role: &FileRole, local_path: PathBuf) -> Self {
        match role {
            FileRole::Spatialite => Self::UploadSpatialite { local_path },
            FileRole::Raster(raster_type) => Self::UploadRaster {
                raster_type: raster_type.clone(),
                local_path,
            },
        }
    }
}

impl fmt::Display for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Build the ordered task list for an upload.
///
/// Files are visited spatialite first, then rasters by type name. A file in
/// a state that needs an upload but has no local path contributes nothing.
pub fn build_upload_tasks(spec: &UploadSpecification) -> Vec<UploadTask> {
    let mut tasks = Vec::new();
    if spec.create_revision {
        tasks.push(UploadTask::CreateRevision);
    }

    for (role, file) in spec.files.iter().filter(|(_, file)| file.make_action) {
        debug!(
            "Planning {} ({}), remote file: {}",
            role,
            file.state,
            file.remote_name.as_deref().unwrap_or("none")
        );
        match file.state {
            FileState::New => {
                if let Some(path) = &file.local_path {
                    tasks.push(UploadTask::upload(role, path.clone()));
                }
            }
            FileState::ChangesDetected => {
                if let Some(path) = &file.local_path {
                    tasks.push(UploadTask::delete(role));
                    tasks.push(UploadTask::upload(role, path.clone()));
                }
            }
            FileState::DeletedLocally => tasks.push(UploadTask::delete(role)),
            FileState::NoChangesDetected | FileState::InvalidReference => {}
        }
    }

    if !spec.upload_only {
        tasks.push(UploadTask::CommitRevision {
            message: spec.commit_message.clone(),
        });
        tasks.push(UploadTask::CreateModel);
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrolink_protocol::{Revision, RevisionId, Schematisation, SchematisationId, SelectedFile};
    use std::collections::BTreeMap;

    fn spec(files: Vec<(FileRole, SelectedFile)>) -> UploadSpecification {
        UploadSpecification {
            schematisation: Schematisation {
                id: SchematisationId(5),
                name: "Polder".to_string(),
            },
            revision: Revision {
                id: RevisionId(11),
                number: 3,
                rasters: Vec::new(),
            },
            files: files.into_iter().collect::<BTreeMap<_, _>>(),
            commit_message: "new dem".to_string(),
            create_revision: true,
            upload_only: false,
        }
    }

    fn names(tasks: &[UploadTask]) -> Vec<String> {
        tasks.iter().map(UploadTask::display_name).collect()
    }

    #[test]
    fn test_full_upload_order() {
        let tasks = build_upload_tasks(&spec(vec![
            (
                FileRole::raster("friction_coefficient_file"),
                SelectedFile::new(FileState::New, Some("friction.tif".into())),
            ),
            (
                FileRole::Spatialite,
                SelectedFile::new(FileState::ChangesDetected, Some("model.sqlite".into())),
            ),
            (
                FileRole::raster("dem_file"),
                SelectedFile::new(FileState::DeletedLocally, None),
            ),
        ]));

        assert_eq!(
            names(&tasks),
            vec![
                "CREATE REVISION",
                "DELETE SPATIALITE",
                "UPLOAD SPATIALITE",
                "DELETE RASTER (dem_file)",
                "UPLOAD RASTER (friction_coefficient_file)",
                "COMMIT REVISION",
                "MAKE 3DI MODEL",
            ]
        );
        assert_eq!(
            tasks[5],
            UploadTask::CommitRevision {
                message: "new dem".to_string()
            }
        );
    }

    #[test]
    fn test_skipped_states_and_unselected_files() {
        let mut spec = spec(vec![
            (
                FileRole::Spatialite,
                SelectedFile::new(FileState::NoChangesDetected, Some("model.sqlite".into())),
            ),
            (
                FileRole::raster("dem_file"),
                SelectedFile::new(FileState::InvalidReference, Some("dem.tif".into())),
            ),
            (
                FileRole::raster("initial_waterlevel_file"),
                SelectedFile::new(FileState::New, Some("wl.tif".into())).without_action(),
            ),
        ]);
        spec.create_revision = false;
        spec.upload_only = true;

        assert!(build_upload_tasks(&spec).is_empty());
    }

    #[test]
    fn test_upload_only_changed_raster() {
        let mut spec = spec(vec![(
            FileRole::raster("dem_file"),
            SelectedFile::new(FileState::ChangesDetected, Some("dem.tif".into())),
        )]);
        spec.create_revision = false;
        spec.upload_only = true;

        assert_eq!(
            build_upload_tasks(&spec),
            vec![
                UploadTask::DeleteRaster {
                    raster_type: "dem_file".to_string()
                },
                UploadTask::UploadRaster {
                    raster_type: "dem_file".to_string(),
                    local_path: PathBuf::from("dem.tif"),
                },
            ]
        );
    }
}
