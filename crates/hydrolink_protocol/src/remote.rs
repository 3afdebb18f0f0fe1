//! Contracts of the remote modelling service.
//!
//! The generated REST client is wrapped behind these traits. Every call has
//! three outcomes: a result, an application-level failure carrying the
//! service's error body ([`RemoteError::Api`]), or a transport failure
//! ([`RemoteError::Transport`]). Implementations must be usable from worker
//! threads, hence `Send + Sync`.

use crate::ids::{SchematisationId, SimulationId, TaskId};
use crate::status::Status;
use crate::types::{
    BackgroundTask, DownloadItem, FileRole, ModelRef, Progress, RemoteFile, Revision,
    RevisionTarget, Simulation, SimulationFilter, SubJob,
};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failure of a remote call.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The service answered with an error status and body.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The service could not be reached or the connection broke.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Human-readable message for the UI.
    ///
    /// For API errors the JSON body's `details` field is preferred; an
    /// `errors` list is rendered one `reason (related_object)` per line;
    /// anything else falls back to the raw body.
    pub fn message(&self) -> String {
        let details = match self {
            Self::Api { body, .. } => extract_error_details(body),
            Self::Transport(message) => message.clone(),
        };
        format!("Error: {}", details)
    }
}

fn extract_error_details(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    if let Some(details) = parsed.get("details") {
        return match details {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    match parsed.get("errors") {
        Some(Value::Array(errors)) => {
            let parts: Vec<String> = errors
                .iter()
                .map(|err| {
                    let reason = err.get("reason").and_then(Value::as_str).unwrap_or_default();
                    let related = err
                        .get("instance")
                        .and_then(|i| i.get("related_object"))
                        .map(value_text)
                        .unwrap_or_default();
                    format!("{} ({})", reason, related)
                })
                .collect();
            format!("\n{}", parts.join("\n"))
        }
        Some(Value::Object(errors)) => {
            let parts: Vec<String> = errors.values().map(value_text).collect();
            format!("\n{}", parts.join("\n"))
        }
        _ => body.to_string(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Progress callback for transfers: `(bytes_done, bytes_total)`.
pub type TransferProgress<'a> = &'a mut dyn FnMut(u64, u64);

/// Remote operations used while uploading a schematisation revision.
pub trait SchematisationRemote: Send + Sync {
    /// Create a new revision of the schematisation.
    fn create_revision(&self, schematisation_id: SchematisationId) -> RemoteResult<Revision>;

    /// Remove a file from a revision.
    fn delete_file(&self, target: &RevisionTarget, file: &RemoteFile) -> RemoteResult<()>;

    /// Push a local file into a revision.
    fn upload_file(
        &self,
        target: &RevisionTarget,
        role: &FileRole,
        local_path: &Path,
        progress: TransferProgress<'_>,
    ) -> RemoteResult<()>;

    /// Commit the revision. Returns the committed revision.
    fn commit_revision(&self, target: &RevisionTarget, message: &str) -> RemoteResult<Revision>;

    /// Look up a background task of the revision by name.
    fn fetch_background_task(
        &self,
        target: &RevisionTarget,
        name: &str,
    ) -> RemoteResult<Option<BackgroundTask>>;

    /// Current state of a background task.
    fn fetch_task_status(&self, target: &RevisionTarget, task_id: TaskId) -> RemoteResult<BackgroundTask>;

    /// Start building a model out of the revision.
    fn create_model(&self, target: &RevisionTarget) -> RemoteResult<ModelRef>;

    /// Sub-jobs of a model build.
    fn fetch_model_subjobs(&self, model: &ModelRef) -> RemoteResult<Vec<SubJob>>;

    /// Whether the service already considers the model valid. A valid model
    /// has all of its sub-jobs done even if they are not all reported.
    fn model_is_valid(&self, _model: &ModelRef) -> RemoteResult<bool> {
        Ok(false)
    }
}

/// Remote operations used to follow running simulations.
pub trait SimulationRemote: Send + Sync {
    fn fetch_simulations(&self, filter: &SimulationFilter) -> RemoteResult<Vec<Simulation>>;

    fn fetch_simulation(&self, id: SimulationId) -> RemoteResult<Simulation>;

    fn fetch_status(&self, id: SimulationId) -> RemoteResult<Status>;

    fn fetch_progress(&self, id: SimulationId) -> RemoteResult<Progress>;

    /// Open the push channel of active simulations.
    fn subscribe(&self) -> RemoteResult<Box<dyn PushSubscription>>;
}

/// An open push channel.
///
/// `close` may be called from another thread while `next_message` is
/// blocked, and more than once; implementations must tolerate both.
pub trait PushSubscription: Send + Sync {
    /// Wait up to `timeout` for the next text frame. `Ok(None)` on timeout.
    fn next_message(&self, timeout: Duration) -> RemoteResult<Option<String>>;

    fn close(&self);
}

/// Remote operations used to fetch simulation results.
pub trait ResultsRemote: Send + Sync {
    fn fetch_result_downloads(&self, simulation_id: SimulationId) -> RemoteResult<Vec<DownloadItem>>;

    /// Stream one file into `sink`, calling `on_chunk` with the size of every
    /// chunk written. Returns the number of bytes written.
    fn stream_download(
        &self,
        item: &DownloadItem,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> RemoteResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_prefers_details() {
        let err = RemoteError::api(400, r#"{"details": "Revision is locked", "errors": []}"#);
        assert_eq!(err.message(), "Error: Revision is locked");
    }

    #[test]
    fn test_message_formats_error_list() {
        let err = RemoteError::api(
            400,
            r#"{"errors": [{"reason": "Missing DEM", "instance": {"related_object": "dem_file"}}]}"#,
        );
        assert_eq!(err.message(), "Error: \nMissing DEM (dem_file)");
    }

    #[test]
    fn test_message_falls_back_to_raw_body() {
        let err = RemoteError::api(502, "Bad gateway");
        assert_eq!(err.message(), "Error: Bad gateway");
        assert_eq!(
            RemoteError::transport("connection reset").message(),
            "Error: connection reset"
        );
        assert!(RemoteError::transport("x").is_transport());
    }
}
