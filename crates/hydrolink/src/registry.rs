//! Upload registry - single-owner state for all uploads of a session
//!
//! The registry thread owns every [`UploadRow`] and processes [`Command`]s in
//! a synchronous loop. Each submitted upload gets its own runner thread; the
//! runner's events come back to the registry as commands, are folded into the
//! row and then relayed to subscribers. Rows are never removed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hydrolink_protocol::{SchematisationRemote, UploadRowId, UploadSpecification};
use hydrolink_worker::{
    build_upload_tasks, EventBus, JobStatus, PollConfig, UploadEvent, UploadJob, UploadJobRunner,
    UploadOutcome,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One-shot channel for returning results from the registry
type Responder<T> = Sender<T>;

/// One upload as shown in the uploads overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRow {
    pub id: UploadRowId,
    pub schematisation_name: String,
    /// Revision number the upload targets.
    pub revision_number: u32,
    pub commit_message: String,
    pub job: UploadJob,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadRow {
    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    pub fn is_terminal(&self) -> bool {
        self.job.is_terminal()
    }
}

/// Commands sent to the registry thread
enum Command {
    Submit {
        spec: UploadSpecification,
        respond: Responder<Result<UploadRowId>>,
    },
    /// Event relayed from an upload runner
    JobEvent(UploadEvent),
    GetRow {
        id: UploadRowId,
        respond: Responder<Option<UploadRow>>,
    },
    ListRows {
        respond: Responder<Vec<UploadRow>>,
    },
    Subscribe {
        respond: Responder<Receiver<UploadEvent>>,
    },
    Shutdown,
}

/// Handle for interacting with the registry from other threads.
///
/// Can be cloned and shared.
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: Sender<Command>,
}

impl RegistryHandle {
    fn send_and_wait<T>(&self, make_cmd: impl FnOnce(Responder<T>) -> Command) -> Result<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(make_cmd(tx))
            .map_err(|_| anyhow::anyhow!("Registry channel closed"))?;
        rx.recv()
            .map_err(|_| anyhow::anyhow!("Registry response channel closed"))
    }

    /// Register an upload and start its runner. Returns the new row number.
    pub fn submit(&self, spec: UploadSpecification) -> Result<UploadRowId> {
        self.send_and_wait(|respond| Command::Submit { spec, respond })?
    }

    pub fn row(&self, id: UploadRowId) -> Result<Option<UploadRow>> {
        self.send_and_wait(|respond| Command::GetRow { id, respond })
    }

    /// All rows in submission order.
    pub fn rows(&self) -> Result<Vec<UploadRow>> {
        self.send_and_wait(|respond| Command::ListRows { respond })
    }

    /// Receive every upload event after it has been applied to its row.
    pub fn subscribe(&self) -> Result<Receiver<UploadEvent>> {
        self.send_and_wait(|respond| Command::Subscribe { respond })
    }

    /// Block until the row is terminal or `timeout` elapses.
    pub fn wait_for(&self, id: UploadRowId, timeout: Duration) -> Result<UploadRow> {
        let events = self.subscribe()?;
        let deadline = Instant::now() + timeout;
        loop {
            let row = self
                .row(id)?
                .with_context(|| format!("Unknown upload row {}", id))?;
            if row.is_terminal() {
                return Ok(row);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    anyhow::bail!("Upload {} still running after {:?}", id, timeout)
                }
                Err(RecvTimeoutError::Disconnected) => anyhow::bail!("Registry stopped"),
            }
        }
    }

    /// Ask the registry thread to exit. Running uploads continue detached.
    pub fn shutdown(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::Shutdown)
            .map_err(|_| anyhow::anyhow!("Registry channel closed"))
    }
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("channel", &"<std::sync::mpsc::Sender>")
            .finish()
    }
}

/// Registry - owns all upload rows
pub struct UploadRegistry {
    rows: BTreeMap<UploadRowId, UploadRow>,
    next_row: u32,
    remote: Arc<dyn SchematisationRemote>,
    poll: PollConfig,

    commands: Receiver<Command>,
    // Runners report back through this sender.
    job_events: Sender<Command>,
    events: EventBus<UploadEvent>,
    runners: Vec<JoinHandle<UploadOutcome>>,
}

impl UploadRegistry {
    /// Create a registry and its handle. Run the registry with [`spawn`](Self::spawn).
    pub fn new(remote: Arc<dyn SchematisationRemote>, poll: PollConfig) -> (Self, RegistryHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let registry = Self {
            rows: BTreeMap::new(),
            next_row: 1,
            remote,
            poll,
            commands: cmd_rx,
            job_events: cmd_tx.clone(),
            events: EventBus::new(),
            runners: Vec::new(),
        };
        (registry, RegistryHandle { cmd_tx })
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("upload-registry".to_string())
            .spawn(move || self.run())
    }

    /// Run the registry loop. Blocks until shutdown.
    pub fn run(mut self) {
        info!("Upload registry started");

        while let Ok(cmd) = self.commands.recv() {
            match cmd {
                Command::Shutdown => {
                    info!("Upload registry received shutdown command");
                    break;
                }
                cmd => self.handle_command(cmd),
            }
        }

        self.runners.retain(|runner| !runner.is_finished());
        if !self.runners.is_empty() {
            warn!(
                "Upload registry stopped with {} upload(s) still running",
                self.runners.len()
            );
        }
        info!("Upload registry stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { spec, respond } => {
                let _ = respond.send(self.submit(spec));
            }
            Command::JobEvent(event) => self.apply(event),
            Command::GetRow { id, respond } => {
                let _ = respond.send(self.rows.get(&id).cloned());
            }
            Command::ListRows { respond } => {
                let _ = respond.send(self.rows.values().cloned().collect());
            }
            Command::Subscribe { respond } => {
                let _ = respond.send(self.events.subscribe());
            }
            Command::Shutdown => {}
        }
    }

    fn submit(&mut self, spec: UploadSpecification) -> Result<UploadRowId> {
        let id = UploadRowId(self.next_row);
        let tasks = build_upload_tasks(&spec);
        info!(
            "Registering upload {} for '{}' ({} task(s))",
            id,
            spec.schematisation.name,
            tasks.len()
        );

        let row = UploadRow {
            id,
            schematisation_name: spec.schematisation.name.clone(),
            revision_number: spec.target_revision_number(),
            commit_message: spec.commit_message.clone(),
            job: UploadJob::new(id, &tasks),
            started_at: Utc::now(),
            finished_at: None,
        };

        let bus = EventBus::new();
        bus.forward(self.job_events.clone(), Command::JobEvent);
        let runner = UploadJobRunner::new(id, Arc::new(spec), Arc::clone(&self.remote), bus)
            .with_poll_config(self.poll);

        self.rows.insert(id, row);
        self.next_row += 1;
        self.runners.retain(|runner| !runner.is_finished());

        match runner.spawn(tasks) {
            Ok(handle) => {
                self.runners.push(handle);
                Ok(id)
            }
            Err(err) => {
                self.rows.remove(&id);
                Err(err).context("Failed to spawn upload thread")
            }
        }
    }

    fn apply(&mut self, event: UploadEvent) {
        let Some(row) = self.rows.get_mut(&event.row()) else {
            debug!("Dropping event for unknown upload {}", event.row());
            return;
        };
        row.job.apply(&event);
        if event.is_terminal() && row.finished_at.is_none() {
            row.finished_at = Some(Utc::now());
            info!("Upload {} ended: {}", row.id, row.status().as_str());
        }
        self.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrolink_protocol::{
        FileRole, FileState, RemoteError, Revision, RevisionId, Schematisation, SchematisationId,
        SelectedFile,
    };
    use hydrolink_test_utils::FakeSchematisationRemote;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn spec(name: &str, files: BTreeMap<FileRole, SelectedFile>) -> UploadSpecification {
        UploadSpecification {
            schematisation: Schematisation {
                id: SchematisationId(1),
                name: name.to_string(),
            },
            revision: Revision {
                id: RevisionId(7),
                number: 2,
                rasters: Vec::new(),
            },
            files,
            commit_message: "tweak".to_string(),
            create_revision: true,
            upload_only: true,
        }
    }

    fn start(remote: FakeSchematisationRemote) -> (RegistryHandle, JoinHandle<()>) {
        let poll = PollConfig {
            interval: Duration::ZERO,
            retries: 2,
        };
        let (registry, handle) = UploadRegistry::new(Arc::new(remote), poll);
        let thread = registry.spawn().unwrap();
        (handle, thread)
    }

    fn created_revision() -> Revision {
        Revision {
            id: RevisionId(8),
            number: 3,
            rasters: Vec::new(),
        }
    }

    #[test]
    fn test_rows_are_numbered_from_one() {
        let (handle, thread) = start(FakeSchematisationRemote::new(created_revision()));

        let first = handle.submit(spec("First", BTreeMap::new())).unwrap();
        let second = handle.submit(spec("Second", BTreeMap::new())).unwrap();
        assert_eq!(first, UploadRowId(1));
        assert_eq!(second, UploadRowId(2));

        let row = handle.wait_for(second, TIMEOUT).unwrap();
        assert_eq!(row.schematisation_name, "Second");
        assert_eq!(row.revision_number, 3);
        assert_eq!(row.status(), JobStatus::Success);
        assert!(row.finished_at.is_some());
        assert_eq!(
            row.job.log.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
            vec!["CREATE REVISION ==> done"]
        );

        handle.wait_for(first, TIMEOUT).unwrap();
        assert_eq!(handle.rows().unwrap().len(), 2);
        handle.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_failure_is_recorded_on_the_row() {
        let remote = FakeSchematisationRemote::new(created_revision())
            .failing("create_revision", RemoteError::transport("connection refused"));
        let (handle, thread) = start(remote);

        let mut files = BTreeMap::new();
        files.insert(
            FileRole::raster("dem_file"),
            SelectedFile::new(FileState::DeletedLocally, None),
        );
        let id = handle.submit(spec("Broken", files)).unwrap();
        let row = handle.wait_for(id, TIMEOUT).unwrap();

        assert_eq!(row.status(), JobStatus::Failure);
        assert_eq!(row.job.log.len(), 1);
        assert_eq!(
            row.job.log[0].message,
            "CREATE REVISION ==> failed\nError: connection refused"
        );
        assert!(!row.job.log[0].success);

        handle.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_subscribers_see_relayed_events() {
        let (handle, thread) = start(FakeSchematisationRemote::new(created_revision()));
        let events = handle.subscribe().unwrap();

        let id = handle.submit(spec("Relay", BTreeMap::new())).unwrap();
        let mut seen = Vec::new();
        loop {
            let event = events.recv_timeout(TIMEOUT).unwrap();
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }

        assert!(seen.iter().all(|event| event.row() == id));
        assert!(matches!(seen.last(), Some(UploadEvent::JobSucceeded { .. })));
        handle.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_unknown_row() {
        let (handle, thread) = start(FakeSchematisationRemote::new(created_revision()));
        assert!(handle.row(UploadRowId(42)).unwrap().is_none());
        assert!(handle.wait_for(UploadRowId(42), TIMEOUT).is_err());
        handle.shutdown().unwrap();
        thread.join().unwrap();
    }
}
