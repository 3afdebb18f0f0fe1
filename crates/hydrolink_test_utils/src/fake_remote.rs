//! Scripted implementations of the remote traits.

use crate::fake_push::FakePushChannel;
use hydrolink_protocol::defaults::{MODEL_BUILD_SUBJOBS, MODEL_CHECKER_TASK};
use hydrolink_protocol::{
    BackgroundTask, DownloadItem, FileRole, ModelId, ModelRef, Progress, PushSubscription,
    RemoteError, RemoteFile, RemoteResult, RemoteTaskStatus, ResultsRemote, Revision,
    RevisionTarget, SchematisationId, SchematisationRemote, Simulation, SimulationFilter,
    SimulationId, SimulationRemote, Status, SubJob, TaskDetail, TaskId, TransferProgress,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// A call received by one of the fakes.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateRevision,
    DeleteFile(RemoteFile),
    UploadFile(FileRole),
    CommitRevision(String),
    FetchBackgroundTask(String),
    FetchTaskStatus(TaskId),
    CreateModel,
    FetchModelSubjobs,
    ModelIsValid,
    FetchSimulations,
    FetchSimulation(SimulationId),
    FetchStatus(SimulationId),
    FetchProgress(SimulationId),
    Subscribe,
    FetchResultDownloads(SimulationId),
    StreamDownload(String),
}

// ============================================================================
// Schematisations
// ============================================================================

struct SchematisationScript {
    created_revision: Revision,
    background_lookups: VecDeque<Option<BackgroundTask>>,
    fallback_background: Option<BackgroundTask>,
    task_statuses: VecDeque<BackgroundTask>,
    subjob_rounds: VecDeque<Vec<SubJob>>,
    model_valid: bool,
    failures: HashMap<&'static str, RemoteError>,
}

/// Fake of the schematisation endpoints.
///
/// Without further scripting the model checker is found on the first lookup
/// and succeeds, and every model sub-job succeeds on the first poll.
pub struct FakeSchematisationRemote {
    script: Mutex<SchematisationScript>,
    calls: Mutex<Vec<RemoteCall>>,
}

fn checker_task(status: &str) -> BackgroundTask {
    BackgroundTask {
        id: TaskId(1),
        name: MODEL_CHECKER_TASK.to_string(),
        status: RemoteTaskStatus::from(status),
        detail: TaskDetail::default(),
    }
}

impl FakeSchematisationRemote {
    /// `created_revision` is returned by `create_revision` and `commit_revision`.
    pub fn new(created_revision: Revision) -> Self {
        Self {
            script: Mutex::new(SchematisationScript {
                created_revision,
                background_lookups: VecDeque::new(),
                fallback_background: Some(checker_task("pending")),
                task_statuses: VecDeque::new(),
                subjob_rounds: VecDeque::new(),
                model_valid: false,
                failures: HashMap::new(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers for successive `fetch_background_task` calls.
    pub fn with_background_lookups(self, lookups: Vec<Option<BackgroundTask>>) -> Self {
        self.script.lock().unwrap().background_lookups = lookups.into();
        self
    }

    /// The model checker never shows up.
    pub fn with_checker_never_started(self) -> Self {
        self.script.lock().unwrap().fallback_background = None;
        self
    }

    /// Answers for successive `fetch_task_status` calls; afterwards success.
    pub fn with_task_statuses(self, statuses: Vec<BackgroundTask>) -> Self {
        self.script.lock().unwrap().task_statuses = statuses.into();
        self
    }

    /// Answers for successive `fetch_model_subjobs` calls; afterwards all succeed.
    pub fn with_subjob_rounds(self, rounds: Vec<Vec<SubJob>>) -> Self {
        self.script.lock().unwrap().subjob_rounds = rounds.into();
        self
    }

    pub fn with_valid_model(self) -> Self {
        self.script.lock().unwrap().model_valid = true;
        self
    }

    /// Make every call of `operation` fail with `error`.
    pub fn failing(self, operation: &'static str, error: RemoteError) -> Self {
        self.script.lock().unwrap().failures.insert(operation, error);
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RemoteCall, operation: &'static str) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(call);
        self.scripted_failure(operation)
    }

    fn scripted_failure(&self, operation: &'static str) -> RemoteResult<()> {
        match self.script.lock().unwrap().failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// A checker task in the given state, for [`FakeSchematisationRemote::with_task_statuses`].
pub fn checker_status(status: &str, detail: TaskDetail) -> BackgroundTask {
    BackgroundTask {
        detail,
        ..checker_task(status)
    }
}

impl SchematisationRemote for FakeSchematisationRemote {
    fn create_revision(&self, _schematisation_id: SchematisationId) -> RemoteResult<Revision> {
        self.record(RemoteCall::CreateRevision, "create_revision")?;
        Ok(self.script.lock().unwrap().created_revision.clone())
    }

    fn delete_file(&self, _target: &RevisionTarget, file: &RemoteFile) -> RemoteResult<()> {
        self.record(RemoteCall::DeleteFile(file.clone()), "delete_file")
    }

    fn upload_file(
        &self,
        _target: &RevisionTarget,
        role: &FileRole,
        _local_path: &Path,
        progress: TransferProgress<'_>,
    ) -> RemoteResult<()> {
        // A scripted upload failure happens after the bytes are sent.
        self.calls.lock().unwrap().push(RemoteCall::UploadFile(role.clone()));
        progress(50, 100);
        progress(100, 100);
        self.scripted_failure("upload_file")
    }

    fn commit_revision(&self, _target: &RevisionTarget, message: &str) -> RemoteResult<Revision> {
        self.record(RemoteCall::CommitRevision(message.to_string()), "commit_revision")?;
        Ok(self.script.lock().unwrap().created_revision.clone())
    }

    fn fetch_background_task(
        &self,
        _target: &RevisionTarget,
        name: &str,
    ) -> RemoteResult<Option<BackgroundTask>> {
        self.record(
            RemoteCall::FetchBackgroundTask(name.to_string()),
            "fetch_background_task",
        )?;
        let mut script = self.script.lock().unwrap();
        match script.background_lookups.pop_front() {
            Some(answer) => Ok(answer),
            None => Ok(script.fallback_background.clone()),
        }
    }

    fn fetch_task_status(&self, _target: &RevisionTarget, task_id: TaskId) -> RemoteResult<BackgroundTask> {
        self.record(RemoteCall::FetchTaskStatus(task_id), "fetch_task_status")?;
        let mut script = self.script.lock().unwrap();
        Ok(script
            .task_statuses
            .pop_front()
            .unwrap_or_else(|| checker_task("success")))
    }

    fn create_model(&self, _target: &RevisionTarget) -> RemoteResult<ModelRef> {
        self.record(RemoteCall::CreateModel, "create_model")?;
        Ok(ModelRef { id: ModelId(1) })
    }

    fn fetch_model_subjobs(&self, _model: &ModelRef) -> RemoteResult<Vec<SubJob>> {
        self.record(RemoteCall::FetchModelSubjobs, "fetch_model_subjobs")?;
        let mut script = self.script.lock().unwrap();
        Ok(script.subjob_rounds.pop_front().unwrap_or_else(|| {
            MODEL_BUILD_SUBJOBS
                .iter()
                .map(|name| crate::subjob(name, "success"))
                .collect()
        }))
    }

    fn model_is_valid(&self, _model: &ModelRef) -> RemoteResult<bool> {
        self.record(RemoteCall::ModelIsValid, "model_is_valid")?;
        Ok(self.script.lock().unwrap().model_valid)
    }
}

// ============================================================================
// Simulations
// ============================================================================

#[derive(Default)]
struct SimulationWorld {
    simulations: BTreeMap<SimulationId, Simulation>,
    statuses: HashMap<SimulationId, Status>,
    progresses: HashMap<SimulationId, Progress>,
    listing_error: Option<RemoteError>,
    subscribe_error: Option<RemoteError>,
    status_failures: HashMap<SimulationId, RemoteError>,
    channel: Option<FakePushChannel>,
    fetch_delay: Option<Duration>,
}

/// Fake of the simulation endpoints. The world can be changed while a
/// monitor is running.
#[derive(Default)]
pub struct FakeSimulationRemote {
    world: Mutex<SimulationWorld>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl FakeSimulationRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_simulation(&self, simulation: Simulation, status: Status, progress: Progress) {
        let mut world = self.world.lock().unwrap();
        world.statuses.insert(simulation.id, status);
        world.progresses.insert(simulation.id, progress);
        world.simulations.insert(simulation.id, simulation);
    }

    pub fn set_status(&self, id: SimulationId, status: Status) {
        self.world.lock().unwrap().statuses.insert(id, status);
    }

    pub fn set_progress(&self, id: SimulationId, progress: Progress) {
        self.world.lock().unwrap().progresses.insert(id, progress);
    }

    pub fn fail_listing(&self, error: RemoteError) {
        self.world.lock().unwrap().listing_error = Some(error);
    }

    pub fn fail_subscribe(&self, error: RemoteError) {
        self.world.lock().unwrap().subscribe_error = Some(error);
    }

    /// Status fetches for `id` fail from now on.
    pub fn fail_status(&self, id: SimulationId, error: RemoteError) {
        self.world.lock().unwrap().status_failures.insert(id, error);
    }

    /// Channel handed out by the next `subscribe` call.
    pub fn attach_channel(&self, channel: FakePushChannel) {
        self.world.lock().unwrap().channel = Some(channel);
    }

    /// Slow down single-simulation fetches.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.world.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn missing(id: SimulationId) -> RemoteError {
        RemoteError::api(404, format!(r#"{{"details": "Simulation {} not found"}}"#, id))
    }
}

impl SimulationRemote for FakeSimulationRemote {
    fn fetch_simulations(&self, filter: &SimulationFilter) -> RemoteResult<Vec<Simulation>> {
        self.record(RemoteCall::FetchSimulations);
        let world = self.world.lock().unwrap();
        if let Some(err) = &world.listing_error {
            return Err(err.clone());
        }
        Ok(world
            .simulations
            .values()
            .filter(|sim| filter.matches(sim))
            .cloned()
            .collect())
    }

    fn fetch_simulation(&self, id: SimulationId) -> RemoteResult<Simulation> {
        self.record(RemoteCall::FetchSimulation(id));
        let delay = self.world.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let world = self.world.lock().unwrap();
        world
            .simulations
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::missing(id))
    }

    fn fetch_status(&self, id: SimulationId) -> RemoteResult<Status> {
        self.record(RemoteCall::FetchStatus(id));
        let world = self.world.lock().unwrap();
        if let Some(err) = world.status_failures.get(&id) {
            return Err(err.clone());
        }
        world.statuses.get(&id).cloned().ok_or_else(|| Self::missing(id))
    }

    fn fetch_progress(&self, id: SimulationId) -> RemoteResult<Progress> {
        self.record(RemoteCall::FetchProgress(id));
        let world = self.world.lock().unwrap();
        world.progresses.get(&id).copied().ok_or_else(|| Self::missing(id))
    }

    fn subscribe(&self) -> RemoteResult<Box<dyn PushSubscription>> {
        self.record(RemoteCall::Subscribe);
        let mut world = self.world.lock().unwrap();
        if let Some(err) = &world.subscribe_error {
            return Err(err.clone());
        }
        match world.channel.take() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(RemoteError::transport("no push channel available")),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Fake of the results endpoints. Files are streamed in small chunks.
pub struct FakeResultsRemote {
    items: Vec<DownloadItem>,
    contents: HashMap<String, Vec<u8>>,
    listing_error: Option<RemoteError>,
    stream_failures: HashMap<String, RemoteError>,
    chunk: usize,
    calls: Mutex<Vec<RemoteCall>>,
}

impl Default for FakeResultsRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeResultsRemote {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            contents: HashMap::new(),
            listing_error: None,
            stream_failures: HashMap::new(),
            chunk: 8,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_file(mut self, filename: &str, bytes: Vec<u8>) -> Self {
        self.items.push(DownloadItem {
            filename: filename.to_string(),
            size: bytes.len() as u64,
            url: format!("https://results.invalid/{}", filename),
        });
        self.contents.insert(filename.to_string(), bytes);
        self
    }

    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn failing_listing(mut self, error: RemoteError) -> Self {
        self.listing_error = Some(error);
        self
    }

    /// The transfer of `filename` breaks after its first chunk.
    pub fn failing_stream(mut self, filename: &str, error: RemoteError) -> Self {
        self.stream_failures.insert(filename.to_string(), error);
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResultsRemote for FakeResultsRemote {
    fn fetch_result_downloads(&self, simulation_id: SimulationId) -> RemoteResult<Vec<DownloadItem>> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::FetchResultDownloads(simulation_id));
        match &self.listing_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.items.clone()),
        }
    }

    fn stream_download(
        &self,
        item: &DownloadItem,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> RemoteResult<u64> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::StreamDownload(item.filename.clone()));
        let bytes = self
            .contents
            .get(&item.filename)
            .ok_or_else(|| RemoteError::api(404, "Not found"))?;
        let failure = self.stream_failures.get(&item.filename);
        let mut written = 0u64;
        for chunk in bytes.chunks(self.chunk) {
            sink.write_all(chunk)
                .map_err(|e| RemoteError::transport(e.to_string()))?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
            if let Some(err) = failure {
                return Err(err.clone());
            }
        }
        Ok(written)
    }
}
