//! A running session against one remote service.
//!
//! Owns the upload registry thread, at most one simulation monitor and the
//! download jobs started through it.

use crate::config::HydrolinkConfig;
use crate::registry::{RegistryHandle, UploadRegistry};
use anyhow::{Context, Result};
use hydrolink_protocol::{
    DownloadJobId, ResultsRemote, SchematisationRemote, Simulation, SimulationFilter,
    SimulationRemote, UploadRowId, UploadSpecification,
};
use hydrolink_sentinel::{MonitorEvent, MonitorHandle, SimulationMonitor, StopOutcome};
use hydrolink_worker::{DownloadError, DownloadEvent, DownloadJobRunner, EventBus};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Remote endpoints used by a session.
#[derive(Clone)]
pub struct Remotes {
    pub schematisations: Arc<dyn SchematisationRemote>,
    pub simulations: Arc<dyn SimulationRemote>,
    pub results: Arc<dyn ResultsRemote>,
}

pub struct Session {
    config: HydrolinkConfig,
    remotes: Remotes,
    registry: RegistryHandle,
    registry_thread: Option<JoinHandle<()>>,
    monitor: Option<MonitorHandle>,
    downloads: EventBus<DownloadEvent>,
    download_threads: Vec<JoinHandle<Result<String, DownloadError>>>,
}

impl Session {
    /// Start the upload registry. The monitor is started separately.
    pub fn start(config: HydrolinkConfig, remotes: Remotes) -> Result<Self> {
        let (registry, handle) =
            UploadRegistry::new(Arc::clone(&remotes.schematisations), config.poll_config());
        let registry_thread = registry
            .spawn()
            .context("Failed to spawn upload registry thread")?;
        info!("Session started");

        Ok(Self {
            config,
            remotes,
            registry: handle,
            registry_thread: Some(registry_thread),
            monitor: None,
            downloads: EventBus::new(),
            download_threads: Vec::new(),
        })
    }

    pub fn config(&self) -> &HydrolinkConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn upload(&self, spec: UploadSpecification) -> Result<UploadRowId> {
        self.registry.submit(spec)
    }

    /// Start monitoring simulations, replacing any running monitor.
    ///
    /// The returned receiver gets the initial snapshot.
    pub fn start_monitor(&mut self, filter: SimulationFilter) -> Result<Receiver<MonitorEvent>> {
        self.stop_monitor();
        let monitor = SimulationMonitor::new(Arc::clone(&self.remotes.simulations), filter)
            .with_message_wait(self.config.message_wait());
        let events = monitor.subscribe();
        let handle = monitor
            .start()
            .context("Failed to start simulation monitor")?;
        self.monitor = Some(handle);
        Ok(events)
    }

    /// Additional listener on the running monitor.
    pub fn subscribe_monitor(&self) -> Option<Receiver<MonitorEvent>> {
        self.monitor.as_ref().map(MonitorHandle::subscribe)
    }

    /// Stop the running monitor, if any.
    pub fn stop_monitor(&mut self) -> Option<StopOutcome> {
        let handle = self.monitor.take()?;
        let outcome = handle.stop_with_timeout(self.config.shutdown_timeout());
        if outcome == StopOutcome::Forced {
            warn!("Simulation monitor had to be detached");
        }
        Some(outcome)
    }

    /// Receive the events of every download started by this session.
    pub fn subscribe_downloads(&self) -> Receiver<DownloadEvent> {
        self.downloads.subscribe()
    }

    /// Download all results of `simulation` into `directory` on a new thread.
    pub fn download_results(
        &mut self,
        simulation: Simulation,
        directory: impl Into<PathBuf>,
    ) -> Result<DownloadJobId> {
        let runner = DownloadJobRunner::new(
            simulation,
            directory,
            Arc::clone(&self.remotes.results),
            self.downloads.clone(),
        )
        .with_chunk_size(self.config.downloads.chunk_size);
        let id = runner.id().clone();

        self.download_threads.retain(|thread| !thread.is_finished());
        let thread = runner.spawn().context("Failed to spawn download thread")?;
        self.download_threads.push(thread);
        Ok(id)
    }

    /// Stop the monitor and the registry. Running jobs are left to finish.
    pub fn shutdown(&mut self) {
        self.stop_monitor();

        let Some(thread) = self.registry_thread.take() else {
            return;
        };
        if let Err(err) = self.registry.shutdown() {
            warn!("Upload registry already gone: {}", err);
        }
        if thread.join().is_err() {
            error!("Upload registry thread panicked");
        }

        self.download_threads.retain(|thread| !thread.is_finished());
        if !self.download_threads.is_empty() {
            info!(
                "Session closed with {} download(s) still running",
                self.download_threads.len()
            );
        }
        info!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
