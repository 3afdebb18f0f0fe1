//! Downloading simulation results.
//!
//! Fetches the list of result files of one simulation and streams them into
//! a directory one after the other. Zip archives are unpacked next to
//! themselves. The first failing transfer aborts the rest.

use crate::events::EventBus;
use hydrolink_protocol::defaults::{DEFAULT_CHUNK_SIZE, NOTHING_TO_DOWNLOAD_MESSAGE};
use hydrolink_protocol::{DownloadItem, DownloadJobId, RemoteError, ResultsRemote, Simulation};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Progress { job: DownloadJobId, percentage: f64 },
    Succeeded { job: DownloadJobId, message: String },
    Failed { job: DownloadJobId, message: String },
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Cannot write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot extract '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Refusing to save result file '{name}' outside the download directory")]
    UnsafeFileName { name: String },
}

impl DownloadError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
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

/// Downloads every result file of one simulation.
pub struct DownloadJobRunner {
    id: DownloadJobId,
    simulation: Simulation,
    directory: PathBuf,
    remote: Arc<dyn ResultsRemote>,
    events: EventBus<DownloadEvent>,
    chunk_size: usize,
}

impl DownloadJobRunner {
    pub fn new(
        simulation: Simulation,
        directory: impl Into<PathBuf>,
        remote: Arc<dyn ResultsRemote>,
        events: EventBus<DownloadEvent>,
    ) -> Self {
        Self {
            id: DownloadJobId::new(),
            simulation,
            directory: directory.into(),
            remote,
            events,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn id(&self) -> &DownloadJobId {
        &self.id
    }

    pub fn spawn(self) -> io::Result<JoinHandle<Result<String, DownloadError>>> {
        thread::Builder::new()
            .name(format!("download-{}", self.simulation.id))
            .spawn(move || self.run())
    }

    /// Download everything. Emits exactly one terminal event.
    pub fn run(self) -> Result<String, DownloadError> {
        info!(
            "Download {} started: results of simulation {} into {}",
            self.id,
            self.simulation.id,
            self.directory.display()
        );
        match self.download_all() {
            Ok(message) => {
                info!("Download {} finished", self.id);
                self.events.publish(DownloadEvent::Succeeded {
                    job: self.id.clone(),
                    message: message.clone(),
                });
                Ok(message)
            }
            Err(err) => {
                match &err {
                    DownloadError::Remote(remote) if remote.is_transport() => {
                        error!("Download {} failed: {}", self.id, err)
                    }
                    _ => warn!("Download {} failed: {}", self.id, err),
                }
                self.events.publish(DownloadEvent::Failed {
                    job: self.id.clone(),
                    message: err.message(),
                });
                Err(err)
            }
        }
    }

    fn download_all(&self) -> Result<String, DownloadError> {
        let items = self.remote.fetch_result_downloads(self.simulation.id)?;
        if items.is_empty() {
            return Ok(NOTHING_TO_DOWNLOAD_MESSAGE.to_string());
        }
        if let Some(item) = items.iter().find(|item| !is_plain_file_name(&item.filename)) {
            return Err(DownloadError::UnsafeFileName {
                name: item.filename.clone(),
            });
        }

        fs::create_dir_all(&self.directory).map_err(|e| DownloadError::io(&self.directory, e))?;
        let total: u64 = items.iter().map(|item| item.size).sum();
        let mut transferred = 0u64;
        self.report(transferred, total);

        for item in &items {
            let path = self.download_one(item, total, &mut transferred)?;
            if item.filename.to_lowercase().ends_with(".zip") {
                let extracted = extract_archive(&path, &self.directory)?;
                debug!("Extracted {} file(s) from {}", extracted, item.filename);
            }
        }

        self.events.publish(DownloadEvent::Progress {
            job: self.id.clone(),
            percentage: 100.0,
        });
        Ok(format!(
            "Downloading results of {} ({}) finished! The files have been saved in the following location: '{}'",
            self.simulation.name,
            self.simulation.id,
            self.directory.display()
        ))
    }

    fn download_one(
        &self,
        item: &DownloadItem,
        total: u64,
        transferred: &mut u64,
    ) -> Result<PathBuf, DownloadError> {
        let path = self.directory.join(&item.filename);
        let file = File::create(&path).map_err(|e| DownloadError::io(&path, e))?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        let mut on_chunk = |bytes: u64| {
            *transferred += bytes;
            self.report(*transferred, total);
        };
        self.remote.stream_download(item, &mut writer, &mut on_chunk)?;
        writer.flush().map_err(|e| DownloadError::io(&path, e))?;
        debug!("Downloaded {} ({} bytes)", item.filename, item.size);
        Ok(path)
    }

    fn report(&self, transferred: u64, total: u64) {
        let percentage = if total == 0 {
            0.0
        } else {
            (transferred as f64 / total as f64 * 100.0).min(100.0)
        };
        self.events.publish(DownloadEvent::Progress {
            job: self.id.clone(),
            percentage,
        });
    }
}

/// A name that joins onto a directory as exactly one regular entry.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Unpack `archive` into `directory`. Returns the number of entries.
fn extract_archive(archive: &Path, directory: &Path) -> Result<usize, DownloadError> {
    let file = File::open(archive).map_err(|e| DownloadError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| DownloadError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    let entries = zip.len();
    zip.extract(directory).map_err(|source| DownloadError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrolink_protocol::SimulationId;
    use hydrolink_test_utils::{FakeResultsRemote, RemoteCall};
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn simulation() -> Simulation {
        Simulation {
            id: SimulationId(77),
            name: "Storm 2026".to_string(),
            threedimodel_id: None,
        }
    }

    fn zipped(name: &str, content: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buffer));
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
            zip.finish().unwrap();
        }
        buffer
    }

    fn run(remote: FakeResultsRemote, dir: &Path) -> (Result<String, DownloadError>, Vec<DownloadEvent>) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let result = DownloadJobRunner::new(simulation(), dir, Arc::new(remote), bus).run();
        (result, rx.try_iter().collect())
    }

    fn percentages(events: &[DownloadEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|event| match event {
                DownloadEvent::Progress { percentage, .. } => Some(*percentage),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_nothing_to_download() {
        let temp = TempDir::new().unwrap();
        let (result, events) = run(FakeResultsRemote::new(), temp.path());

        assert_eq!(result.unwrap(), NOTHING_TO_DOWNLOAD_MESSAGE);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[test]
    fn test_files_are_written_and_progress_reaches_100() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("results");
        let remote = FakeResultsRemote::new()
            .with_file("results_3di.nc", vec![1u8; 20])
            .with_file("log.txt", b"simulation finished".to_vec());

        let (result, events) = run(remote, &target);

        let message = result.unwrap();
        assert!(message.contains("Storm 2026 (77)"));
        assert!(message.contains(&target.display().to_string()));
        assert_eq!(fs::read(target.join("results_3di.nc")).unwrap(), vec![1u8; 20]);
        assert_eq!(
            fs::read_to_string(target.join("log.txt")).unwrap(),
            "simulation finished"
        );

        let progress = percentages(&events);
        assert_eq!(progress[0], 0.0);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progress.last().unwrap(), 100.0);
        assert!(matches!(events.last(), Some(DownloadEvent::Succeeded { .. })));
    }

    #[test]
    fn test_zip_archives_are_extracted() {
        let temp = TempDir::new().unwrap();
        let remote = FakeResultsRemote::new()
            .with_file("gridadmin.zip", zipped("gridadmin.h5", b"grid"));

        let (result, _) = run(remote, temp.path());

        assert!(result.is_ok());
        assert_eq!(fs::read(temp.path().join("gridadmin.h5")).unwrap(), b"grid");
    }

    #[test]
    fn test_transfer_failure_aborts_remaining_files() {
        let temp = TempDir::new().unwrap();
        let remote = FakeResultsRemote::new()
            .with_file("a.nc", vec![0u8; 32])
            .with_file("b.nc", vec![0u8; 32])
            .failing_stream("a.nc", RemoteError::transport("connection reset"));
        let (result, events) = run(remote, temp.path());

        assert!(matches!(result, Err(DownloadError::Remote(_))));
        assert_eq!(
            events.last(),
            Some(&DownloadEvent::Failed {
                job: match &events[0] {
                    DownloadEvent::Progress { job, .. } => job.clone(),
                    other => panic!("unexpected event: {:?}", other),
                },
                message: "Error: connection reset".to_string(),
            })
        );
        assert!(!temp.path().join("b.nc").exists());
    }

    #[test]
    fn test_file_names_cannot_escape_the_directory() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("results");
        let remote = FakeResultsRemote::new()
            .with_file("results_3di.nc", vec![1u8; 8])
            .with_file("../escape.nc", vec![2u8; 8]);
        let remote = Arc::new(remote);
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let result = DownloadJobRunner::new(simulation(), &target, remote.clone(), bus).run();

        assert!(matches!(
            result,
            Err(DownloadError::UnsafeFileName { ref name }) if name == "../escape.nc"
        ));
        assert!(!temp.path().join("escape.nc").exists());
        assert!(!target.join("results_3di.nc").exists());
        assert_eq!(remote.calls(), vec![RemoteCall::FetchResultDownloads(SimulationId(77))]);
        let events: Vec<DownloadEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], DownloadEvent::Failed { .. }));
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("results_3di.nc"));
        assert!(is_plain_file_name("gridadmin.h5"));
        assert!(!is_plain_file_name("../results_3di.nc"));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name("nested/results_3di.nc"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
    }

    #[test]
    fn test_listing_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let remote = FakeResultsRemote::new()
            .failing_listing(RemoteError::api(404, r#"{"details": "Simulation not found"}"#));
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let remote = Arc::new(remote);
        let result =
            DownloadJobRunner::new(simulation(), temp.path(), remote.clone(), bus).run();

        assert!(result.is_err());
        assert_eq!(remote.calls(), vec![RemoteCall::FetchResultDownloads(SimulationId(77))]);
        match rx.recv().unwrap() {
            DownloadEvent::Failed { message, .. } => assert_eq!(message, "Error: Simulation not found"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
