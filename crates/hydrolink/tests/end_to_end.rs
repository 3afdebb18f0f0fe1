//! Session-level scenarios: uploads through the registry, the monitor and
//! result downloads, all against scripted remotes.

use hydrolink::protocol::{
    FileRole, FileState, ModelId, Progress, RasterId, RemoteFile, Revision, RevisionId,
    RevisionRaster, Schematisation, SchematisationId, SelectedFile, Simulation, SimulationFilter,
    SimulationId, Status, StatusName, UploadSpecification,
};
use hydrolink::sentinel::{MonitorEvent, StopOutcome};
use hydrolink::worker::{DownloadEvent, JobStatus};
use hydrolink::{HydrolinkConfig, Remotes, Session};
use hydrolink_test_utils::{
    FakePushChannel, FakeResultsRemote, FakeSchematisationRemote, FakeSimulationRemote, RemoteCall,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> HydrolinkConfig {
    let mut config = HydrolinkConfig::default();
    config.polling.task_check_interval_ms = 0;
    config.monitor.message_wait_ms = 20;
    config
}

fn simulation(id: u64) -> Simulation {
    Simulation {
        id: SimulationId(id),
        name: format!("storm {}", id),
        threedimodel_id: Some(ModelId(10)),
    }
}

fn dem_revision() -> Revision {
    Revision {
        id: RevisionId(21),
        number: 4,
        rasters: vec![RevisionRaster {
            id: RasterId(301),
            raster_type: "dem_file".to_string(),
        }],
    }
}

struct World {
    schematisations: Arc<FakeSchematisationRemote>,
    simulations: Arc<FakeSimulationRemote>,
    results: Arc<FakeResultsRemote>,
}

impl World {
    fn new(results: FakeResultsRemote) -> Self {
        Self {
            schematisations: Arc::new(FakeSchematisationRemote::new(dem_revision())),
            simulations: Arc::new(FakeSimulationRemote::new()),
            results: Arc::new(results),
        }
    }

    fn session(&self) -> Session {
        let remotes = Remotes {
            schematisations: self.schematisations.clone(),
            simulations: self.simulations.clone(),
            results: self.results.clone(),
        };
        Session::start(test_config(), remotes).unwrap()
    }
}

#[test]
fn test_upload_only_changed_raster() {
    let temp = TempDir::new().unwrap();
    let dem = temp.path().join("dem.tif");
    std::fs::write(&dem, b"raster bytes").unwrap();

    let world = World::new(FakeResultsRemote::new());
    let session = world.session();

    let mut files = BTreeMap::new();
    files.insert(
        FileRole::raster("dem_file"),
        SelectedFile::new(FileState::ChangesDetected, Some(dem)).with_remote_name("dem.tif"),
    );
    let spec = UploadSpecification {
        schematisation: Schematisation {
            id: SchematisationId(5),
            name: "Polder".to_string(),
        },
        revision: dem_revision(),
        files,
        commit_message: String::new(),
        create_revision: false,
        upload_only: true,
    };

    let id = session.upload(spec).unwrap();
    let row = session.registry().wait_for(id, WAIT).unwrap();

    assert_eq!(row.status(), JobStatus::Success);
    assert_eq!(
        row.job.tasks,
        vec!["DELETE RASTER (dem_file)", "UPLOAD RASTER (dem_file)"]
    );
    assert_eq!(row.job.job_progress, 100.0);
    assert_eq!(
        row.job.message.as_deref(),
        Some("Schematisation 'Polder' (revision: 4) files uploaded")
    );
    assert_eq!(
        row.job
            .log
            .iter()
            .map(|entry| entry.message.as_str())
            .collect::<Vec<_>>(),
        vec![
            "DELETE RASTER (dem_file) ==> done",
            "UPLOAD RASTER (dem_file) ==> done"
        ]
    );

    assert_eq!(
        world.schematisations.calls(),
        vec![
            RemoteCall::DeleteFile(RemoteFile::Raster {
                id: RasterId(301),
                raster_type: "dem_file".to_string(),
            }),
            RemoteCall::UploadFile(FileRole::raster("dem_file")),
        ]
    );
}

#[test]
fn test_missing_local_file_fails_the_row() {
    let temp = TempDir::new().unwrap();
    let world = World::new(FakeResultsRemote::new());
    let session = world.session();

    let mut files = BTreeMap::new();
    files.insert(
        FileRole::Spatialite,
        SelectedFile::new(FileState::New, Some(temp.path().join("gone.sqlite"))),
    );
    let spec = UploadSpecification {
        schematisation: Schematisation {
            id: SchematisationId(5),
            name: "Polder".to_string(),
        },
        revision: dem_revision(),
        files,
        commit_message: "first".to_string(),
        create_revision: false,
        upload_only: false,
    };

    let id = session.upload(spec).unwrap();
    let row = session.registry().wait_for(id, WAIT).unwrap();

    assert_eq!(row.status(), JobStatus::Failure);
    assert!(row.finished_at.is_some());
    let last = row.job.log.last().unwrap();
    assert!(!last.success);
    assert!(last
        .message
        .starts_with("UPLOAD SPATIALITE ==> failed\nError: Cannot read local file"));
    assert!(world.schematisations.calls().is_empty());
}

#[test]
fn test_monitor_through_session() {
    let world = World::new(FakeResultsRemote::new());
    world.simulations.add_simulation(
        simulation(1),
        Status::new("initialized").with_time(60.0),
        Progress::new(25.0, 60.0),
    );
    let (channel, feed) = FakePushChannel::new();
    world.simulations.attach_channel(channel);

    let mut session = world.session();
    let events = session.start_monitor(SimulationFilter::all()).unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        MonitorEvent::Snapshot(snapshot) => {
            assert_eq!(snapshot.ids(), vec![SimulationId(1)]);
        }
        other => panic!("expected snapshot, got {:?}", other),
    }

    feed.send_progress(1, 55.0);
    match events.recv_timeout(WAIT).unwrap() {
        MonitorEvent::Snapshot(snapshot) => {
            let record = snapshot.get(SimulationId(1)).unwrap();
            assert_eq!(record.status.name, StatusName::Initialized);
            assert_eq!(record.progress.percentage, 55.0);
        }
        other => panic!("expected snapshot, got {:?}", other),
    }

    assert_eq!(session.stop_monitor(), Some(StopOutcome::Graceful));
    assert_eq!(session.stop_monitor(), None);
    assert!(feed.is_closed());
}

#[test]
fn test_download_through_session() {
    let temp = TempDir::new().unwrap();
    let world = World::new(
        FakeResultsRemote::new()
            .with_file("results_3di.nc", vec![7u8; 24])
            .with_file("log.txt", vec![1u8; 8]),
    );
    let mut session = world.session();
    let events = session.subscribe_downloads();

    let id = session
        .download_results(simulation(3), temp.path().join("results"))
        .unwrap();

    let mut percentages = Vec::new();
    let message = loop {
        match events.recv_timeout(WAIT).unwrap() {
            DownloadEvent::Progress { job, percentage } => {
                assert_eq!(job, id);
                percentages.push(percentage);
            }
            DownloadEvent::Succeeded { job, message } => {
                assert_eq!(job, id);
                break message;
            }
            DownloadEvent::Failed { message, .. } => panic!("download failed: {}", message),
        }
    };

    assert_eq!(percentages.first(), Some(&0.0));
    assert_eq!(percentages.last(), Some(&100.0));
    assert!(percentages.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(message.starts_with("Downloading results of storm 3 (3) finished!"));
    assert_eq!(
        std::fs::read(temp.path().join("results").join("results_3di.nc")).unwrap(),
        vec![7u8; 24]
    );
}

#[test]
fn test_shutdown_is_idempotent() {
    let world = World::new(FakeResultsRemote::new());
    let mut session = world.session();
    let registry = session.registry().clone();

    session.shutdown();
    session.shutdown();
    assert!(registry.rows().is_err());
}
