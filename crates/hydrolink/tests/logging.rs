//! Log routing of a whole session. Kept in its own test binary because it
//! installs the global subscriber and points HYDROLINK_HOME at a temp dir.

use hydrolink::protocol::{Revision, RevisionId, Schematisation, SchematisationId, UploadSpecification};
use hydrolink::{init_logging, load_default_config, Remotes, Session};
use hydrolink_test_utils::{FakeResultsRemote, FakeSchematisationRemote, FakeSimulationRemote};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_session_logs_under_hydrolink_home() {
    let home = TempDir::new().unwrap();
    std::env::set_var("HYDROLINK_HOME", home.path());
    std::env::remove_var("RUST_LOG");
    std::fs::write(
        home.path().join("config.toml"),
        r#"
        [polling]
        task_check_interval_ms = 0

        [logging]
        console = "off"
        max_files = 2
        "#,
    )
    .unwrap();

    let config = load_default_config().unwrap();
    let log_file = init_logging(&config, "qgis plugin").unwrap();
    assert_eq!(log_file, home.path().join("logs").join("qgis_plugin.log"));
    assert!(init_logging(&config, "again").is_err());

    let revision = Revision {
        id: RevisionId(1),
        number: 1,
        rasters: Vec::new(),
    };
    let remotes = Remotes {
        schematisations: Arc::new(FakeSchematisationRemote::new(revision.clone())),
        simulations: Arc::new(FakeSimulationRemote::new()),
        results: Arc::new(FakeResultsRemote::new()),
    };
    let mut session = Session::start(config, remotes).unwrap();
    let id = session
        .upload(UploadSpecification {
            schematisation: Schematisation {
                id: SchematisationId(3),
                name: "Polder".to_string(),
            },
            revision,
            files: BTreeMap::new(),
            commit_message: String::new(),
            create_revision: false,
            upload_only: true,
        })
        .unwrap();
    session
        .registry()
        .wait_for(id, Duration::from_secs(5))
        .unwrap();
    session.shutdown();

    let contents = std::fs::read_to_string(&log_file).unwrap();
    assert!(contents.contains("Upload registry started"));
    assert!(contents.contains("Nothing to upload or process"));
    assert!(contents.contains("Session closed"));
}
