//! Canonical default values shared across the orchestration layer.

/// Sleep between polls of a long-running remote task (milliseconds).
pub const DEFAULT_TASK_CHECK_INTERVAL_MS: u64 = 2_500;
/// Attempts made to find a background task before giving up.
pub const DEFAULT_TASK_CHECK_RETRIES: u32 = 4;
/// How long the monitor blocks on the push channel before re-checking its stop flag.
pub const DEFAULT_MESSAGE_WAIT_MS: u64 = 250;
/// Bounded wait for a graceful monitor shutdown.
pub const DEFAULT_MONITOR_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
/// Download buffer size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Name of the background check started by a revision commit.
pub const MODEL_CHECKER_TASK: &str = "modelchecker";

/// Sub-jobs the service runs when building a model out of a revision.
pub const MODEL_BUILD_SUBJOBS: [&str; 6] = [
    "make_gridadmin",
    "make_tables",
    "make_aggregations",
    "make_cog",
    "make_geojson",
    "make_simulation_templates",
];

/// Raster type whose legacy twin must be removed alongside it.
pub const DEM_RASTER_TYPE: &str = "dem_file";
pub const LEGACY_DEM_RASTER_TYPE: &str = "dem_raw_file";

pub const NOTHING_TO_UPLOAD_MESSAGE: &str = "Nothing to upload or process";
pub const NOTHING_TO_DOWNLOAD_MESSAGE: &str = "Nothing to download!";
pub const MONITOR_STOPPED_MESSAGE: &str = "Checking running simulation stopped.";
pub const TASK_NOT_STARTED_MESSAGE: &str = "task was not started properly";
/// Pseudo task name reported once every task of a job has finished.
pub const DONE_TASK_NAME: &str = "DONE";
