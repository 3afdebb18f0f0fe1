//! Log routing for processes embedding Hydrolink.
//!
//! The orchestration crates only emit `tracing` events. A host calls
//! [`init_logging`] once; events then go to `<logs>/<app>.log`, which rolls
//! over into `<app>.log.1`, `<app>.log.2`, ... once it reaches its size limit,
//! and optionally to stderr.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str =
    "hydrolink=info,hydrolink_worker=info,hydrolink_sentinel=info";
pub const DEFAULT_MAX_LOG_FILES: usize = 5;
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// What reaches stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutput {
    /// Same events as the log file.
    Full,
    /// Warnings and errors only; for hosts that own the terminal.
    WarningsOnly,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Base name of the log file.
    pub app_name: String,
    pub log_dir: PathBuf,
    /// `EnvFilter` directives. `RUST_LOG` wins over this when set.
    pub filter: Option<String>,
    pub console: ConsoleOutput,
    /// Files kept, the live one included.
    pub max_files: usize,
    pub max_file_size: u64,
}

impl LogConfig {
    /// Defaults for `app_name`, logging under [`logs_dir`].
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            log_dir: logs_dir(),
            filter: None,
            console: ConsoleOutput::WarningsOnly,
            max_files: DEFAULT_MAX_LOG_FILES,
            max_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
        }
    }

    /// Path of the live log file.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", sanitize_name(&self.app_name)))
    }

    fn file_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
        })
    }
}

/// Install the global subscriber. Returns the live log file.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<PathBuf> {
    let sink = RollingSink::open(config).with_context(|| {
        format!("Failed to open log file in {}", config.log_dir.display())
    })?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(sink)
        .with_ansi(false)
        .with_filter(config.file_filter());
    let console_filter = match config.console {
        ConsoleOutput::Full => Some(config.file_filter()),
        ConsoleOutput::WarningsOnly => Some(EnvFilter::new("warn")),
        ConsoleOutput::Off => None,
    };
    let console_layer = console_filter.map(|filter| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_filter(filter)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(config.log_file())
}

/// Hydrolink home directory.
///
/// Priority:
/// 1) HYDROLINK_HOME
/// 2) ~/.hydrolink
/// 3) ./.hydrolink
pub fn hydrolink_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("HYDROLINK_HOME") {
        return PathBuf::from(override_path);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".hydrolink"),
        None => PathBuf::from(".").join(".hydrolink"),
    }
}

/// Default log directory: ~/.hydrolink/logs
pub fn logs_dir() -> PathBuf {
    hydrolink_home().join("logs")
}

/// Size-bounded log file with numbered generations.
///
/// Generation 0 is the live file; higher generations are older.
struct RollingLog {
    dir: PathBuf,
    name: String,
    generations: usize,
    max_size: u64,
    file: File,
    written: u64,
}

impl RollingLog {
    fn open(dir: PathBuf, name: &str, generations: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let name = sanitize_name(name);
        let live = dir.join(format!("{}.log", name));
        let file = OpenOptions::new().create(true).append(true).open(&live)?;
        let written = file.metadata()?.len();
        let mut log = Self {
            dir,
            name,
            generations: generations.max(1),
            max_size,
            file,
            written,
        };
        if log.written > log.max_size {
            log.roll()?;
        }
        Ok(log)
    }

    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.name)),
            n => self.dir.join(format!("{}.log.{}", self.name, n)),
        }
    }

    // Drop the oldest generation, age the rest by one, start a fresh live file.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.path(self.generations - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for generation in (0..self.generations - 1).rev() {
            let from = self.path(generation);
            if from.exists() {
                fs::rename(&from, self.path(generation + 1))?;
            }
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path(0))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Cloneable handle on the rolling log; every `fmt` writer shares one file.
#[derive(Clone)]
struct RollingSink(Arc<Mutex<RollingLog>>);

impl RollingSink {
    fn open(config: &LogConfig) -> io::Result<Self> {
        let log = RollingLog::open(
            config.log_dir.clone(),
            &config.app_name,
            config.max_files,
            config.max_file_size,
        )?;
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut RollingLog) -> io::Result<T>) -> io::Result<T> {
        let mut log = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        f(&mut log)
    }
}

impl Write for RollingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_log(|log| log.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_log(|log| log.flush())
    }
}

impl<'a> MakeWriter<'a> for RollingSink {
    type Writer = RollingSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hydrolink qgis/plugin"), "hydrolink_qgis_plugin");
    }

    #[test]
    fn test_log_file_location() {
        let mut config = LogConfig::new("qgis plugin");
        config.log_dir = PathBuf::from("/tmp/hydrolink-logs");
        assert_eq!(
            config.log_file(),
            PathBuf::from("/tmp/hydrolink-logs/qgis_plugin.log")
        );
        assert_eq!(config.max_files, DEFAULT_MAX_LOG_FILES);
    }

    #[test]
    fn test_rolling_keeps_bounded_history() {
        let temp = TempDir::new().unwrap();
        let mut log = RollingLog::open(temp.path().to_path_buf(), "uploads", 3, 16).unwrap();

        for _ in 0..10 {
            log.write_all(b"0123456789").unwrap();
        }
        log.flush().unwrap();

        assert!(temp.path().join("uploads.log").exists());
        assert!(temp.path().join("uploads.log.1").exists());
        assert!(temp.path().join("uploads.log.2").exists());
        assert!(!temp.path().join("uploads.log.3").exists());
    }

    #[test]
    fn test_single_generation_truncates() {
        let temp = TempDir::new().unwrap();
        let mut log = RollingLog::open(temp.path().to_path_buf(), "monitor", 1, 8).unwrap();

        log.write_all(b"12345678").unwrap();
        log.write_all(b"abcd").unwrap();
        log.flush().unwrap();

        let contents = fs::read_to_string(temp.path().join("monitor.log")).unwrap();
        assert_eq!(contents, "abcd");
    }

    #[test]
    fn test_oversized_file_is_rolled_on_open() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("session.log"), b"0123456789abcdef").unwrap();

        let log = RollingLog::open(temp.path().to_path_buf(), "session", 2, 8).unwrap();
        assert_eq!(log.written, 0);
        assert_eq!(
            fs::read(temp.path().join("session.log.1")).unwrap(),
            b"0123456789abcdef"
        );
    }

    #[test]
    fn test_shared_sink_writes_one_file() {
        let temp = TempDir::new().unwrap();
        let mut config = LogConfig::new("shared");
        config.log_dir = temp.path().to_path_buf();

        let sink = RollingSink::open(&config).unwrap();
        sink.make_writer().write_all(b"first\n").unwrap();
        sink.make_writer().write_all(b"second\n").unwrap();

        assert_eq!(
            fs::read_to_string(config.log_file()).unwrap(),
            "first\nsecond\n"
        );
    }
}
