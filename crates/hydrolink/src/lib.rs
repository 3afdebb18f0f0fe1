//! Hydrolink: remote-operation orchestration for schematisations and
//! cloud simulations.
//!
//! A [`Session`] wires the pieces together: the upload registry (one owner
//! thread, one worker thread per upload), the simulation progress monitor and
//! result downloads, all configured from `~/.hydrolink/config.toml`. Hosts
//! route the emitted `tracing` events with [`init_logging`].

pub mod config;
pub mod registry;
pub mod session;

pub use config::{init_logging, load_config, load_default_config, ConfigError, HydrolinkConfig};
pub use registry::{RegistryHandle, UploadRegistry, UploadRow};
pub use session::{Remotes, Session};

pub use hydrolink_protocol as protocol;
pub use hydrolink_sentinel as sentinel;
pub use hydrolink_worker as worker;
