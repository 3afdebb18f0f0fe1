//! Hydrolink sentinel: one consistent view of all running simulations.
//!
//! The monitor seeds a [`ProgressSnapshot`] from a bulk REST query, then keeps
//! it current from the push channel. Every update re-emits the whole snapshot.

pub mod monitor;
pub mod snapshot;

pub use monitor::{MonitorError, MonitorEvent, MonitorHandle, SimulationMonitor, StopOutcome};
pub use snapshot::{Discard, ProgressSnapshot, SimulationRecord};
