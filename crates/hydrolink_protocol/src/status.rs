//! Simulation status state machine.
//!
//! ```text
//! created -> starting -> queued -> initialized <-> postprocessing -> finished
//!                  \         \           \               \
//!                   +---------+-----------+---------------+--> stopped | crashed
//! ```
//!
//! `finished`, `stopped` and `crashed` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a simulation status as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusName {
    Created,
    Starting,
    Queued,
    Initialized,
    Postprocessing,
    Finished,
    Stopped,
    Crashed,
    /// A status this client does not know about.
    Other(String),
}

impl StatusName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Queued => "queued",
            Self::Initialized => "initialized",
            Self::Postprocessing => "postprocessing",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
            Self::Other(name) => name,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Crashed)
    }

    /// Position along the happy path. `initialized` and `postprocessing`
    /// share a rank since the service moves back and forth between them.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Created => Some(0),
            Self::Starting => Some(1),
            Self::Queued => Some(2),
            Self::Initialized | Self::Postprocessing => Some(3),
            Self::Finished => Some(4),
            Self::Stopped | Self::Crashed | Self::Other(_) => None,
        }
    }

    /// Whether moving from `self` to `next` is a valid transition.
    ///
    /// Repeating the current status is accepted. Nothing leaves a terminal
    /// status. Moving backwards along the happy path is rejected as a stale,
    /// out-of-order update.
    pub fn can_transition_to(&self, next: &StatusName) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to >= from,
            _ => true,
        }
    }
}

impl From<String> for StatusName {
    fn from(value: String) -> Self {
        match value.as_str() {
            "created" => Self::Created,
            "starting" => Self::Starting,
            "queued" => Self::Queued,
            "initialized" => Self::Initialized,
            "postprocessing" => Self::Postprocessing,
            "finished" => Self::Finished,
            "stopped" => Self::Stopped,
            "crashed" => Self::Crashed,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for StatusName {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<StatusName> for String {
    fn from(value: StatusName) -> Self {
        match value {
            StatusName::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StatusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub name: StatusName,
    /// Simulated time at which the status was reached, in seconds.
    #[serde(default)]
    pub time: Option<f64>,
}

impl Status {
    pub fn new(name: impl Into<StatusName>) -> Self {
        Self {
            name: name.into(),
            time: None,
        }
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.name.is_terminal()
    }

    /// Status time with a missing value read as zero.
    pub fn time_or_zero(&self) -> f64 {
        self.time.unwrap_or(0.0)
    }
}
