//! Simulation records and the rules for updating them.

use hydrolink_protocol::{Progress, Simulation, SimulationId, Status, StatusName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// What the monitor knows about one simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationRecord {
    pub simulation: Simulation,
    pub status: Status,
    pub progress: Progress,
}

impl SimulationRecord {
    pub fn new(simulation: Simulation, status: Status, progress: Progress) -> Self {
        Self {
            simulation,
            status,
            progress,
        }
    }

    pub fn id(&self) -> SimulationId {
        self.simulation.id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Why an update was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Discard {
    UnknownSimulation(SimulationId),
    /// The record is terminal and the update would change it.
    Terminal { id: SimulationId, status: StatusName },
    /// An out-of-order status update moving backwards.
    Stale {
        id: SimulationId,
        from: StatusName,
        to: StatusName,
    },
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSimulation(id) => write!(f, "simulation {} is not tracked", id),
            Self::Terminal { id, status } => {
                write!(f, "simulation {} is already {}", id, status)
            }
            Self::Stale { id, from, to } => {
                write!(f, "simulation {}: stale transition {} -> {}", id, from, to)
            }
        }
    }
}

/// All tracked simulations, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    records: BTreeMap<SimulationId, SimulationRecord>,
}

impl ProgressSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SimulationId) -> Option<&SimulationRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<SimulationId> {
        self.records.keys().copied().collect()
    }

    /// Insert or overwrite a freshly fetched record.
    ///
    /// A terminal record only accepts a repeat of its own status, and keeps
    /// its percentage when it does.
    pub fn upsert(&mut self, mut record: SimulationRecord) -> Result<(), Discard> {
        if let Some(existing) = self.records.get(&record.id()) {
            if existing.is_terminal() {
                if existing.status.name != record.status.name {
                    return Err(Discard::Terminal {
                        id: record.id(),
                        status: existing.status.name.clone(),
                    });
                }
                record.progress.percentage = existing.progress.percentage;
            }
        }
        self.records.insert(record.id(), record);
        Ok(())
    }

    /// Update only the percentage of a tracked, non-terminal simulation.
    pub fn apply_progress(&mut self, id: SimulationId, percentage: f64) -> Result<(), Discard> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(Discard::UnknownSimulation(id))?;
        if record.is_terminal() {
            return Err(Discard::Terminal {
                id,
                status: record.status.name.clone(),
            });
        }
        record.progress.percentage = percentage.clamp(0.0, 100.0);
        Ok(())
    }

    /// Update only the status name of a tracked simulation.
    pub fn apply_status(&mut self, id: SimulationId, name: StatusName) -> Result<(), Discard> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(Discard::UnknownSimulation(id))?;
        let current = &record.status.name;
        if !current.can_transition_to(&name) {
            return Err(if current.is_terminal() {
                Discard::Terminal {
                    id,
                    status: current.clone(),
                }
            } else {
                Discard::Stale {
                    id,
                    from: current.clone(),
                    to: name,
                }
            });
        }
        record.status.name = name;
        Ok(())
    }
}
