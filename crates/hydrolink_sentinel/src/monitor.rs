//! Simulation progress monitor.
//!
//! # Lifecycle
//!
//! 1. Bulk fetch: list simulations (optionally for one model) and fetch the
//!    status and progress of each. Failure ends the monitor with
//!    [`MonitorEvent::Failed`] before the push channel is opened.
//! 2. Listen: open the push channel and fold every frame into the snapshot,
//!    re-emitting the full snapshot after each one.
//! 3. Stop: the cancellation token is checked before every frame is applied.
//!    The worker closes the channel, then emits [`MonitorEvent::Stopped`].
//!
//! # Forced stop
//!
//! [`MonitorHandle::stop_with_timeout`] waits a bounded time for the worker.
//! If it is stuck in a remote call, the handle closes the channel from the
//! caller's side, then emits the final `Stopped` event itself and mutes the bus.
//! The worker thread is then detached; nothing it does afterwards is visible.

use crate::snapshot::{ProgressSnapshot, SimulationRecord};
use hydrolink_protocol::defaults::{
    DEFAULT_MESSAGE_WAIT_MS, DEFAULT_MONITOR_SHUTDOWN_TIMEOUT_MS, MONITOR_STOPPED_MESSAGE,
};
use hydrolink_protocol::{
    Progress, PushMessage, PushSubscription, RemoteError, RemoteResult, SimulationFilter,
    SimulationId, SimulationRemote, Status, StatusName,
};
use hydrolink_worker::{CancellationToken, EventBus};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Events emitted by the monitor, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    Snapshot(ProgressSnapshot),
    Stopped(String),
    Failed(String),
}

impl MonitorEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped(_) | Self::Failed(_))
    }
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker noticed the request and shut down by itself.
    Graceful,
    /// The worker did not finish in time and was detached.
    Forced,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{}", .0.message())]
    BulkFetch(RemoteError),

    #[error("Websocket error: {0}")]
    Channel(RemoteError),

    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type SubscriptionSlot = Arc<Mutex<Option<Arc<dyn PushSubscription>>>>;

/// Configured, not yet running monitor.
pub struct SimulationMonitor {
    remote: Arc<dyn SimulationRemote>,
    filter: SimulationFilter,
    message_wait: Duration,
    events: EventBus<MonitorEvent>,
}

impl SimulationMonitor {
    pub fn new(remote: Arc<dyn SimulationRemote>, filter: SimulationFilter) -> Self {
        Self {
            remote,
            filter,
            message_wait: Duration::from_millis(DEFAULT_MESSAGE_WAIT_MS),
            events: EventBus::new(),
        }
    }

    /// How long one wait on the push channel may block before the stop
    /// flag is checked again.
    pub fn with_message_wait(mut self, wait: Duration) -> Self {
        self.message_wait = wait;
        self
    }

    /// Subscribe before starting to receive the initial snapshot.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Spawn the worker thread.
    pub fn start(self) -> Result<MonitorHandle, MonitorError> {
        let token = CancellationToken::new();
        let subscription: SubscriptionSlot = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = mpsc::channel();

        let worker = MonitorWorker {
            remote: self.remote,
            filter: self.filter,
            message_wait: self.message_wait,
            events: self.events.clone(),
            token: token.clone(),
            subscription: Arc::clone(&subscription),
            done: done_tx,
        };
        let thread = thread::Builder::new()
            .name("simulation-monitor".to_string())
            .spawn(move || worker.run())?;

        info!("Simulation monitor started");
        Ok(MonitorHandle {
            token,
            events: self.events,
            subscription,
            done: done_rx,
            thread: Some(thread),
        })
    }
}

/// Owner handle of a running monitor.
pub struct MonitorHandle {
    token: CancellationToken,
    events: EventBus<MonitorEvent>,
    subscription: SubscriptionSlot,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop with the default shutdown timeout.
    pub fn stop(self) -> StopOutcome {
        self.stop_with_timeout(Duration::from_millis(DEFAULT_MONITOR_SHUTDOWN_TIMEOUT_MS))
    }

    /// Request a stop and wait up to `timeout` for the worker to exit.
    ///
    /// After this returns no further event is emitted.
    pub fn stop_with_timeout(mut self, timeout: Duration) -> StopOutcome {
        self.token.cancel();
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        error!("Simulation monitor thread panicked");
                    }
                }
                self.events.mute();
                info!("Simulation monitor stopped");
                StopOutcome::Graceful
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Simulation monitor did not stop within {:?}, detaching it",
                    timeout
                );
                close_subscription(&self.subscription);
                self.events
                    .publish_last(MonitorEvent::Stopped(MONITOR_STOPPED_MESSAGE.to_string()));
                self.thread.take();
                StopOutcome::Forced
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn close_subscription(slot: &SubscriptionSlot) {
    let taken = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(subscription) = taken {
        subscription.close();
    }
}

struct MonitorWorker {
    remote: Arc<dyn SimulationRemote>,
    filter: SimulationFilter,
    message_wait: Duration,
    events: EventBus<MonitorEvent>,
    token: CancellationToken,
    subscription: SubscriptionSlot,
    done: Sender<()>,
}

impl MonitorWorker {
    // The channel is closed before the final event; the final event goes
    // through `publish_last` so it cannot race a forced stop.
    fn run(self) {
        let result = self.listen();
        close_subscription(&self.subscription);
        match result {
            Ok(()) => {
                info!("Simulation monitor worker stopped");
                self.events
                    .publish_last(MonitorEvent::Stopped(MONITOR_STOPPED_MESSAGE.to_string()));
            }
            Err(err) => {
                error!("Simulation monitor failed: {}", err);
                self.events.publish_last(MonitorEvent::Failed(err.to_string()));
            }
        }
        let _ = self.done.send(());
    }

    fn listen(&self) -> Result<(), MonitorError> {
        let mut snapshot = self.bulk_fetch().map_err(MonitorError::BulkFetch)?;
        if self.token.is_cancelled() {
            return Ok(());
        }
        info!("Tracking {} simulation(s)", snapshot.len());
        self.events.publish(MonitorEvent::Snapshot(snapshot.clone()));

        let subscription: Arc<dyn PushSubscription> =
            Arc::from(self.remote.subscribe().map_err(MonitorError::Channel)?);
        match self.subscription.lock() {
            Ok(mut slot) => *slot = Some(Arc::clone(&subscription)),
            Err(_) => warn!("Subscription slot lock poisoned"),
        }

        while !self.token.is_cancelled() {
            let frame = match subscription.next_message(self.message_wait) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(_) if self.token.is_cancelled() => break,
                Err(err) => return Err(MonitorError::Channel(err)),
            };
            if self.token.is_cancelled() {
                debug!("Stop requested, dropping pending frame");
                break;
            }
            if self.handle_frame(&frame, &mut snapshot) {
                self.events.publish(MonitorEvent::Snapshot(snapshot.clone()));
            }
        }
        Ok(())
    }

    /// Returns whether the frame was understood.
    fn handle_frame(&self, frame: &str, snapshot: &mut ProgressSnapshot) -> bool {
        let message = match PushMessage::parse(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!("Discarding push frame: {}", err);
                return false;
            }
        };
        debug!("Push message: {}", message.kind());

        let outcome = match message {
            PushMessage::BulkRefresh { payloads } => {
                for id in payloads.into_keys() {
                    if let Err(err) = self.refresh(id, snapshot) {
                        warn!("Failed to refresh simulation {}: {}", id, err);
                    }
                }
                Ok(())
            }
            PushMessage::ProgressDelta {
                simulation_id,
                percentage,
            } => snapshot.apply_progress(simulation_id, percentage),
            PushMessage::StatusDelta {
                simulation_id,
                status,
            } => snapshot.apply_status(simulation_id, status),
            PushMessage::Unhandled { kind } => {
                debug!("Ignoring push message of type '{}'", kind);
                return false;
            }
        };
        if let Err(discard) = outcome {
            debug!("Discarded update: {}", discard);
        }
        true
    }

    fn refresh(&self, id: SimulationId, snapshot: &mut ProgressSnapshot) -> RemoteResult<()> {
        let simulation = self.remote.fetch_simulation(id)?;
        let status = self.remote.fetch_status(id)?;
        let progress = derive_progress(self.remote.as_ref(), id, &status)?;
        if let Err(discard) = snapshot.upsert(SimulationRecord::new(simulation, status, progress)) {
            debug!("Discarded refresh: {}", discard);
        }
        Ok(())
    }

    fn bulk_fetch(&self) -> RemoteResult<ProgressSnapshot> {
        let simulations = self.remote.fetch_simulations(&self.filter)?;
        let mut snapshot = ProgressSnapshot::new();
        for simulation in simulations.into_iter().filter(|s| self.filter.matches(s)) {
            let status = self.remote.fetch_status(simulation.id)?;
            let progress = derive_progress(self.remote.as_ref(), simulation.id, &status)?;
            if let Err(discard) = snapshot.upsert(SimulationRecord::new(simulation, status, progress)) {
                debug!("Discarded initial record: {}", discard);
            }
        }
        Ok(snapshot)
    }
}

/// Progress implied by a status: only an initialized simulation that has
/// started simulating has a meaningful live percentage.
fn derive_progress(
    remote: &dyn SimulationRemote,
    id: SimulationId,
    status: &Status,
) -> RemoteResult<Progress> {
    let time = status.time_or_zero();
    match status.name {
        StatusName::Initialized if time != 0.0 => remote.fetch_progress(id),
        StatusName::Postprocessing | StatusName::Finished => Ok(Progress::complete(time)),
        _ => Ok(Progress::new(0.0, time)),
    }
}
