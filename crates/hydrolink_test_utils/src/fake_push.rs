//! In-memory push channel.

use hydrolink_protocol::{PushSubscription, RemoteError, RemoteResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Frame = RemoteResult<String>;
type CloseHook = Box<dyn Fn() + Send>;

struct Shared {
    closed: AtomicBool,
    close_calls: AtomicUsize,
    on_close: Mutex<Option<CloseHook>>,
}

/// Receiving end handed to the monitor through `SimulationRemote::subscribe`.
pub struct FakePushChannel {
    rx: Mutex<Receiver<Frame>>,
    shared: Arc<Shared>,
}

/// Test side of a [`FakePushChannel`]: feeds frames and inspects closing.
#[derive(Clone)]
pub struct FakePushFeed {
    tx: Sender<Frame>,
    shared: Arc<Shared>,
}

impl FakePushChannel {
    pub fn new() -> (Self, FakePushFeed) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            on_close: Mutex::new(None),
        });
        (
            Self {
                rx: Mutex::new(rx),
                shared: Arc::clone(&shared),
            },
            FakePushFeed { tx, shared },
        )
    }
}

impl PushSubscription for FakePushChannel {
    fn next_message(&self, timeout: Duration) -> RemoteResult<Option<String>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::transport("push channel closed"));
        }
        let rx = self
            .rx
            .lock()
            .map_err(|_| RemoteError::transport("push channel lock poisoned"))?;
        match rx.recv_timeout(timeout) {
            Ok(frame) => frame.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(RemoteError::transport("push channel disconnected"))
            }
        }
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.shared.on_close.lock().unwrap().as_ref() {
            hook();
        }
    }
}

impl FakePushFeed {
    /// Queue a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(Ok(text.into()));
    }

    /// Queue a JSON frame `{"type": kind, "data": data}`.
    pub fn send_json(&self, kind: &str, data: serde_json::Value) {
        self.send_text(serde_json::json!({ "type": kind, "data": data }).to_string());
    }

    pub fn send_progress(&self, simulation_id: u64, progress: f64) {
        self.send_json(
            "progress",
            serde_json::json!({ "simulation_id": simulation_id, "progress": progress }),
        );
    }

    pub fn send_status(&self, simulation_id: u64, status: &str) {
        self.send_json(
            "status",
            serde_json::json!({ "simulation_id": simulation_id, "status": status }),
        );
    }

    /// Make the channel report a broken connection.
    pub fn send_error(&self, message: &str) {
        let _ = self.tx.send(Err(RemoteError::transport(message)));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    /// Run `hook` inside every `close` call on the channel.
    pub fn on_close(&self, hook: impl Fn() + Send + 'static) {
        *self.shared.on_close.lock().unwrap() = Some(Box::new(hook));
    }
}
