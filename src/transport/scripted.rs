use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{Connection, LiveSession, LiveTransport};
use crate::audio::encoder::AudioFrame;
use crate::config::SessionConfig;
use crate::error::{AgentError, AgentResult};
use crate::kernel::event::TransportEvent;

const SCRIPT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct ScriptState {
    events_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    sent: Mutex<Vec<AudioFrame>>,
    configs: Mutex<Vec<SessionConfig>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    connect_error: Mutex<Option<String>>,
    fail_sends: AtomicBool,
    auto_open: AtomicBool,
}

/// In-process transport driven by the caller.
///
/// Whatever the test (or demo) pushes with [`ScriptedTransport::push`] is
/// delivered to the orchestrator as if it came from the remote service, and
/// every frame the orchestrator sends is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<ScriptState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `Opened` as soon as a connection is made.
    pub fn auto_open(self) -> Self {
        self.state.auto_open.store(true, Ordering::SeqCst);
        self
    }

    /// Make every `connect` fail with `reason`.
    pub fn failing(self, reason: impl Into<String>) -> Self {
        *self.state.connect_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
        self
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Returns `false` when no session is connected (or it was closed).
    pub async fn push(&self, event: impl Into<TransportEvent>) -> bool {
        let tx = self.state.events_tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match tx {
            Some(tx) => tx.send(event.into()).await.is_ok(),
            None => false,
        }
    }

    /// Ends the inbound stream without a `Closed` event, like a dropped socket.
    pub fn drop_connection(&self) {
        self.state.events_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .events_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn sent_frames(&self) -> Vec<AudioFrame> {
        self.state.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn configs(&self) -> Vec<SessionConfig> {
        self.state.configs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn connect(&self, config: &SessionConfig) -> AgentResult<Connection> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state
            .configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(config.clone());

        let refusal = self
            .state
            .connect_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(reason) = refusal {
            return Err(AgentError::TransportFailure(reason));
        }

        let (tx, rx) = mpsc::channel(SCRIPT_CHANNEL_CAPACITY);
        if self.state.auto_open.load(Ordering::SeqCst) {
            let _ = tx.try_send(TransportEvent::Opened);
        }
        *self.state.events_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        Ok(Connection {
            session: Arc::new(ScriptedSession {
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

struct ScriptedSession {
    state: Arc<ScriptState>,
}

#[async_trait]
impl LiveSession for ScriptedSession {
    async fn send(&self, frame: AudioFrame) -> AgentResult<()> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(AgentError::TransportFailure("send rejected".into()));
        }
        self.state.sent.lock().unwrap_or_else(|e| e.into_inner()).push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.events_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
