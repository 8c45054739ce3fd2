use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Connection, LiveSession, LiveTransport};
use crate::audio::encoder::AudioFrame;
use crate::config::SessionConfig;
use crate::error::{AgentError, AgentResult};
use crate::kernel::event::{ServerEvent, TransportEvent};

const LOOPBACK_CHANNEL_CAPACITY: usize = 64;

/// Plays the microphone back as agent audio. Useful for checking the full
/// capture -> playback path without a remote service.
///
/// Every `frames_per_turn` frames the loopback closes the turn with a short
/// agent transcript.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    frames_per_turn: u64,
}

impl LoopbackTransport {
    pub fn new(frames_per_turn: u64) -> Self {
        Self {
            frames_per_turn: frames_per_turn.max(1),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl LiveTransport for LoopbackTransport {
    async fn connect(&self, config: &SessionConfig) -> AgentResult<Connection> {
        info!("Loopback session for model '{}' (voice '{}')", config.model, config.voice);
        let (tx, rx) = mpsc::channel(LOOPBACK_CHANNEL_CAPACITY);
        tx.send(TransportEvent::Opened)
            .await
            .map_err(|e| AgentError::TransportFailure(e.to_string()))?;

        Ok(Connection {
            session: Arc::new(LoopbackSession {
                tx: Mutex::new(Some(tx)),
                frames: AtomicU64::new(0),
                frames_per_turn: self.frames_per_turn,
            }),
            events: rx,
        })
    }
}

struct LoopbackSession {
    tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    frames: AtomicU64,
    frames_per_turn: u64,
}

impl LoopbackSession {
    fn emit(&self, tx: &mpsc::Sender<TransportEvent>, event: ServerEvent) {
        // A slow consumer loses echo, never blocks the sender.
        if tx.try_send(event.into()).is_err() {
            debug!("Loopback channel full, event dropped");
        }
    }
}

#[async_trait]
impl LiveSession for LoopbackSession {
    async fn send(&self, frame: AudioFrame) -> AgentResult<()> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AgentError::TransportFailure("loopback session closed".into()))?;

        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        self.emit(
            &tx,
            ServerEvent::AudioChunk {
                data: frame.pcm,
                sample_rate: frame.sample_rate,
                channels: 1,
            },
        );
        if n % self.frames_per_turn == 0 {
            self.emit(&tx, ServerEvent::OutputTranscriptDelta(format!("echoed {} frames", n)));
            self.emit(&tx, ServerEvent::TurnComplete);
        }
        Ok(())
    }

    async fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
