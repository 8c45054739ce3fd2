//! The remote streaming session, seen only through its interface.
//!
//! Protocol framing, authentication and model selection live behind
//! [`LiveTransport`]; the core only sends frames and consumes
//! [`TransportEvent`]s in order.

pub mod loopback;
pub mod queue;
pub mod scripted;
pub mod wire;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::encoder::AudioFrame;
use crate::config::SessionConfig;
use crate::error::AgentResult;
use crate::kernel::event::TransportEvent;

/// Outbound half of an open session.
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send(&self, frame: AudioFrame) -> AgentResult<()>;

    /// Idempotent. After this no further events are delivered.
    async fn close(&self);
}

/// An established connection: the send half plus the ordered inbound stream.
///
/// The stream yields `TransportEvent::Opened` once the remote side has
/// acknowledged the session; the stream ending counts as a close.
pub struct Connection {
    pub session: Arc<dyn LiveSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, config: &SessionConfig) -> AgentResult<Connection>;
}
