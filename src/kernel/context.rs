use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::TransportEvent;
use super::scheduler::PlaybackScheduler;
use super::telemetry::event::TelemetryEvent;
use super::telemetry::Telemetry;
use super::transcript::TranscriptAggregator;
use crate::audio::capture::MicStream;
use crate::audio::encoder::CaptureEncoder;
use crate::audio::playback::AudioSink;
use crate::audio::processing::CaptureWorker;
use crate::error::{AgentError, AgentResult};
use crate::transport::queue::OutboundQueue;
use crate::transport::{Connection, LiveSession};

/// Everything one live session owns.
///
/// Created when connect succeeds, consumed by [`SessionContext::close`]. Nothing
/// outside the orchestrator holds a reference into it, so once it is closed no
/// device handle can outlive the session.
pub struct SessionContext {
    generation: u64,
    pub(crate) scheduler: Arc<PlaybackScheduler>,
    session: Arc<dyn LiveSession>,
    events: mpsc::Receiver<TransportEvent>,
    pub(crate) transcript: TranscriptAggregator,
    outbound: OutboundQueue,
    mic: Option<MicStream>,
    cancel: CancellationToken,
    capture: Option<std::thread::JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
    requested_at: Instant,
    opened: bool,
}

impl SessionContext {
    pub fn new(
        generation: u64,
        sink: Arc<dyn AudioSink>,
        mic: MicStream,
        connection: Connection,
        outbound_capacity: usize,
        requested_at: Instant,
    ) -> Self {
        Self {
            generation,
            scheduler: Arc::new(PlaybackScheduler::new(sink)),
            session: connection.session,
            events: connection.events,
            transcript: TranscriptAggregator::new(),
            outbound: OutboundQueue::new(outbound_capacity),
            mic: Some(mic),
            cancel: CancellationToken::new(),
            capture: None,
            sender: None,
            requested_at,
            opened: false,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub(crate) async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Marks the session open and returns the connect latency.
    pub(crate) fn mark_opened(&mut self) -> Duration {
        self.opened = true;
        self.requested_at.elapsed()
    }

    /// Starts the capture thread and the sender task. Calling it again is a no-op.
    ///
    /// `on_send_failure` runs at most once, from the sender task, when the
    /// transport rejects a frame.
    pub(crate) fn start_streaming<F>(
        &mut self,
        encoder: CaptureEncoder,
        frame_size: usize,
        volume: Arc<watch::Sender<f32>>,
        telemetry: Telemetry,
        on_send_failure: F,
    ) -> AgentResult<()>
    where
        F: FnOnce(AgentError) + Send + 'static,
    {
        let Some(mic) = self.mic.take() else {
            return Ok(());
        };

        let worker = CaptureWorker::new(
            mic,
            encoder,
            frame_size,
            self.outbound.clone(),
            volume,
            self.cancel.child_token(),
        );
        let capture = worker
            .spawn()
            .map_err(|e| AgentError::DeviceUnavailable(format!("capture thread: {}", e)))?;
        self.capture = Some(capture);

        let queue = self.outbound.clone();
        let session = Arc::clone(&self.session);
        self.sender = Some(tokio::spawn(async move {
            let mut reported_drops = 0;
            while let Some(frame) = queue.pop().await {
                let dropped = queue.dropped();
                if dropped > reported_drops {
                    telemetry.record(TelemetryEvent::FramesDropped {
                        count: dropped - reported_drops,
                    });
                    reported_drops = dropped;
                }

                if let Err(e) = session.send(frame).await {
                    warn!("Outbound send failed: {}", e);
                    on_send_failure(e);
                    return;
                }
                telemetry.record(TelemetryEvent::FrameSent);
            }
            debug!("Outbound sender drained");
        }));

        info!("Streaming started (generation {})", self.generation);
        Ok(())
    }

    /// Releases everything: capture stops, the microphone and output device
    /// are released, all playback stops, and the remote session is closed.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.outbound.close();
        if let Some(sender) = self.sender.take() {
            sender.abort();
        }

        if let Some(capture) = self.capture.take() {
            let joined = tokio::task::spawn_blocking(move || capture.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Capture thread did not stop cleanly");
            }
        }
        // Never streamed: the microphone is still here.
        drop(self.mic.take());

        self.scheduler.shutdown();
        self.session.close().await;
        self.events.close();
        info!("Session context closed (generation {})", self.generation);
    }
}
