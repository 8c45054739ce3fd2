use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cancel::Generation;
use super::context::SessionContext;
use super::event::{LogEntry, LogSource, ServerEvent, TransportEvent};
use super::feed::LogFeed;
use super::scheduler::Commit;
use super::state::{transition, AgentEvent, AgentState};
use super::telemetry::event::{EndReason, TelemetryEvent};
use super::telemetry::metrics::TelemetrySnapshot;
use super::telemetry::Telemetry;
use crate::audio::capture::{MicStream, Microphone};
use crate::audio::encoder::CaptureEncoder;
use crate::audio::playback::{AudioSink, Speaker};
use crate::config::{Config, DecodeFailurePolicy};
use crate::error::{AgentError, AgentResult};
use crate::transport::{Connection, LiveTransport};

/// Devices and session acquired by one connect attempt.
struct Established {
    sink: Arc<dyn AudioSink>,
    mic: MicStream,
    connection: Connection,
}

impl Established {
    async fn release(self) {
        self.sink.close();
        drop(self.mic);
        self.connection.session.close().await;
    }
}

enum Message {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Progress { generation: u64, text: String },
    Established { generation: u64, result: AgentResult<Established> },
    DecodeFailed { generation: u64, detail: String },
    SendFailed { generation: u64, error: AgentError },
}

enum Step {
    Message(Option<Message>),
    Inbound(Option<TransportEvent>),
}

/// The Session Orchestrator.
///
/// A single task owns the state machine, the session context and every
/// handler. Commands, connect/decode completions and inbound transport events
/// are consumed by one loop, so no two handlers ever run concurrently.
pub struct Orchestrator {
    config: Arc<Config>,
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,
    transport: Arc<dyn LiveTransport>,

    rx: mpsc::UnboundedReceiver<Message>,
    tx: mpsc::WeakUnboundedSender<Message>,

    state_tx: watch::Sender<AgentState>,
    volume: Arc<watch::Sender<f32>>,
    feed: LogFeed,
    telemetry: Telemetry,

    generation: Generation,
    ctx: Option<SessionContext>,
    connecting: Option<JoinHandle<()>>,
    requested_at: Option<Instant>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        microphone: Arc<dyn Microphone>,
        speaker: Arc<dyn Speaker>,
        transport: Arc<dyn LiveTransport>,
    ) -> (Self, AgentHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(AgentState::Disconnected);
        let (volume_tx, volume_rx) = watch::channel(0.0f32);
        let feed = LogFeed::new();
        let telemetry = Telemetry::new();

        let orchestrator = Self {
            config: Arc::new(config),
            microphone,
            speaker,
            transport,
            rx,
            tx: tx.downgrade(),
            state_tx,
            volume: Arc::new(volume_tx),
            feed: feed.clone(),
            telemetry: telemetry.clone(),
            generation: Generation::new(),
            ctx: None,
            connecting: None,
            requested_at: None,
        };
        let handle = AgentHandle {
            tx,
            state_rx,
            volume_rx,
            feed,
            telemetry,
        };
        (orchestrator, handle)
    }

    /// Builds the orchestrator and runs it on the current tokio runtime.
    /// It stops once every handle is dropped.
    pub fn spawn(
        config: Config,
        microphone: Arc<dyn Microphone>,
        speaker: Arc<dyn Speaker>,
        transport: Arc<dyn LiveTransport>,
    ) -> AgentHandle {
        let (orchestrator, handle) = Self::new(config, microphone, speaker, transport);
        tokio::spawn(orchestrator.run());
        handle
    }

    pub async fn run(mut self) {
        info!("Session orchestrator started");

        loop {
            let step = tokio::select! {
                biased;
                msg = self.rx.recv() => Step::Message(msg),
                event = next_inbound(&mut self.ctx) => Step::Inbound(event),
            };

            match step {
                Step::Message(Some(msg)) => self.handle_message(msg).await,
                Step::Message(None) => break,
                Step::Inbound(Some(event)) => self.handle_transport(event).await,
                Step::Inbound(None) => {
                    // Stream ended without a Closed event.
                    self.log("Session closed");
                    self.teardown(AgentEvent::TransportClosed, EndReason::RemoteClosed)
                        .await;
                }
            }
        }

        self.teardown(AgentEvent::DisconnectRequested, EndReason::Requested)
            .await;
        info!("Session orchestrator stopped");
    }

    fn state(&self) -> AgentState {
        *self.state_tx.borrow()
    }

    fn apply(&mut self, event: AgentEvent) -> AgentState {
        let from = self.state();
        let to = transition(from, event);
        if from != to {
            info!("State {:?} -> {:?} ({:?})", from, to, event);
            self.state_tx.send_replace(to);
            self.telemetry
                .record(TelemetryEvent::StateTransition { from, to });
        }
        to
    }

    fn log(&self, text: impl Into<String>) {
        self.feed.push(LogEntry::system(text));
    }

    async fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::Connect => self.connect(),
            Message::Disconnect(done) => {
                self.teardown(AgentEvent::DisconnectRequested, EndReason::Requested)
                    .await;
                let _ = done.send(());
            }
            Message::Progress { generation, text } => {
                if self.generation.is_current(generation) {
                    self.log(text);
                }
            }
            Message::Established { generation, result } => {
                self.established(generation, result).await
            }
            Message::DecodeFailed { generation, detail } => {
                if !self.generation.is_current(generation) {
                    return;
                }
                error!("Audio decode failed: {}", detail);
                self.log(format!("Audio decode failed: {}", detail));
                match self.config.pipeline.decode_failure {
                    DecodeFailurePolicy::EndSession => {
                        self.teardown(AgentEvent::Failed, EndReason::DecodeError)
                            .await
                    }
                    DecodeFailurePolicy::SkipChunk => debug!("Skipping undecodable chunk"),
                }
            }
            Message::SendFailed { generation, error } => {
                if !self.generation.is_current(generation) {
                    return;
                }
                self.log(format!("Error occurred: {}", error_detail(&error)));
                self.teardown(AgentEvent::Failed, EndReason::TransportError)
                    .await;
            }
        }
    }

    fn connect(&mut self) {
        if self.state().is_active() {
            debug!("Connect ignored in {:?}", self.state());
            return;
        }

        let generation = self.generation.bump();
        self.requested_at = Some(Instant::now());
        self.apply(AgentEvent::ConnectRequested);
        info!("Connect requested (generation {})", generation);
        self.log("Initializing audio...");

        let config = Arc::clone(&self.config);
        let microphone = Arc::clone(&self.microphone);
        let speaker = Arc::clone(&self.speaker);
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();

        self.connecting = Some(tokio::spawn(async move {
            let progress = tx.clone();
            let result = establish(config, microphone, speaker, transport, move |text| {
                if let Some(tx) = progress.upgrade() {
                    let _ = tx.send(Message::Progress {
                        generation,
                        text: text.to_string(),
                    });
                }
            })
            .await;

            match tx.upgrade() {
                Some(tx) => {
                    if let Err(mpsc::error::SendError(Message::Established {
                        result: Ok(established),
                        ..
                    })) = tx.send(Message::Established { generation, result })
                    {
                        established.release().await;
                    }
                }
                None => {
                    if let Ok(established) = result {
                        established.release().await;
                    }
                }
            }
        }));
    }

    async fn established(&mut self, generation: u64, result: AgentResult<Established>) {
        if !self.generation.is_current(generation) {
            debug!("Discarding stale connect result (generation {})", generation);
            if let Ok(established) = result {
                tokio::spawn(established.release());
            }
            return;
        }
        self.connecting = None;

        match result {
            Ok(established) => {
                let requested_at = self.requested_at.take().unwrap_or_else(Instant::now);
                self.ctx = Some(SessionContext::new(
                    generation,
                    established.sink,
                    established.mic,
                    established.connection,
                    self.config.pipeline.outbound_capacity,
                    requested_at,
                ));
                debug!("Devices acquired, awaiting session open");
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.log(format!("Failed to connect: {}", e));
                self.teardown(AgentEvent::Failed, EndReason::ConnectFailed)
                    .await;
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.opened().await,
            TransportEvent::Server(event) => self.handle_server(event).await,
        }
    }

    async fn opened(&mut self) {
        let generation = self.generation.current();
        let tx = self.tx.clone();
        let encoder = CaptureEncoder::new(
            self.config.audio.input_sample_rate,
            self.config.audio.volume_scale,
        );
        let frame_size = self.config.audio.frame_size;
        let volume = Arc::clone(&self.volume);
        let telemetry = self.telemetry.clone();

        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        if ctx.is_opened() {
            debug!("Duplicate open acknowledgment ignored");
            return;
        }

        let latency = ctx.mark_opened();
        let started = ctx.start_streaming(encoder, frame_size, volume, telemetry, move |error| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Message::SendFailed { generation, error });
            }
        });

        match started {
            Ok(()) => {
                info!("Session open after {:?}", latency);
                self.telemetry.record(TelemetryEvent::SessionOpened {
                    connect_latency_ms: latency.as_millis() as u64,
                });
                self.log("Connected!");
                self.apply(AgentEvent::SessionOpened);
            }
            Err(e) => {
                // Capture without a running worker is not a session.
                warn!("Capture failed to start: {}", e);
                self.log(format!("Failed to connect: {}", e));
                self.teardown(AgentEvent::Failed, EndReason::ConnectFailed)
                    .await;
            }
        }
    }

    async fn handle_server(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::InputTranscriptDelta(delta) => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.transcript.append_input(&delta);
                }
            }
            ServerEvent::OutputTranscriptDelta(delta) => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.transcript.append_output(&delta);
                }
            }
            ServerEvent::TurnComplete => {
                let Some(ctx) = self.ctx.as_mut() else {
                    return;
                };
                let entries = ctx.transcript.flush();
                let user_entry = entries.iter().any(|e| e.source == LogSource::User);
                let agent_entry = entries.iter().any(|e| e.source == LogSource::Agent);
                for entry in entries {
                    self.feed.push(entry);
                }
                self.telemetry.record(TelemetryEvent::TurnCompleted {
                    user_entry,
                    agent_entry,
                });
                self.apply(AgentEvent::TurnComplete);
            }
            ServerEvent::AudioChunk {
                data,
                sample_rate,
                channels,
            } => {
                if !self.ctx.as_ref().is_some_and(|ctx| ctx.is_opened()) {
                    debug!("Audio before the session opened, dropped");
                    return;
                }
                self.apply(AgentEvent::AudioReceived);
                self.schedule_chunk(data, sample_rate, channels);
            }
            ServerEvent::Interrupted => {
                // Barge-in only means something while the agent is speaking.
                if self.state() != AgentState::Speaking {
                    debug!("Interrupted ignored in {:?}", self.state());
                    return;
                }
                let Some(ctx) = self.ctx.as_mut() else {
                    return;
                };
                let cut = ctx.scheduler.interrupt();
                ctx.transcript.discard_output();
                self.log("Interrupted");
                self.telemetry
                    .record(TelemetryEvent::Interruption { buffers_cut: cut });
                self.apply(AgentEvent::Interrupted);
            }
            ServerEvent::Closed => {
                info!("Remote closed the session");
                self.log("Session closed");
                self.teardown(AgentEvent::TransportClosed, EndReason::RemoteClosed)
                    .await;
            }
            ServerEvent::Error(detail) => {
                error!("Session error: {}", detail);
                self.log(format!("Error occurred: {}", detail));
                self.teardown(AgentEvent::Failed, EndReason::TransportError)
                    .await;
            }
        }
    }

    /// Reserves the playback slot now (receipt order) and decodes off-loop.
    fn schedule_chunk(&mut self, data: Vec<u8>, sample_rate: u32, channels: u16) {
        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        let task = ctx.scheduler.schedule_chunk(data, sample_rate, channels);
        let scheduler = Arc::clone(&ctx.scheduler);
        let telemetry = self.telemetry.clone();
        let tx = self.tx.clone();
        let generation = self.generation.current();

        tokio::spawn(async move {
            let outcome = task
                .await
                .unwrap_or_else(|e| Err(AgentError::DecodeFailure(e.to_string())));
            match outcome {
                Ok(Commit::Placed(buffers)) => {
                    let now = scheduler.sink().now();
                    for buffer in buffers {
                        telemetry.record(TelemetryEvent::ChunkScheduled {
                            lead_ms: seconds_to_ms(buffer.start_at - now),
                            duration_ms: seconds_to_ms(buffer.duration),
                        });
                    }
                }
                Ok(Commit::Stale) => telemetry.record(TelemetryEvent::ChunkDiscarded),
                Err(e) => {
                    telemetry.record(TelemetryEvent::DecodeFailed);
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Message::DecodeFailed {
                            generation,
                            detail: error_detail(&e),
                        });
                    }
                }
            }
        });
    }

    /// Total, idempotent teardown back to `Disconnected`.
    async fn teardown(&mut self, event: AgentEvent, reason: EndReason) {
        let had_session = self.state().is_active() || self.ctx.is_some();
        self.generation.bump();

        // An attempt still in flight finishes on its own; its result is
        // stale by now and gets released instead of adopted.
        if self.connecting.take().is_some() {
            debug!("Detaching in-flight connect attempt");
        }
        self.requested_at = None;
        if let Some(ctx) = self.ctx.take() {
            ctx.close().await;
        }

        self.apply(event);
        self.volume.send_replace(0.0);

        if had_session {
            info!("Session ended: {:?}", reason);
            self.telemetry
                .record(TelemetryEvent::SessionEnded { reason });
        }
    }
}

async fn next_inbound(ctx: &mut Option<SessionContext>) -> Option<TransportEvent> {
    match ctx {
        Some(ctx) => ctx.next_event().await,
        None => std::future::pending().await,
    }
}

/// Connect's suspension points, in order: speaker, microphone, remote session.
/// Whatever was acquired is released again if a later step fails.
async fn establish<P>(
    config: Arc<Config>,
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,
    transport: Arc<dyn LiveTransport>,
    progress: P,
) -> AgentResult<Established>
where
    P: Fn(&str) + Send,
{
    let output_rate = config.audio.output_sample_rate;
    let sink = tokio::task::spawn_blocking(move || speaker.open(output_rate))
        .await
        .map_err(|e| AgentError::DeviceUnavailable(e.to_string()))??;

    let input_rate = config.audio.input_sample_rate;
    let mic = match tokio::task::spawn_blocking(move || microphone.open(input_rate)).await {
        Ok(Ok(mic)) => mic,
        Ok(Err(e)) => {
            sink.close();
            return Err(e);
        }
        Err(e) => {
            sink.close();
            return Err(AgentError::DeviceUnavailable(e.to_string()));
        }
    };
    info!("Microphone open at {}Hz", mic.sample_rate);

    progress("Connecting to live session...");
    match transport.connect(&config.session).await {
        Ok(connection) => Ok(Established {
            sink,
            mic,
            connection,
        }),
        Err(e) => {
            sink.close();
            Err(e)
        }
    }
}

/// Inner text of an error, for log lines that carry their own prefix.
fn error_detail(error: &AgentError) -> String {
    match error {
        AgentError::DeviceUnavailable(d)
        | AgentError::TransportFailure(d)
        | AgentError::DecodeFailure(d)
        | AgentError::Config(d) => d.clone(),
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Observer and control surface handed to the presentation layer.
///
/// Exposes exactly three observable values (state, log feed, volume) plus
/// telemetry. Cloning is cheap; the session ends when the last clone drops.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<Message>,
    state_rx: watch::Receiver<AgentState>,
    volume_rx: watch::Receiver<f32>,
    feed: LogFeed,
    telemetry: Telemetry,
}

impl AgentHandle {
    /// Ignored unless `Disconnected`.
    pub fn connect(&self) {
        let _ = self.tx.send(Message::Connect);
    }

    /// Returns once the session is fully torn down. Safe from any state.
    pub async fn disconnect(&self) {
        let (done, ack) = oneshot::channel();
        if self.tx.send(Message::Disconnect(done)).is_ok() {
            let _ = ack.await;
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state_rx.clone()
    }

    /// `true` once `target` is observed, `false` on timeout.
    pub async fn wait_for_state(&self, target: AgentState, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub fn volume(&self) -> f32 {
        *self.volume_rx.borrow()
    }

    pub fn watch_volume(&self) -> watch::Receiver<f32> {
        self.volume_rx.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.feed.snapshot()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.feed.subscribe()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn recent_telemetry(&self, n: usize) -> Vec<TelemetryEvent> {
        self.telemetry.recent(n)
    }
}
