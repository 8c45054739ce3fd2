use std::sync::Arc;
use std::time::{Duration, Instant};

use duplex::audio::capture::Microphone;
use duplex::audio::mock::{DeniedMicrophone, ManualSpeaker, ScriptedMicrophone};
use duplex::config::DecodeFailurePolicy;
use duplex::kernel::telemetry::event::{EndReason, TelemetryEvent};
use duplex::transport::scripted::ScriptedTransport;
use duplex::{AgentHandle, AgentState, Config, LogSource, Orchestrator, ServerEvent, TransportEvent};

const WAIT: Duration = Duration::from_secs(3);
const FRAME: usize = 160;

fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.frame_size = FRAME;
    config
}

fn chunk(seconds: f64) -> ServerEvent {
    ServerEvent::AudioChunk {
        data: vec![0u8; (24_000.0 * seconds) as usize * 2],
        sample_rate: 24_000,
        channels: 1,
    }
}

struct Rig {
    agent: AgentHandle,
    transport: ScriptedTransport,
    speaker: ManualSpeaker,
    mic: ScriptedMicrophone,
}

fn rig_with(config: Config, transport: ScriptedTransport) -> Rig {
    // Ten frames of steady signal at rms 0.1.
    let mic = ScriptedMicrophone::new(vec![0.1; FRAME * 10], 16_000);
    let speaker = ManualSpeaker::new();
    let agent = Orchestrator::spawn(
        config,
        Arc::new(mic.clone()),
        Arc::new(speaker.clone()),
        Arc::new(transport.clone()),
    );
    Rig {
        agent,
        transport,
        speaker,
        mic,
    }
}

fn rig() -> Rig {
    rig_with(test_config(), ScriptedTransport::new().auto_open())
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

fn texts(agent: &AgentHandle, source: LogSource) -> Vec<String> {
    agent
        .logs()
        .into_iter()
        .filter(|e| e.source == source)
        .map(|e| e.text)
        .collect()
}

fn has_log(agent: &AgentHandle, prefix: &str) -> bool {
    texts(agent, LogSource::System).iter().any(|t| t.starts_with(prefix))
}

async fn connected(rig: &Rig) {
    rig.agent.connect();
    assert!(
        rig.agent.wait_for_state(AgentState::Listening, WAIT).await,
        "never reached Listening: {:?}",
        rig.agent.logs()
    );
}

#[tokio::test]
async fn test_connect_reaches_listening_and_streams_microphone() {
    let rig = rig();
    connected(&rig).await;

    assert_eq!(
        texts(&rig.agent, LogSource::System),
        vec!["Initializing audio...", "Connecting to live session...", "Connected!"]
    );
    assert_eq!(rig.transport.configs()[0].voice, "Fenrir");

    assert!(wait_until(|| rig.transport.sent_frames().len() == 10).await);
    let frames = rig.transport.sent_frames();
    assert!(frames.iter().all(|f| f.samples() == FRAME && f.sample_rate == 16_000));

    // rms 0.1 * 500 = 50.
    assert!(wait_until(|| (rig.agent.volume() - 50.0).abs() < 0.1).await);
    assert_eq!(rig.mic.lease.held(), 1);

    let stats = rig.agent.telemetry();
    println!("Telemetry after connect: {:?}", stats);
    assert_eq!(stats.sessions_opened, 1);
    assert!(wait_until(|| rig.agent.telemetry().frames_sent == 10).await);
}

#[tokio::test]
async fn test_turn_flow_speaks_logs_and_returns_to_listening() {
    let rig = rig();
    connected(&rig).await;
    rig.speaker.sink.set_now(1.5);

    rig.transport.push(ServerEvent::OutputTranscriptDelta("Hi".into())).await;
    rig.transport.push(chunk(0.1)).await;
    assert!(rig.agent.wait_for_state(AgentState::Speaking, WAIT).await);
    assert!(wait_until(|| rig.speaker.sink.started().len() == 1).await);

    rig.transport.push(ServerEvent::TurnComplete).await;
    assert!(rig.agent.wait_for_state(AgentState::Listening, WAIT).await);
    assert!(wait_until(|| !texts(&rig.agent, LogSource::Agent).is_empty()).await);

    assert_eq!(texts(&rig.agent, LogSource::Agent), vec!["Hi"]);
    assert!(texts(&rig.agent, LogSource::User).is_empty());

    let started = rig.speaker.sink.started();
    assert_eq!(started[0].start_at, 1.5);
    assert_eq!(started[0].duration, 0.1);

    let path: Vec<AgentState> = rig
        .agent
        .recent_telemetry(100)
        .into_iter()
        .filter_map(|e| match e {
            TelemetryEvent::StateTransition { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        path,
        vec![
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Speaking,
            AgentState::Listening
        ]
    );
    assert_eq!(rig.agent.telemetry().turns_completed, 1);
}

#[tokio::test]
async fn test_consecutive_chunks_play_back_to_back() {
    let rig = rig();
    connected(&rig).await;

    for seconds in [0.25, 0.5, 0.25] {
        rig.transport.push(chunk(seconds)).await;
    }
    assert!(wait_until(|| rig.speaker.sink.started().len() == 3).await);

    let starts: Vec<f64> = rig.speaker.sink.started().iter().map(|v| v.start_at).collect();
    assert_eq!(starts, vec![0.0, 0.25, 0.75]);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_releases_everything() {
    let rig = rig();

    // Never connected.
    rig.agent.disconnect().await;
    assert_eq!(rig.agent.state(), AgentState::Disconnected);

    connected(&rig).await;
    rig.transport.push(chunk(0.5)).await;
    assert!(wait_until(|| rig.speaker.sink.live() == 1).await);

    rig.agent.disconnect().await;
    rig.agent.disconnect().await;

    assert_eq!(rig.agent.state(), AgentState::Disconnected);
    assert_eq!(rig.agent.volume(), 0.0);
    assert_eq!(rig.mic.lease.held(), 0);
    assert!(rig.speaker.sink.is_closed());
    assert_eq!(rig.speaker.sink.live(), 0);
    assert_eq!(rig.transport.close_count(), 1);
    assert!(!rig.transport.is_connected());

    let ended = rig.agent.telemetry().sessions_ended;
    assert_eq!(ended.get(&EndReason::Requested), Some(&1));
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let rig = rig();
    connected(&rig).await;
    rig.agent.disconnect().await;
    connected(&rig).await;

    assert_eq!(rig.speaker.opens(), 2);
    assert_eq!(rig.transport.connect_count(), 2);
    assert_eq!(rig.mic.lease.held(), 1);
}

#[tokio::test]
async fn test_second_connect_is_ignored_while_active() {
    let rig = rig();
    connected(&rig).await;
    rig.agent.connect();
    rig.agent.disconnect().await;
    assert_eq!(rig.transport.connect_count(), 1);
}

#[tokio::test]
async fn test_denied_microphone_reports_and_stays_disconnected() {
    let speaker = ManualSpeaker::new();
    let transport = ScriptedTransport::new().auto_open();
    let mic: Arc<dyn Microphone> = Arc::new(DeniedMicrophone::new("permission denied"));
    let agent = Orchestrator::spawn(
        test_config(),
        mic,
        Arc::new(speaker.clone()),
        Arc::new(transport.clone()),
    );

    agent.connect();
    assert!(wait_until(|| has_log(&agent, "Failed to connect:")).await);
    assert!(agent.wait_for_state(AgentState::Disconnected, WAIT).await);

    let failure = texts(&agent, LogSource::System)
        .into_iter()
        .find(|t| t.starts_with("Failed to connect:"))
        .unwrap();
    assert!(failure.contains("permission denied"), "{}", failure);
    assert_eq!(transport.connect_count(), 0);
    // The speaker opened first and was released again.
    assert!(speaker.sink.is_closed());
    assert_eq!(
        agent.telemetry().sessions_ended.get(&EndReason::ConnectFailed),
        Some(&1)
    );
}

#[tokio::test]
async fn test_transport_refusal_releases_devices() {
    let rig = rig_with(test_config(), ScriptedTransport::new().failing("handshake refused"));
    rig.agent.connect();

    assert!(wait_until(|| has_log(&rig.agent, "Failed to connect:")).await);
    assert!(rig.agent.wait_for_state(AgentState::Disconnected, WAIT).await);
    assert!(wait_until(|| rig.mic.lease.held() == 0).await);
    assert!(rig.speaker.sink.is_closed());
}

#[tokio::test]
async fn test_interruption_cancels_playback_and_discards_partial_text() {
    let rig = rig();
    connected(&rig).await;

    rig.transport.push(ServerEvent::InputTranscriptDelta("Wait".into())).await;
    rig.transport.push(ServerEvent::OutputTranscriptDelta("As I was say".into())).await;
    for _ in 0..3 {
        rig.transport.push(chunk(0.5)).await;
    }
    assert!(wait_until(|| rig.speaker.sink.started().len() == 3).await);
    assert_eq!(rig.agent.state(), AgentState::Speaking);

    rig.transport.push(ServerEvent::Interrupted).await;
    assert!(rig.agent.wait_for_state(AgentState::Listening, WAIT).await);
    assert!(wait_until(|| has_log(&rig.agent, "Interrupted")).await);
    assert_eq!(rig.speaker.sink.stopped().len(), 3);
    assert_eq!(rig.speaker.sink.live(), 0);

    // The next turn's audio restarts from the output clock.
    rig.speaker.sink.set_now(9.0);
    rig.transport.push(chunk(0.25)).await;
    assert!(wait_until(|| rig.speaker.sink.started().len() == 4).await);
    assert_eq!(rig.speaker.sink.started()[3].start_at, 9.0);

    rig.transport.push(ServerEvent::TurnComplete).await;
    assert!(rig.agent.wait_for_state(AgentState::Listening, WAIT).await);
    assert!(wait_until(|| !texts(&rig.agent, LogSource::User).is_empty()).await);
    assert_eq!(texts(&rig.agent, LogSource::User), vec!["Wait"]);
    assert!(texts(&rig.agent, LogSource::Agent).is_empty());

    let stats = rig.agent.telemetry();
    assert_eq!(stats.interruptions, 1);
    assert_eq!(stats.buffers_cut, 3);
}

#[tokio::test]
async fn test_interrupted_while_listening_is_ignored() {
    let rig = rig();
    connected(&rig).await;

    rig.transport.push(ServerEvent::Interrupted).await;
    rig.transport.push(ServerEvent::OutputTranscriptDelta("ok".into())).await;
    rig.transport.push(ServerEvent::TurnComplete).await;
    assert!(wait_until(|| !texts(&rig.agent, LogSource::Agent).is_empty()).await);

    assert_eq!(rig.agent.state(), AgentState::Listening);
    assert!(!has_log(&rig.agent, "Interrupted"));
}

#[tokio::test]
async fn test_interrupted_after_turn_keeps_the_agent_line() {
    let rig = rig();
    connected(&rig).await;

    rig.transport.push(ServerEvent::OutputTranscriptDelta("ok".into())).await;
    rig.transport.push(ServerEvent::Interrupted).await;
    rig.transport.push(ServerEvent::TurnComplete).await;
    assert!(wait_until(|| !texts(&rig.agent, LogSource::Agent).is_empty()).await);

    assert_eq!(texts(&rig.agent, LogSource::Agent), vec!["ok"]);
    assert_eq!(rig.agent.state(), AgentState::Listening);
    assert!(!has_log(&rig.agent, "Interrupted"));
    assert_eq!(rig.agent.telemetry().interruptions, 0);
}

#[tokio::test]
async fn test_audio_before_open_is_not_played() {
    let rig = rig_with(test_config(), ScriptedTransport::new());
    rig.agent.connect();
    assert!(wait_until(|| rig.transport.is_connected()).await);

    assert!(rig.transport.push(chunk(0.25)).await);
    assert!(rig.transport.push(TransportEvent::Opened).await);
    assert!(rig.agent.wait_for_state(AgentState::Listening, WAIT).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.speaker.sink.started().is_empty());
    assert_eq!(rig.agent.state(), AgentState::Listening);
    assert_eq!(rig.agent.telemetry().chunks_scheduled, 0);
}

#[tokio::test]
async fn test_decode_failure_ends_session_by_default() {
    let rig = rig();
    connected(&rig).await;

    rig.transport
        .push(ServerEvent::AudioChunk {
            data: vec![1, 2, 3],
            sample_rate: 24_000,
            channels: 1,
        })
        .await;

    assert!(wait_until(|| has_log(&rig.agent, "Audio decode failed:")).await);
    assert!(rig.agent.wait_for_state(AgentState::Disconnected, WAIT).await);
    assert!(wait_until(|| rig.mic.lease.held() == 0).await);
    assert_eq!(rig.agent.telemetry().decode_failures, 1);
}

#[tokio::test]
async fn test_decode_failure_can_skip_the_chunk() {
    let mut config = test_config();
    config.pipeline.decode_failure = DecodeFailurePolicy::SkipChunk;
    let rig = rig_with(config, ScriptedTransport::new().auto_open());
    connected(&rig).await;

    rig.transport
        .push(ServerEvent::AudioChunk {
            data: vec![1, 2, 3],
            sample_rate: 24_000,
            channels: 1,
        })
        .await;
    rig.transport.push(chunk(0.25)).await;

    assert!(wait_until(|| has_log(&rig.agent, "Audio decode failed:")).await);
    assert!(wait_until(|| rig.speaker.sink.started().len() == 1).await);
    assert_eq!(rig.agent.state(), AgentState::Speaking);
}

#[tokio::test]
async fn test_remote_close_tears_down() {
    let rig = rig();
    connected(&rig).await;

    rig.transport.push(ServerEvent::Closed).await;
    assert!(rig.agent.wait_for_state(AgentState::Disconnected, WAIT).await);
    assert!(has_log(&rig.agent, "Session closed"));
    assert!(wait_until(|| rig.mic.lease.held() == 0).await);
    assert_eq!(
        rig.agent.telemetry().sessions_ended.get(&EndReason::RemoteClosed),
        Some(&1)
    );
}

#[tokio::test]
async fn test_dropped_stream_counts_as_close() {
    let rig = rig();
    connected(&rig).await;

    rig.transport.drop_connection();
    assert!(rig.agent.wait_for_state(AgentState::Disconnected, WAIT).await);
    assert!(has_log(&rig.agent, "Session closed"));
}

#[tokio::test]
async fn test_remote_error_is_logged_and_tears_down() {
    let rig = rig();
    connected(&rig).await;

    rig.transport.push(ServerEvent::Error("quota exceeded".into())).await;
    assert!(rig.agent.wait_for_state(AgentState::Disconnected, WAIT).await);
    assert!(has_log(&rig.agent, "Error occurred: quota exceeded"));
}

#[tokio::test]
async fn test_send_failure_tears_down() {
    let transport = ScriptedTransport::new().auto_open();
    transport.fail_sends(true);
    let rig = rig_with(test_config(), transport);
    rig.agent.connect();

    assert!(wait_until(|| has_log(&rig.agent, "Error occurred: send rejected")).await);
    assert!(rig.agent.wait_for_state(AgentState::Disconnected, WAIT).await);
    assert_eq!(
        rig.agent.telemetry().sessions_ended.get(&EndReason::TransportError),
        Some(&1)
    );
}

#[tokio::test]
async fn test_disconnect_while_awaiting_open() {
    let rig = rig_with(test_config(), ScriptedTransport::new());
    rig.agent.connect();

    assert!(wait_until(|| rig.transport.is_connected()).await);
    assert_eq!(rig.agent.state(), AgentState::Connecting);

    rig.agent.disconnect().await;
    assert_eq!(rig.agent.state(), AgentState::Disconnected);
    assert!(!rig.transport.push(TransportEvent::Opened).await);
    // The attempt may still be landing; it is released, never adopted.
    assert!(wait_until(|| rig.mic.lease.held() == 0).await);
    assert!(wait_until(|| rig.speaker.sink.is_closed()).await);
    assert_eq!(rig.agent.state(), AgentState::Disconnected);
    assert!(!has_log(&rig.agent, "Connected!"));
}
