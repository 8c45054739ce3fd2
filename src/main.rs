use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use duplex::audio::capture::CpalMicrophone;
use duplex::audio::playback::CpalSpeaker;
use duplex::transport::loopback::LoopbackTransport;
use duplex::{AgentState, Config, Orchestrator};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")?;

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        "Duplex booting. Input {}Hz, output {}Hz, frame {} samples",
        config.audio.input_sample_rate,
        config.audio.output_sample_rate,
        config.audio.frame_size
    );

    let microphone = Arc::new(CpalMicrophone::new(
        config.audio.input_device.clone(),
        config.pipeline.ring_buffer_seconds,
    ));
    let speaker = Arc::new(CpalSpeaker::new(config.audio.output_device.clone()));
    let transport = Arc::new(LoopbackTransport::default());

    let agent = Orchestrator::spawn(config, microphone, speaker, transport);
    let mut states = agent.watch_state();
    let mut logs = agent.subscribe_logs();

    agent.connect();
    println!("Connecting. Press Ctrl+C to stop.");

    let mut meter = tokio::time::interval(Duration::from_secs(1));
    meter.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Disconnecting...");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("[STATE] {:?}", state);
            }
            entry = logs.recv() => match entry {
                Ok(entry) => println!("[{:?}] {}", entry.source, entry.text),
                Err(RecvError::Lagged(n)) => tracing::warn!("Log display lagged by {} entries", n),
                Err(RecvError::Closed) => break,
            },
            _ = meter.tick() => {
                if agent.state() == AgentState::Listening || agent.state() == AgentState::Speaking {
                    println!("[VOLUME] {:.1}", agent.volume());
                }
            }
        }
    }

    agent.disconnect().await;
    let stats = agent.telemetry();
    println!(
        "[STATS] frames sent {}, dropped {}, chunks scheduled {}, interruptions {}",
        stats.frames_sent, stats.frames_dropped, stats.chunks_scheduled, stats.interruptions
    );
    Ok(())
}
