use ringbuf::traits::{Consumer, Observer};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capture::MicStream;
use super::encoder::CaptureEncoder;
use super::resample::CaptureResampler;
use crate::transport::queue::OutboundQueue;

const IDLE_POLL: Duration = Duration::from_millis(5);

/// Pulls raw microphone samples, cuts them into fixed frames, meters and
/// encodes each frame, and hands the result to the outbound queue.
pub struct CaptureWorker {
    stream: MicStream,
    encoder: CaptureEncoder,
    resampler: Option<CaptureResampler>,
    frame_size: usize,
    outbound: OutboundQueue,
    volume: Arc<watch::Sender<f32>>,
    cancel: CancellationToken,
}

impl CaptureWorker {
    pub fn new(
        stream: MicStream,
        encoder: CaptureEncoder,
        frame_size: usize,
        outbound: OutboundQueue,
        volume: Arc<watch::Sender<f32>>,
        cancel: CancellationToken,
    ) -> Self {
        let resampler = if stream.sample_rate != encoder.sample_rate() {
            match CaptureResampler::new(stream.sample_rate, encoder.sample_rate()) {
                Ok(r) => {
                    info!(
                        "Capture resampling {}Hz -> {}Hz",
                        stream.sample_rate,
                        encoder.sample_rate()
                    );
                    Some(r)
                }
                Err(e) => {
                    warn!("{}; sending device-rate audio", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            stream,
            encoder,
            resampler,
            frame_size: frame_size.max(1),
            outbound,
            volume,
            cancel,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("duplex-capture".into())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!(
            "Capture Worker Started. Device Rate: {}Hz, Frame: {} samples",
            self.stream.sample_rate, self.frame_size
        );

        let mut scratch: Vec<f32> = vec![0.0; self.frame_size];
        let mut pending: Vec<f32> = Vec::with_capacity(self.frame_size * 2);
        let mut frames_out: u64 = 0;

        while !self.cancel.is_cancelled() {
            if self.stream.consumer.occupied_len() == 0 {
                std::thread::sleep(IDLE_POLL);
                continue;
            }

            let n = self.stream.consumer.pop_slice(&mut scratch);
            match self.resampler.as_mut() {
                Some(r) => pending.extend(r.process(&scratch[..n])),
                None => pending.extend_from_slice(&scratch[..n]),
            }

            while pending.len() >= self.frame_size {
                let frame: Vec<f32> = pending.drain(..self.frame_size).collect();
                let encoded = self.encoder.encode(&frame);
                self.volume.send_replace(encoded.volume);
                if !self.outbound.push(encoded.frame) {
                    debug!("Outbound queue closed, stopping capture");
                    self.cancel.cancel();
                    break;
                }
                frames_out += 1;
            }
        }

        self.volume.send_replace(0.0);
        info!("Capture Worker Stopped after {} frame(s)", frames_out);
        // `self.stream` drops here, releasing the microphone.
    }
}
