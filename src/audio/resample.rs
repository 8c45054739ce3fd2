use rubato::{FftFixedIn, Resampler};
use tracing::warn;

use crate::error::{AgentError, AgentResult};

const RESAMPLER_CHUNK: usize = 1024;

/// Mono streaming resampler for microphones that cannot open at the wire rate.
///
/// Input of any length is accepted; output is produced whenever a full
/// internal chunk has accumulated.
pub struct CaptureResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl CaptureResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> AgentResult<Self> {
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLER_CHUNK,
            2,
            1,
        )
        .map_err(|e| {
            AgentError::DeviceUnavailable(format!(
                "resampler {}->{}: {}",
                from_rate, to_rate, e
            ))
        })?;
        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.inner.process(&[chunk], None) {
                Ok(mut channels) => {
                    if let Some(mono) = channels.pop() {
                        out.extend(mono);
                    }
                }
                Err(e) => {
                    warn!("Resampler error, dropping chunk: {}", e);
                }
            }
        }
        out
    }
}
