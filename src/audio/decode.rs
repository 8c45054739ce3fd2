use std::sync::Arc;

use crate::error::{AgentError, AgentResult};

/// Decoded agent audio, interleaved f32 in `[-1, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Seconds of audio.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// 16-bit little-endian interleaved PCM to a playback buffer.
pub fn decode_pcm16(data: &[u8], sample_rate: u32, channels: u16) -> AgentResult<PlaybackBuffer> {
    if sample_rate == 0 {
        return Err(AgentError::DecodeFailure("sample rate is zero".into()));
    }
    if channels == 0 {
        return Err(AgentError::DecodeFailure("channel count is zero".into()));
    }
    let frame_bytes = 2 * channels as usize;
    if data.len() % frame_bytes != 0 {
        return Err(AgentError::DecodeFailure(format!(
            "{} bytes is not a whole number of {}-channel PCM16 frames",
            data.len(),
            channels
        )));
    }

    let samples = data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer::new(samples, sample_rate, channels))
}
