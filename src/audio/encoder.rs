//! Capture Encoder: one microphone frame in, one metering value and one wire frame out.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Ceiling of the metering scale.
pub const VOLUME_MAX: f32 = 100.0;

/// Outbound audio: mono 16-bit little-endian PCM at `sample_rate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn samples(&self) -> usize {
        self.pcm.len() / 2
    }

    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.pcm)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// Metering value in `[0, 100]`.
    pub volume: f32,
    pub frame: AudioFrame,
}

#[derive(Debug, Clone)]
pub struct CaptureEncoder {
    sample_rate: u32,
    volume_scale: f32,
}

impl CaptureEncoder {
    pub fn new(sample_rate: u32, volume_scale: f32) -> Self {
        Self {
            sample_rate,
            volume_scale,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn encode(&self, samples: &[f32]) -> EncodedFrame {
        EncodedFrame {
            volume: volume_level(samples, self.volume_scale),
            frame: AudioFrame {
                pcm: f32_to_pcm16le(samples),
                sample_rate: self.sample_rate,
            },
        }
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sq_sum: f32 = samples.iter().map(|&x| x * x).sum();
    (sq_sum / samples.len() as f32).sqrt()
}

/// `min(rms * scale, 100)`, floored at 0. Non-finite input meters as silence.
pub fn volume_level(samples: &[f32], scale: f32) -> f32 {
    let level = rms(samples) * scale;
    if !level.is_finite() {
        return if level == f32::INFINITY { VOLUME_MAX } else { 0.0 };
    }
    level.clamp(0.0, VOLUME_MAX)
}

/// Clamps to `[-1, 1]` and scales asymmetrically so both -1.0 and 1.0 are representable.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let v = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
