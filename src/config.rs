//! Configuration surface handed over at connect time.
//!
//! Every field has a default so a partial (or absent) JSON file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{AgentError, AgentResult};

pub const CONFIG_ENV: &str = "DUPLEX_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Rate of the PCM sent upstream. The microphone is resampled to this if needed.
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,
    /// Rate requested from the speaker device.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    /// Samples per outbound frame (one capture period).
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// Multiplier applied to frame RMS before clamping to `[0, 100]`.
    #[serde(default = "default_volume_scale")]
    pub volume_scale: f32,
    /// Substring match on the device name; `None` picks the host default.
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            frame_size: default_frame_size(),
            volume_scale: default_volume_scale(),
            input_device: None,
            output_device: None,
        }
    }
}

/// Opaque to the core; forwarded to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_true")]
    pub input_transcription: bool,
    #[serde(default = "default_true")]
    pub output_transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_instruction: default_system_instruction(),
            voice: default_voice(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

/// What to do when one inbound audio chunk fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    EndSession,
    SkipChunk,
}

impl Default for DecodeFailurePolicy {
    fn default() -> Self {
        Self::EndSession
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Outbound frames held while the transport is slow; oldest are dropped past this.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default)]
    pub decode_failure: DecodeFailurePolicy,
    /// Capacity of the capture ring buffer, in seconds of device audio.
    #[serde(default = "default_ring_buffer_seconds")]
    pub ring_buffer_seconds: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            decode_failure: DecodeFailurePolicy::default(),
            ring_buffer_seconds: default_ring_buffer_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Missing file means defaults. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(AgentError::Config(format!("{}: {}", path.display(), e))),
        };
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> AgentResult<Self> {
        serde_json::from_str(contents).map_err(|e| AgentError::Config(e.to_string()))
    }

    pub fn from_env() -> AgentResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(&PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }
}

fn default_input_sample_rate() -> u32 {
    16_000
}
fn default_output_sample_rate() -> u32 {
    24_000
}
fn default_frame_size() -> usize {
    4096
}
fn default_volume_scale() -> f32 {
    500.0
}
fn default_model() -> String {
    "gemini-2.5-flash-native-audio-preview-09-2025".into()
}
fn default_system_instruction() -> String {
    "You are Nova, a voice assistant with a calm, confident voice. \
     Keep your responses concise, conversational, and engaging."
        .into()
}
fn default_voice() -> String {
    "Fenrir".into()
}
fn default_true() -> bool {
    true
}
fn default_outbound_capacity() -> usize {
    32
}
fn default_ring_buffer_seconds() -> u32 {
    2
}
