//! JSON framing for the Live bidirectional streaming API.
//!
//! Builds the client messages (setup, realtime audio input) and maps one
//! server message onto the ordered [`TransportEvent`]s the core consumes.
//! The in-process transports here skip framing; a network [`LiveTransport`]
//! wraps its socket with these functions.
//!
//! [`LiveTransport`]: super::LiveTransport

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::audio::encoder::AudioFrame;
use crate::config::SessionConfig;
use crate::error::AgentResult;
use crate::kernel::event::{ServerEvent, TransportEvent};

/// Rate assumed for inline audio whose mime type carries none.
pub const DEFAULT_OUTPUT_RATE: u32 = 24_000;

pub fn setup_message(config: &SessionConfig) -> Value {
    let mut setup = json!({
        "model": model_path(&config.model),
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": config.voice } }
            }
        },
        "systemInstruction": { "parts": [{ "text": config.system_instruction }] }
    });
    if config.input_transcription {
        setup["inputAudioTranscription"] = json!({});
    }
    if config.output_transcription {
        setup["outputAudioTranscription"] = json!({});
    }
    json!({ "setup": setup })
}

pub fn realtime_input_message(frame: &AudioFrame) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": frame.mime_type(),
                "data": frame.to_base64(),
            }]
        }
    })
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    input_transcription: Option<Transcription>,
    #[serde(default)]
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<Blob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

/// One server message to events, in the order the core must see them:
/// transcript delta (output wins over input), turn complete, audio, interrupted.
pub fn decode_server_message(text: &str) -> AgentResult<Vec<TransportEvent>> {
    let msg: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(TransportEvent::Opened);
    }

    let Some(content) = msg.server_content else {
        return Ok(events);
    };

    if let Some(t) = content.output_transcription {
        events.push(ServerEvent::OutputTranscriptDelta(t.text).into());
    } else if let Some(t) = content.input_transcription {
        events.push(ServerEvent::InputTranscriptDelta(t.text).into());
    }

    if content.turn_complete {
        events.push(ServerEvent::TurnComplete.into());
    }

    let blob = content
        .model_turn
        .and_then(|turn| turn.parts.into_iter().next())
        .and_then(|part| part.inline_data);
    if let Some(blob) = blob {
        let data = STANDARD.decode(blob.data.as_bytes())?;
        let sample_rate = blob
            .mime_type
            .as_deref()
            .and_then(parse_rate)
            .unwrap_or(DEFAULT_OUTPUT_RATE);
        events.push(
            ServerEvent::AudioChunk {
                data,
                sample_rate,
                channels: 1,
            }
            .into(),
        );
    }

    if content.interrupted {
        events.push(ServerEvent::Interrupted.into());
    }

    Ok(events)
}

/// `audio/pcm;rate=24000` -> `24000`.
pub fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}
