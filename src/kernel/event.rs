use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound content from the remote session. Processed strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    InputTranscriptDelta(String),
    OutputTranscriptDelta(String),
    TurnComplete,
    AudioChunk {
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    },
    Interrupted,
    Closed,
    Error(String),
}

/// Everything a transport can deliver: the open acknowledgment plus server events.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Server(ServerEvent),
}

impl From<ServerEvent> for TransportEvent {
    fn from(event: ServerEvent) -> Self {
        TransportEvent::Server(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    User,
    Agent,
    System,
}

/// One line of the conversation log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub source: LogSource,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(LogSource::System, text)
    }
}
