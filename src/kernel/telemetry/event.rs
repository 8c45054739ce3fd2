use serde::{Deserialize, Serialize};

use crate::kernel::state::AgentState;

// Allowed: counts, durations, states, reasons.
// Forbidden: transcript text, audio samples.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    StateTransition {
        from: AgentState,
        to: AgentState,
    },

    /// Time from the connect request to the remote open acknowledgment.
    SessionOpened {
        connect_latency_ms: u64,
    },

    FrameSent,

    /// Frames discarded by outbound backpressure since the last report.
    FramesDropped {
        count: u64,
    },

    ChunkScheduled {
        /// How far ahead of the output clock the chunk was placed.
        lead_ms: u64,
        duration_ms: u64,
    },

    /// Decode finished after an interruption; the chunk was not played.
    ChunkDiscarded,

    DecodeFailed,

    Interruption {
        buffers_cut: usize,
    },

    TurnCompleted {
        user_entry: bool,
        agent_entry: bool,
    },

    SessionEnded {
        reason: EndReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    Requested,
    RemoteClosed,
    ConnectFailed,
    TransportError,
    DecodeError,
}
