use serde::{Deserialize, Serialize};

/// The single authoritative session state exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    /// No session, no devices held.
    Disconnected,
    /// Devices being acquired and the remote session being opened.
    Connecting,
    /// Session open, microphone streaming, agent silent.
    Listening,
    /// Agent audio is arriving for the current turn.
    Speaking,
    /// Reserved. Nothing enters it; it behaves like `Listening`.
    Thinking,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl AgentState {
    /// True while a session (or an attempt at one) holds resources.
    pub fn is_active(self) -> bool {
        !matches!(self, AgentState::Disconnected)
    }
}

/// Things the orchestrator observes that may move the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    ConnectRequested,
    SessionOpened,
    AudioReceived,
    TurnComplete,
    Interrupted,
    DisconnectRequested,
    TransportClosed,
    Failed,
}

/// Pure function: (current, event) -> next.
///
/// Total over every pair. Pairs that carry no meaning return `current`
/// unchanged, which is how `Interrupted` outside `Speaking` and a second
/// `ConnectRequested` are ignored.
pub fn transition(current: AgentState, event: AgentEvent) -> AgentState {
    use AgentEvent::*;
    use AgentState::*;

    match (current, event) {
        // Teardown wins from anywhere.
        (_, DisconnectRequested) | (_, TransportClosed) | (_, Failed) => Disconnected,

        (Disconnected, ConnectRequested) => Connecting,
        (_, ConnectRequested) => current,

        (Connecting, SessionOpened) => Listening,
        (_, SessionOpened) => current,

        (Listening, AudioReceived) | (Thinking, AudioReceived) | (Speaking, AudioReceived) => {
            Speaking
        }
        (_, AudioReceived) => current,

        (Speaking, TurnComplete) | (Thinking, TurnComplete) => Listening,
        (_, TurnComplete) => current,

        (Speaking, Interrupted) => Listening,
        (_, Interrupted) => current,
    }
}
