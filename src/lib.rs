pub mod audio;
pub mod config;
pub mod error;
pub mod kernel;
pub mod transport;

// Re-export the surface a presentation layer needs
pub use config::Config;
pub use error::{AgentError, AgentResult};
pub use kernel::event::{LogEntry, LogSource, ServerEvent, TransportEvent};
pub use kernel::orchestrator::{AgentHandle, Orchestrator};
pub use kernel::state::AgentState;
