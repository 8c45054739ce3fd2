pub mod cancel;
pub mod context;
pub mod event;
pub mod feed;
pub mod orchestrator;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod transcript;
