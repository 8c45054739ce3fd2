//! Device-facing audio: capture, metering/encoding, decoding and playback.

pub mod capture;
pub mod decode;
pub mod device;
pub mod encoder;
pub mod mock;
pub mod playback;
pub mod processing;
pub mod resample;
