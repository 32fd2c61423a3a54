//! # chorus-audio
//!
//! Pooled low-latency voice playback for Chorus.
//!
//! Features:
//! - Fixed voice, stream, and handle pools sized at startup
//! - Non-blocking play requests drained by a dedicated engine thread
//! - Symphonia decoding straight out of resource pack stores
//! - Software mixing onto a cpal output, or a headless virtual device

pub mod convert;
pub mod decode;
pub mod device;
pub mod engine;
pub mod handle;
pub mod pool;
pub mod resample;
pub mod voice;
pub mod wake;
mod worker;

#[cfg(test)]
mod test_util;

pub use convert::FormatConverter;
pub use decode::DecodeStream;
pub use device::{AudioDevice, CpalDevice, DeviceVoice, OutputConfig, VirtualDevice};
pub use engine::AudioEngine;
pub use handle::VoiceHandle;
pub use pool::{PoolStats, VoiceId};
pub use resample::Resampler;
pub use voice::VoiceState;
pub use wake::EngineWaker;
