//! Audio device capability layer.
//!
//! The engine only needs a small surface from a backend: a fixed output format
//! and per-voice buffer queues with play state, gain, and pitch. Backends here
//! share one software [`Mixer`]; a native backend can implement the traits
//! directly instead.

mod mixer;
mod output;
mod virtual_device;

use std::sync::Arc;

use chorus_core::{DeviceFormat, PlayState, Result};

use crate::wake::EngineWaker;

pub use mixer::{MixChannel, Mixer};
pub use output::{list_output_devices, CpalDevice, OutputConfig};
pub use virtual_device::VirtualDevice;

/// An opened output device.
pub trait AudioDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Format every submitted buffer must use.
    fn format(&self) -> DeviceFormat;

    /// Allocate a voice with `num_buffers` queue slots of `frames_per_buffer` frames.
    fn create_voice(
        &self,
        num_buffers: usize,
        frames_per_buffer: usize,
    ) -> Result<Arc<dyn DeviceVoice>>;

    /// Linear gain applied after mixing.
    fn set_master_gain(&self, gain: f32);

    /// Signal `waker` whenever a voice finishes a buffer.
    fn attach_waker(&self, _waker: EngineWaker) {}
}

/// One device voice: a bounded queue of interleaved buffers.
pub trait DeviceVoice: Send + Sync {
    /// Queue one buffer in device format. Fails when the queue is full.
    fn submit(&self, samples: &[f32]) -> Result<()>;

    /// Buffers fully played since the last call.
    fn take_consumed(&self) -> Result<usize>;

    /// Buffers submitted and not yet fully played.
    fn queued(&self) -> usize;

    /// Queue slots.
    fn capacity(&self) -> usize;

    /// `Stopped` also discards queued buffers.
    fn set_play_state(&self, state: PlayState);

    fn play_state(&self) -> PlayState;

    /// Linear gain in `[0, 1]`.
    fn set_gain(&self, gain: f32);

    /// Playback rate multiplier.
    fn set_pitch(&self, pitch: f32);

    /// Return to the freshly created state.
    fn reset(&self);
}
