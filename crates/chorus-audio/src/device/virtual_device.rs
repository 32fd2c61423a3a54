//! Headless device driven by explicit render calls.

use std::sync::Arc;

use chorus_core::{DeviceFormat, Result};

use super::{AudioDevice, DeviceVoice, MixChannel, Mixer};
use crate::wake::EngineWaker;

/// Device with no hardware behind it. Audio advances only when [`VirtualDevice::render`] runs.
///
/// Useful for offline rendering and for tests that need deterministic buffer consumption.
pub struct VirtualDevice {
    mixer: Arc<Mixer>,
}

impl VirtualDevice {
    pub fn new(format: DeviceFormat) -> Self {
        Self {
            mixer: Arc::new(Mixer::new(format)),
        }
    }

    /// Mix the next `frames` frames.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; self.mixer.format().samples(frames)];
        self.mixer.mix(&mut out);
        out
    }

    pub fn render_into(&self, out: &mut [f32]) {
        self.mixer.mix(out);
    }

    /// Voice created `index`-th, matching the engine's voice ids.
    pub fn voice(&self, index: usize) -> Option<Arc<MixChannel>> {
        self.mixer.channel(index)
    }

    pub fn voice_count(&self) -> usize {
        self.mixer.channel_count()
    }

    pub fn master_gain(&self) -> f32 {
        self.mixer.master_gain()
    }
}

impl AudioDevice for VirtualDevice {
    fn name(&self) -> &str {
        "virtual"
    }

    fn format(&self) -> DeviceFormat {
        self.mixer.format()
    }

    fn create_voice(
        &self,
        num_buffers: usize,
        frames_per_buffer: usize,
    ) -> Result<Arc<dyn DeviceVoice>> {
        Ok(self.mixer.create_channel(num_buffers, frames_per_buffer))
    }

    fn set_master_gain(&self, gain: f32) {
        self.mixer.set_master_gain(gain);
    }

    fn attach_waker(&self, waker: EngineWaker) {
        self.mixer.attach_waker(waker);
    }
}
