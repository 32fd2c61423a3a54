//! Software mixer shared by the built-in backends.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chorus_core::{DeviceFormat, Error, PlayState, Result};
use parking_lot::{Mutex, RwLock};

use super::DeviceVoice;
use crate::wake::EngineWaker;

/// State transitions kept per channel for inspection.
const HISTORY_LEN: usize = 32;

const MIN_PITCH: f32 = 0.05;
const MAX_PITCH: f32 = 8.0;

/// Sums every playing channel into an output buffer.
pub struct Mixer {
    format: DeviceFormat,
    channels: RwLock<Vec<Arc<MixChannel>>>,
    master_gain: AtomicU32,
    waker: Mutex<Option<EngineWaker>>,
}

impl Mixer {
    pub fn new(format: DeviceFormat) -> Self {
        Self {
            format,
            channels: RwLock::new(Vec::new()),
            master_gain: AtomicU32::new(1.0f32.to_bits()),
            waker: Mutex::new(None),
        }
    }

    pub const fn format(&self) -> DeviceFormat {
        self.format
    }

    /// Register a new channel. Channels are numbered in creation order.
    pub fn create_channel(&self, num_buffers: usize, frames_per_buffer: usize) -> Arc<MixChannel> {
        let channel = Arc::new(MixChannel::new(
            usize::from(self.format.channels),
            num_buffers,
            frames_per_buffer,
        ));
        self.channels.write().push(Arc::clone(&channel));
        channel
    }

    pub fn channel(&self, index: usize) -> Option<Arc<MixChannel>> {
        self.channels.read().get(index).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    pub fn attach_waker(&self, waker: EngineWaker) {
        *self.waker.lock() = Some(waker);
    }

    /// Overwrite `out` (interleaved, device format) with the next mixed block.
    pub fn mix(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut completed = 0;
        for channel in self.channels.read().iter() {
            completed += channel.render(out);
        }

        let master = self.master_gain();
        if (master - 1.0).abs() > f32::EPSILON {
            for sample in out.iter_mut() {
                *sample *= master;
            }
        }

        if completed > 0 {
            if let Some(waker) = &*self.waker.lock() {
                waker.wake();
            }
        }
    }
}

struct ChannelState {
    queue: VecDeque<Vec<f32>>,
    free: Vec<Vec<f32>>,
    /// Fractional frame position in the front buffer.
    cursor: f64,
    consumed: usize,
    play_state: PlayState,
    gain: f32,
    pitch: f32,
    history: VecDeque<PlayState>,
    fault: Option<String>,
}

/// One mixer input implementing [`DeviceVoice`].
pub struct MixChannel {
    channels: usize,
    capacity: usize,
    buffer_samples: usize,
    state: Mutex<ChannelState>,
}

impl MixChannel {
    fn new(channels: usize, capacity: usize, frames_per_buffer: usize) -> Self {
        Self {
            channels: channels.max(1),
            capacity,
            buffer_samples: frames_per_buffer * channels,
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                free: Vec::with_capacity(capacity),
                cursor: 0.0,
                consumed: 0,
                play_state: PlayState::Initial,
                gain: 1.0,
                pitch: 1.0,
                history: VecDeque::with_capacity(HISTORY_LEN),
                fault: None,
            }),
        }
    }

    /// Play states this channel has been set to, oldest first.
    pub fn history(&self) -> Vec<PlayState> {
        self.state.lock().history.iter().copied().collect()
    }

    pub fn gain(&self) -> f32 {
        self.state.lock().gain
    }

    pub fn pitch(&self) -> f32 {
        self.state.lock().pitch
    }

    /// Make the next [`DeviceVoice::take_consumed`] fail.
    pub fn inject_fault(&self, message: impl Into<String>) {
        self.state.lock().fault = Some(message.into());
    }

    /// Add this channel into `out`. Returns buffers completed.
    fn render(&self, out: &mut [f32]) -> usize {
        let ch = self.channels;
        let mut state = self.state.lock();
        if state.play_state != PlayState::Playing {
            return 0;
        }

        let ChannelState {
            queue,
            free,
            cursor,
            consumed,
            gain,
            pitch,
            ..
        } = &mut *state;

        let mut completed = 0;
        'frames: for frame in out.chunks_exact_mut(ch) {
            loop {
                let Some(front) = queue.front() else {
                    break 'frames;
                };
                let len = front.len() / ch;
                let idx = *cursor as usize;
                if idx < len {
                    for (o, s) in frame.iter_mut().zip(&front[idx * ch..(idx + 1) * ch]) {
                        *o += s * *gain;
                    }
                    *cursor += f64::from(*pitch);
                    break;
                }
                *cursor -= len as f64;
                if let Some(done) = queue.pop_front() {
                    free.push(done);
                }
                completed += 1;
            }
        }

        // A buffer whose last frame was just played counts as consumed now.
        while let Some(front) = queue.front() {
            let len = front.len() / ch;
            if (*cursor as usize) < len {
                break;
            }
            *cursor -= len as f64;
            if let Some(done) = queue.pop_front() {
                free.push(done);
            }
            completed += 1;
        }
        if queue.is_empty() {
            *cursor = 0.0;
        }

        *consumed += completed;
        completed
    }

    fn discard_queue(state: &mut ChannelState) {
        while let Some(buffer) = state.queue.pop_front() {
            state.free.push(buffer);
        }
        state.cursor = 0.0;
        state.consumed = 0;
    }
}

impl DeviceVoice for MixChannel {
    fn submit(&self, samples: &[f32]) -> Result<()> {
        if samples.len() % self.channels != 0 {
            return Err(Error::InvalidArgument(format!(
                "buffer of {} samples is not whole {}-channel frames",
                samples.len(),
                self.channels
            )));
        }
        let mut state = self.state.lock();
        if state.queue.len() >= self.capacity {
            return Err(Error::Device("voice buffer queue is full".into()));
        }
        let mut buffer = state
            .free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_samples));
        buffer.clear();
        buffer.extend_from_slice(samples);
        state.queue.push_back(buffer);
        Ok(())
    }

    fn take_consumed(&self) -> Result<usize> {
        let mut state = self.state.lock();
        if let Some(fault) = state.fault.take() {
            return Err(Error::Device(fault));
        }
        Ok(mem::take(&mut state.consumed))
    }

    fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn set_play_state(&self, play_state: PlayState) {
        let mut state = self.state.lock();
        if state.play_state == play_state {
            return;
        }
        if state.history.len() == HISTORY_LEN {
            state.history.pop_front();
        }
        state.history.push_back(play_state);
        if play_state == PlayState::Stopped {
            Self::discard_queue(&mut state);
        }
        state.play_state = play_state;
    }

    fn play_state(&self) -> PlayState {
        self.state.lock().play_state
    }

    fn set_gain(&self, gain: f32) {
        self.state.lock().gain = gain.clamp(0.0, 1.0);
    }

    fn set_pitch(&self, pitch: f32) {
        if pitch.is_finite() {
            self.state.lock().pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        Self::discard_queue(&mut state);
        state.play_state = PlayState::Initial;
        state.gain = 1.0;
        state.pitch = 1.0;
        state.fault = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    fn mono_mixer() -> Mixer {
        Mixer::new(DeviceFormat {
            sample_rate: 48000,
            channels: 1,
        })
    }

    #[test]
    fn test_only_playing_channels_mix() {
        let mixer = mono_mixer();
        let channel = mixer.create_channel(2, 4);
        channel.submit(&[0.5; 4]).unwrap();

        let mut out = [1.0f32; 4];
        mixer.mix(&mut out);
        assert_eq!(out, [0.0; 4]);

        channel.set_play_state(PlayState::Playing);
        mixer.mix(&mut out);
        assert_eq!(out, [0.5; 4]);
        assert_eq!(channel.queued(), 0);
        assert_eq!(channel.take_consumed().unwrap(), 1);
        assert_eq!(channel.take_consumed().unwrap(), 0);
    }

    #[test]
    fn test_queue_is_bounded() {
        let mixer = mono_mixer();
        let channel = mixer.create_channel(2, 4);
        channel.submit(&[0.0; 4]).unwrap();
        channel.submit(&[0.0; 4]).unwrap();
        assert!(matches!(channel.submit(&[0.0; 4]), Err(Error::Device(_))));
        assert_eq!(channel.queued(), 2);
    }

    #[test]
    fn test_gain_and_master_gain() {
        let mixer = mono_mixer();
        let channel = mixer.create_channel(1, 2);
        channel.set_gain(0.5);
        mixer.set_master_gain(0.5);
        channel.submit(&[1.0, 1.0]).unwrap();
        channel.set_play_state(PlayState::Playing);
        let mut out = [0.0f32; 2];
        mixer.mix(&mut out);
        assert!((out[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_pitch_speeds_consumption() {
        let mixer = mono_mixer();
        let channel = mixer.create_channel(2, 4);
        channel.set_pitch(2.0);
        channel.submit(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        channel.submit(&[0.5, 0.6, 0.7, 0.8]).unwrap();
        channel.set_play_state(PlayState::Playing);
        let mut out = [0.0f32; 4];
        mixer.mix(&mut out);
        assert_eq!(channel.take_consumed().unwrap(), 2);
        assert!((out[1] - 0.3).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stop_discards_and_records() {
        let mixer = mono_mixer();
        let channel = mixer.create_channel(2, 4);
        channel.submit(&[0.0; 4]).unwrap();
        channel.set_play_state(PlayState::Paused);
        channel.set_play_state(PlayState::Paused);
        channel.set_play_state(PlayState::Stopped);
        assert_eq!(channel.queued(), 0);
        assert_eq!(channel.take_consumed().unwrap(), 0);
        assert_eq!(channel.history(), vec![PlayState::Paused, PlayState::Stopped]);
    }

    #[test]
    fn test_fault_surfaces_once() {
        let mixer = mono_mixer();
        let channel = mixer.create_channel(1, 4);
        channel.inject_fault("unplugged");
        assert!(matches!(channel.take_consumed(), Err(Error::Device(_))));
        assert!(channel.take_consumed().is_ok());
    }

    #[test]
    fn test_completion_wakes_engine() {
        let mixer = mono_mixer();
        let (waker, event) = crate::wake::WakeEvent::new();
        mixer.attach_waker(waker);
        let channel = mixer.create_channel(1, 2);
        channel.submit(&[0.0, 0.0]).unwrap();
        channel.set_play_state(PlayState::Playing);
        let mut out = [0.0f32; 2];
        mixer.mix(&mut out);
        assert_eq!(
            event.wait(Some(std::time::Duration::ZERO)),
            crate::wake::WaitOutcome::Signalled
        );
    }
}
