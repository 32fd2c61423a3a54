//! Caller-owned control handles for long-lived voices.
//!
//! A handle slot outlives the voices bound to it. Commands issued before the
//! engine thread has initialized the voice are recorded and applied when it
//! starts; afterwards they go straight to the device voice. Destroying a
//! handle bumps the slot generation, which is how the engine tells a stale
//! binding from a live one.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chorus_core::{PlayState, PlayerFlags};
use parking_lot::MutexGuard;
use tracing::debug;

use crate::engine::Shared;
use crate::pool::VoiceId;
use crate::voice::VoiceSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Binding {
    #[default]
    Unbound,
    BoundTo(VoiceId),
}

/// Handle slot shared between the caller and the engine thread.
#[derive(Debug)]
pub(crate) struct HandleState {
    pub(crate) generation: u32,
    pub(crate) binding: Binding,
    /// The engine has started the bound voice.
    pub(crate) initialized: bool,
    /// Last play or pause the caller asked for.
    pub(crate) requested: PlayState,
    pub(crate) flags: PlayerFlags,
    pub(crate) gain: f32,
    pub(crate) pitch: f32,
}

impl Default for HandleState {
    fn default() -> Self {
        Self {
            generation: 0,
            binding: Binding::Unbound,
            initialized: false,
            requested: PlayState::Playing,
            flags: PlayerFlags::empty(),
            gain: 1.0,
            pitch: 1.0,
        }
    }
}

impl HandleState {
    /// Clear everything but the generation for a new owner.
    pub(crate) fn reuse(&mut self) {
        *self = Self {
            generation: self.generation,
            ..Self::default()
        };
    }

    /// Whether a voice bound under `generation` still belongs to this slot.
    pub(crate) const fn owns(&self, generation: u32) -> bool {
        self.generation == generation
    }

    pub(crate) fn unbind(&mut self) {
        self.binding = Binding::Unbound;
        self.initialized = false;
    }
}

/// Control over one playing voice.
///
/// Dropping the handle stops the voice and returns both to their pools.
pub struct VoiceHandle {
    shared: Arc<Shared>,
    index: usize,
    generation: u32,
}

impl VoiceHandle {
    pub(crate) fn new(shared: Arc<Shared>, index: usize, generation: u32) -> Self {
        Self {
            shared,
            index,
            generation,
        }
    }

    pub fn play(&self) {
        self.request(PlayState::Playing);
    }

    pub fn pause(&self) {
        self.request(PlayState::Paused);
    }

    /// Current play state.
    ///
    /// Before the engine has started the voice this is the requested state.
    /// Once the voice has finished and been retired it is `Stopped`.
    pub fn state(&self) -> PlayState {
        let slot = self.slot();
        match slot.binding {
            Binding::Unbound => PlayState::Stopped,
            Binding::BoundTo(_) if !slot.initialized => slot.requested,
            Binding::BoundTo(voice) => self.shared.voices[voice].device.play_state(),
        }
    }

    /// Linear gain in `[0, 1]`.
    pub fn set_gain(&self, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        let mut slot = self.slot();
        slot.gain = gain;
        if let Some(voice) = self.live_voice(&slot) {
            voice.device.set_gain(gain);
        }
    }

    /// Playback rate multiplier; also shifts pitch.
    pub fn set_pitch(&self, pitch: f32) {
        let mut slot = self.slot();
        slot.pitch = pitch;
        if let Some(voice) = self.live_voice(&slot) {
            voice.device.set_pitch(pitch);
        }
    }

    /// Set `flags`. The engine reads them before filling each buffer.
    pub fn set_flag(&self, flags: PlayerFlags) {
        self.slot().flags.insert(flags);
    }

    pub fn reset_flag(&self, flags: PlayerFlags) {
        self.slot().flags.remove(flags);
    }

    pub fn check_flag(&self, flags: PlayerFlags) -> bool {
        self.slot().flags.contains(flags)
    }

    /// Stop the voice and release the handle. Same as dropping it.
    pub fn destroy(self) {}

    fn slot(&self) -> MutexGuard<'_, HandleState> {
        self.shared.handles[self.index].lock()
    }

    /// The started voice to forward commands to, if any.
    fn live_voice(&self, slot: &HandleState) -> Option<&VoiceSlot> {
        match slot.binding {
            Binding::BoundTo(voice) if slot.initialized && slot.owns(self.generation) => {
                Some(&self.shared.voices[voice])
            }
            _ => None,
        }
    }

    fn request(&self, state: PlayState) {
        let mut slot = self.slot();
        slot.requested = state;
        // While the system is paused the engine applies intent on resume.
        if self.shared.paused.load(Ordering::Acquire) {
            return;
        }
        if let Some(voice) = self.live_voice(&slot) {
            voice.device.set_play_state(state);
        }
    }
}

impl Drop for VoiceHandle {
    fn drop(&mut self) {
        {
            let mut slot = self.slot();
            if let Binding::BoundTo(voice) = slot.binding {
                // Stop first so no more audio is heard; the engine retires it.
                self.shared.voices[voice]
                    .device
                    .set_play_state(PlayState::Stopped);
                debug!("Handle {} released voice {voice}", self.index);
            }
            slot.unbind();
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.shared.pool.lock().release_handle(self.index);
        self.shared.waker.wake();
    }
}

impl fmt::Debug for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceHandle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_keeps_generation() {
        let mut state = HandleState {
            generation: 7,
            binding: Binding::BoundTo(3),
            initialized: true,
            requested: PlayState::Paused,
            flags: PlayerFlags::LOOP,
            gain: 0.2,
            pitch: 2.0,
        };
        state.reuse();
        assert_eq!(state.generation, 7);
        assert_eq!(state.binding, Binding::Unbound);
        assert_eq!(state.requested, PlayState::Playing);
        assert!(state.flags.is_empty());
        assert!(state.owns(7));
        assert!(!state.owns(6));
    }
}
