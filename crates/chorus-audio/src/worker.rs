//! Engine tick: request intake, buffer refill, system pause, and retirement.
//!
//! All decoding happens here, never on the caller's thread or in the device
//! callback. A tick runs on the engine thread in threaded mode, or inside
//! [`crate::AudioEngine::update`] in manual mode.

use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chorus_core::{Error, PlayState, PlayerFlags, Result};
use tracing::{debug, info, trace, warn};

use crate::engine::Shared;
use crate::handle::Binding;
use crate::pool::VoiceId;
use crate::voice::{Voice, VoiceSlot, VoiceState};
use crate::wake::{WaitOutcome, WakeEvent};

enum Step {
    Keep,
    Retire,
}

/// Engine-thread state. Owns the list of active voices.
pub(crate) struct EngineCore {
    shared: Arc<Shared>,
    active: Vec<VoiceId>,
    batch: Vec<VoiceId>,
    retired: Vec<VoiceId>,
    freed_streams: Vec<usize>,
    block: Vec<f32>,
    applied_pause: bool,
}

impl EngineCore {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let voices = shared.config.max_voices;
        let block = shared.format.samples(shared.config.frames_per_buffer);
        Self {
            shared,
            active: Vec::with_capacity(voices),
            batch: Vec::with_capacity(voices),
            retired: Vec::with_capacity(voices),
            freed_streams: Vec::with_capacity(voices),
            block: Vec::with_capacity(block),
            applied_pause: false,
        }
    }

    /// Engine thread body. Returns after `running` is cleared.
    pub(crate) fn run(mut self, wake: WakeEvent) {
        info!("Audio engine thread started");
        while self.shared.running.load(Ordering::Acquire) {
            // Paused with nothing to do: sleep until someone signals.
            let timeout = if self.shared.paused.load(Ordering::Acquire) {
                None
            } else {
                Some(self.shared.config.idle_wait())
            };
            if wake.wait(timeout) == WaitOutcome::Closed {
                break;
            }
            if !self.shared.running.load(Ordering::Acquire) {
                break;
            }
            self.tick();
        }
        self.shutdown();
        info!("Audio engine thread stopped");
    }

    pub(crate) fn tick(&mut self) {
        let paused = self.shared.paused.load(Ordering::Acquire);
        self.start_requested(paused);
        self.service_active();
        if paused != self.applied_pause {
            self.apply_system_pause(paused);
        }
        self.release_retired();
        let tick = self.shared.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Tick {tick}: {} active voices", self.active.len());
    }

    /// Retire every voice, including ones still queued.
    pub(crate) fn shutdown(&mut self) {
        {
            let mut pool = self.shared.pool.lock();
            pool.close();
            pool.take_requests(&mut self.batch);
        }
        self.retired.append(&mut self.batch);
        self.retired.append(&mut self.active);
        self.release_retired();
    }

    fn start_requested(&mut self, paused: bool) {
        self.shared.pool.lock().take_requests(&mut self.batch);
        if self.batch.is_empty() {
            return;
        }
        let batch = mem::take(&mut self.batch);
        for &id in &batch {
            if start_voice(&self.shared, id, paused, &mut self.block) {
                self.active.push(id);
            } else {
                self.retired.push(id);
            }
        }
        self.batch = batch;
        self.batch.clear();
    }

    fn service_active(&mut self) {
        let Self {
            shared,
            active,
            retired,
            block,
            ..
        } = self;
        let shared: &Shared = shared;
        active.retain(|&id| match service_voice(shared, id, block) {
            Step::Keep => true,
            Step::Retire => {
                retired.push(id);
                false
            }
        });
    }

    /// Snap every active voice to the system pause, or back to its own intent.
    fn apply_system_pause(&mut self, paused: bool) {
        let shared = &*self.shared;
        for &id in &self.active {
            let slot = &shared.voices[id];
            let voice = slot.state.lock();
            match voice.handle {
                Some(h) => {
                    let handle = shared.handles[h.index].lock();
                    if !handle.owns(h.generation) {
                        continue;
                    }
                    let state = if paused || handle.requested == PlayState::Paused {
                        PlayState::Paused
                    } else {
                        PlayState::Playing
                    };
                    slot.device.set_play_state(state);
                }
                None => slot.device.set_play_state(if paused {
                    PlayState::Paused
                } else {
                    PlayState::Playing
                }),
            }
        }
        self.applied_pause = paused;
        info!(
            "System {} applied to {} voices",
            if paused { "pause" } else { "resume" },
            self.active.len()
        );
    }

    /// Return retired voices and their streams to the pools in one batch.
    fn release_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        let shared = &*self.shared;
        for &id in &self.retired {
            let slot = &shared.voices[id];
            let mut voice = slot.state.lock();
            voice.state = VoiceState::Retiring;
            if let Some(h) = voice.handle.take() {
                let mut handle = shared.handles[h.index].lock();
                if handle.owns(h.generation) {
                    handle.unbind();
                }
            }
            slot.device.reset();
            if let Some(stream) = voice.stream.take() {
                // Drops the decoder and its backing store reference.
                shared.streams[stream].lock().take();
                self.freed_streams.push(stream);
            }
            voice.reset();
        }
        shared
            .pool
            .lock()
            .release_retired(&self.retired, &self.freed_streams);
        debug!("Retired {} voices", self.retired.len());
        self.retired.clear();
        self.freed_streams.clear();
    }
}

/// First fill and initial play state for a newly requested voice.
/// Returns false when the voice should be retired instead.
fn start_voice(shared: &Shared, id: VoiceId, paused: bool, block: &mut Vec<f32>) -> bool {
    let slot = &shared.voices[id];
    let mut voice = slot.state.lock();
    voice.state = VoiceState::Initial;

    let mut pitch = 1.0;
    if let Some(h) = voice.handle {
        let handle = shared.handles[h.index].lock();
        if !handle.owns(h.generation) {
            debug!("Voice {id} released before it started");
            return false;
        }
        voice.flags = handle.flags;
        voice.gain = handle.gain;
        pitch = handle.pitch;
    }
    slot.device.set_gain(voice.gain);
    slot.device.set_pitch(pitch);

    if let Err(e) = refill(shared, &mut voice, slot, block) {
        warn!("Voice {id} failed to start: {e}");
        return false;
    }

    let system = |intent: PlayState| if paused { PlayState::Paused } else { intent };
    let intent = match voice.handle {
        Some(h) => {
            // Held across the state change so a concurrent pause is not lost.
            let mut handle = shared.handles[h.index].lock();
            if !handle.owns(h.generation) {
                return false;
            }
            handle.initialized = true;
            let intent = if handle.requested == PlayState::Paused {
                PlayState::Paused
            } else {
                PlayState::Playing
            };
            slot.device.set_play_state(system(intent));
            intent
        }
        None => {
            slot.device.set_play_state(system(PlayState::Playing));
            PlayState::Playing
        }
    };
    voice.state = if intent == PlayState::Paused {
        VoiceState::Paused
    } else {
        VoiceState::Playing
    };
    debug!("Voice {id} started ({:?})", voice.state);
    true
}

fn service_voice(shared: &Shared, id: VoiceId, block: &mut Vec<f32>) -> Step {
    let slot = &shared.voices[id];
    let mut voice = slot.state.lock();

    if let Some(h) = voice.handle {
        let handle = shared.handles[h.index].lock();
        if !handle.owns(h.generation) || handle.binding != Binding::BoundTo(id) {
            return Step::Retire;
        }
        voice.flags = handle.flags;
    }

    let device_state = slot.device.play_state();
    if device_state == PlayState::Stopped {
        return Step::Retire;
    }
    match slot.device.take_consumed() {
        Ok(consumed) => trace!("Voice {id} consumed {consumed} buffers"),
        Err(e) => {
            warn!("Device error on voice {id}, retiring: {e}");
            return Step::Retire;
        }
    }
    if let Err(e) = refill(shared, &mut voice, slot, block) {
        warn!("Voice {id} stream failed, retiring: {e}");
        return Step::Retire;
    }

    if voice.exhausted && slot.device.queued() == 0 {
        voice.state = VoiceState::Stopped;
        debug!("Voice {id} finished");
        return Step::Retire;
    }
    voice.state = if device_state == PlayState::Paused {
        VoiceState::Paused
    } else {
        VoiceState::Playing
    };
    Step::Keep
}

/// Top up the device queue from the voice's stream.
fn refill(shared: &Shared, voice: &mut Voice, slot: &VoiceSlot, block: &mut Vec<f32>) -> Result<()> {
    if voice.exhausted {
        return Ok(());
    }
    let stream_slot = voice
        .stream
        .ok_or_else(|| Error::InvalidArgument("voice has no stream".into()))?;
    let mut guard = shared.streams[stream_slot].lock();
    let stream = guard
        .as_mut()
        .ok_or_else(|| Error::InvalidArgument(format!("stream slot {stream_slot} is empty")))?;

    let looping = voice.flags.contains(PlayerFlags::LOOP);
    let free = slot.device.capacity().saturating_sub(slot.device.queued());
    for _ in 0..free {
        let fill = stream.fill_block(block, shared.config.frames_per_buffer, looping)?;
        if fill.frames > 0 {
            slot.device.submit(block)?;
        }
        if fill.finished {
            voice.exhausted = true;
            break;
        }
        if fill.frames == 0 {
            break;
        }
    }
    Ok(())
}
