//! The playback engine.
//!
//! [`AudioEngine`] owns the voice, stream, and handle pools and one engine
//! thread. Callers submit play requests from any thread; requests never
//! block on decoding. The engine thread picks them up, decodes ahead into a
//! small ring of device buffers per voice, and retires voices that finish.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use chorus_core::{
    DeviceFormat, EngineConfig, Error, PackId, PlayerFlags, PoolKind, Result, TrackId,
    NUM_MAX_PACKS,
};
use chorus_pack::{AssetSource, ResourcePack, TrackRange};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::device::{AudioDevice, CpalDevice, OutputConfig};
use crate::handle::{Binding, HandleState, VoiceHandle};
use crate::pool::{PoolState, PoolStats, VoiceId};
use crate::voice::{ActiveStream, HandleRef, VoiceSlot};
use crate::wake::{EngineWaker, WakeEvent};
use crate::worker::EngineCore;

/// State shared by callers, handles, and the engine thread.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) format: DeviceFormat,
    pub(crate) device: Arc<dyn AudioDevice>,
    pub(crate) pool: Mutex<PoolState>,
    pub(crate) voices: Box<[VoiceSlot]>,
    pub(crate) streams: Box<[Mutex<Option<ActiveStream>>]>,
    pub(crate) handles: Box<[Mutex<HandleState>]>,
    /// Open streams hold their own store reference, so replacing a pack
    /// here never invalidates audio already playing from it.
    pub(crate) packs: RwLock<[Option<ResourcePack>; NUM_MAX_PACKS]>,
    pub(crate) waker: EngineWaker,
    pub(crate) running: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) ticks: AtomicU64,
}

impl Shared {
    fn new(config: EngineConfig, device: Arc<dyn AudioDevice>, waker: EngineWaker) -> Result<Self> {
        let format = device.format();
        let voices = (0..config.max_voices)
            .map(|_| {
                device
                    .create_voice(config.queued_buffers, config.frames_per_buffer)
                    .map(VoiceSlot::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let streams = (0..config.max_voices).map(|_| Mutex::new(None)).collect();
        let handles = (0..config.max_handles)
            .map(|_| Mutex::new(HandleState::default()))
            .collect();
        device.attach_waker(waker.clone());

        Ok(Self {
            pool: Mutex::new(PoolState::new(config.max_voices, config.max_handles)),
            voices: voices.into_boxed_slice(),
            streams,
            handles,
            packs: RwLock::new(std::array::from_fn(|_| None)),
            waker,
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            config,
            format,
            device,
        })
    }

    fn resolve(&self, pack: i32, track: TrackId) -> Result<TrackRange> {
        let id = PackId::new(pack)?;
        let packs = self.packs.read();
        let loaded = packs[id.index()].as_ref().ok_or(Error::PackNotLoaded(id))?;
        loaded.track(track).ok_or(Error::TrackOutOfRange {
            pack: id,
            track,
            tracks: loaded.len(),
        })
    }

    /// Reserve a voice and stream slot, open the track, and queue the voice.
    /// Nothing stays reserved when this fails.
    pub(crate) fn submit(
        &self,
        track: TrackRange,
        gain: f32,
        flags: PlayerFlags,
        handle: Option<HandleRef>,
    ) -> Result<VoiceId> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::EngineTerminated);
        }

        let (voice, slot) = {
            let mut pool = self.pool.lock();
            let voice = pool
                .acquire_voice()
                .ok_or(Error::PoolExhausted(PoolKind::Voice))?;
            match pool.acquire_stream() {
                Some(slot) => (voice, slot),
                None => {
                    pool.release_voice(voice);
                    return Err(Error::PoolExhausted(PoolKind::Stream));
                }
            }
        };

        // Probing the header reads from the store; keep it outside the pool lock.
        let stream = match ActiveStream::open(track, self.format) {
            Ok(stream) => stream,
            Err(e) => {
                let mut pool = self.pool.lock();
                pool.release_stream(slot);
                pool.release_voice(voice);
                return Err(e);
            }
        };

        *self.streams[slot].lock() = Some(stream);
        self.voices[voice]
            .state
            .lock()
            .prepare(slot, flags, gain.clamp(0.0, 1.0), handle);
        if let Some(h) = handle {
            self.handles[h.index].lock().binding = Binding::BoundTo(voice);
        }

        // Re-checked under the pool lock: shutdown closes the queue in the
        // same critical section as its final drain.
        if !self.pool.lock().push_request(voice) {
            self.abandon(voice, slot, handle);
            return Err(Error::EngineTerminated);
        }
        self.waker.wake();
        debug!("Queued voice {voice} on stream slot {slot}");
        Ok(voice)
    }

    /// Undo a submission that lost the race with shutdown.
    fn abandon(&self, voice: VoiceId, slot: usize, handle: Option<HandleRef>) {
        if let Some(h) = handle {
            let mut state = self.handles[h.index].lock();
            if state.owns(h.generation) {
                state.unbind();
            }
        }
        self.voices[voice].state.lock().reset();
        self.streams[slot].lock().take();
        let mut pool = self.pool.lock();
        pool.release_stream(slot);
        pool.release_voice(voice);
        debug!("Dropped voice {voice}: engine terminated");
    }
}

enum Driver {
    Threaded(JoinHandle<()>),
    Manual { core: Box<EngineCore>, wake: WakeEvent },
    Stopped,
}

/// Pooled voice playback engine.
///
/// ```no_run
/// use chorus_audio::AudioEngine;
/// use chorus_core::EngineConfig;
///
/// let engine = AudioEngine::with_default_output(EngineConfig::default())?;
/// engine.load_resource_pack(0, "sfx.pak", false)?;
/// engine.play(0, 3, 0.8)?;
/// # Ok::<(), chorus_core::Error>(())
/// ```
pub struct AudioEngine {
    shared: Arc<Shared>,
    driver: Mutex<Driver>,
}

impl AudioEngine {
    /// Start an engine on `device` with its own engine thread.
    pub fn initialize(config: EngineConfig, device: Arc<dyn AudioDevice>) -> Result<Self> {
        config.validate()?;
        let (waker, wake) = WakeEvent::new();
        let shared = Arc::new(Shared::new(config, device, waker)?);
        let core = EngineCore::new(Arc::clone(&shared));

        let thread = std::thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || core.run(wake))
            .map_err(|e| Error::Device(format!("Failed to spawn engine thread: {e}")))?;

        Self::log_started(&shared);
        Ok(Self {
            shared,
            driver: Mutex::new(Driver::Threaded(thread)),
        })
    }

    /// Start an engine with no thread. Ticks run only inside [`Self::update`].
    pub fn manual(config: EngineConfig, device: Arc<dyn AudioDevice>) -> Result<Self> {
        config.validate()?;
        let (waker, wake) = WakeEvent::new();
        let shared = Arc::new(Shared::new(config, device, waker)?);
        let core = Box::new(EngineCore::new(Arc::clone(&shared)));

        Self::log_started(&shared);
        Ok(Self {
            shared,
            driver: Mutex::new(Driver::Manual { core, wake }),
        })
    }

    /// Start a threaded engine on the default output device.
    pub fn with_default_output(config: EngineConfig) -> Result<Self> {
        let device = CpalDevice::open(&OutputConfig::default())?;
        Self::initialize(config, Arc::new(device))
    }

    fn log_started(shared: &Shared) {
        info!(
            "Audio engine started on {}: {}Hz, {} channels, {} voices, {} handles",
            shared.device.name(),
            shared.format.sample_rate,
            shared.format.channels,
            shared.config.max_voices,
            shared.config.max_handles
        );
    }

    /// Stop the engine thread, retire every voice, and unload every pack.
    ///
    /// Later calls, and plays issued afterwards, fail with
    /// [`Error::EngineTerminated`]. Safe to call more than once.
    pub fn terminate(&self) {
        let mut driver = self.driver.lock();
        match std::mem::replace(&mut *driver, Driver::Stopped) {
            Driver::Stopped => return,
            Driver::Threaded(thread) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.waker.wake();
                if thread.join().is_err() {
                    error!("Audio engine thread panicked");
                }
            }
            Driver::Manual { mut core, .. } => {
                self.shared.running.store(false, Ordering::Release);
                core.shutdown();
            }
        }
        for pack in self.shared.packs.write().iter_mut() {
            pack.take();
        }
        info!("Audio engine terminated");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Run one tick now in manual mode; schedule one in threaded mode.
    pub fn update(&self) {
        let mut driver = self.driver.lock();
        match &mut *driver {
            Driver::Manual { core, wake } => {
                wake.clear();
                core.tick();
            }
            Driver::Threaded(_) => self.shared.waker.wake(),
            Driver::Stopped => {}
        }
    }

    /// Pause or resume everything. Handle-level pauses survive a resume.
    pub fn set_pause(&self, pause: bool) {
        self.shared.paused.store(pause, Ordering::Release);
        // Wake either way; a paused engine thread sleeps without a timeout.
        self.shared.waker.wake();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.shared.device.set_master_gain(gain);
    }

    /// Open a pack file into slot `id`, replacing any pack already there.
    ///
    /// With `streamed` the file stays open and tracks are read on demand;
    /// otherwise the whole file is read into memory.
    pub fn load_resource_pack(
        &self,
        id: i32,
        path: impl AsRef<Path>,
        streamed: bool,
    ) -> Result<PackId> {
        let id = PackId::new(id)?;
        let pack = ResourcePack::open(path.as_ref(), streamed)?;
        self.install(id, pack)
    }

    pub fn load_resource_pack_from_memory(&self, id: i32, data: impl Into<Bytes>) -> Result<PackId> {
        let id = PackId::new(id)?;
        let pack = ResourcePack::from_bytes(data)?;
        self.install(id, pack)
    }

    /// Load from a platform asset. Always streamed.
    pub fn load_resource_pack_from_asset(
        &self,
        id: i32,
        asset: Arc<dyn AssetSource>,
    ) -> Result<PackId> {
        let id = PackId::new(id)?;
        let pack = ResourcePack::from_asset(asset)?;
        self.install(id, pack)
    }

    /// Put an already parsed pack into slot `id`.
    pub fn install_resource_pack(&self, id: i32, pack: ResourcePack) -> Result<PackId> {
        self.install(PackId::new(id)?, pack)
    }

    fn install(&self, id: PackId, pack: ResourcePack) -> Result<PackId> {
        let (tracks, kind) = (pack.len(), pack.kind());
        let old = {
            // Checked under the lock so terminate's clear cannot be undone.
            let mut packs = self.shared.packs.write();
            if !self.is_running() {
                return Err(Error::EngineTerminated);
            }
            packs[id.index()].replace(pack)
        };
        info!("Loaded resource pack {id}: {tracks} tracks, {kind:?}");
        if old.is_some() {
            debug!("Replaced resource pack {id}");
        }
        Ok(id)
    }

    /// Empty slot `id`. Voices already playing from it keep playing.
    pub fn unload_resource_pack(&self, id: i32) -> Result<()> {
        let id = PackId::new(id)?;
        if self.shared.packs.write()[id.index()].take().is_none() {
            return Err(Error::PackNotLoaded(id));
        }
        info!("Unloaded resource pack {id}");
        Ok(())
    }

    /// Tracks in the pack loaded at `id`.
    pub fn track_count(&self, id: i32) -> Result<usize> {
        let id = PackId::new(id)?;
        self.shared.packs.read()[id.index()]
            .as_ref()
            .map(ResourcePack::len)
            .ok_or(Error::PackNotLoaded(id))
    }

    /// Fire-and-forget playback of `track` from pack `pack`.
    ///
    /// Returns once the request is queued; audio starts on the next tick.
    pub fn play(&self, pack: i32, track: TrackId, gain: f32) -> Result<()> {
        self.play_with_flags(pack, track, gain, PlayerFlags::empty())
    }

    pub fn play_with_flags(
        &self,
        pack: i32,
        track: TrackId,
        gain: f32,
        flags: PlayerFlags,
    ) -> Result<()> {
        let range = self.shared.resolve(pack, track)?;
        self.shared.submit(range, gain, flags, None)?;
        Ok(())
    }

    /// Start `track` under a handle the caller controls.
    ///
    /// The voice starts playing unless the handle is paused before the engine
    /// picks it up.
    pub fn create_voice_handle(&self, pack: i32, track: TrackId) -> Result<VoiceHandle> {
        self.create_voice_handle_with_flags(pack, track, PlayerFlags::empty())
    }

    /// [`Self::create_voice_handle`] with flags in effect from the first buffer.
    pub fn create_voice_handle_with_flags(
        &self,
        pack: i32,
        track: TrackId,
        flags: PlayerFlags,
    ) -> Result<VoiceHandle> {
        let range = self.shared.resolve(pack, track)?;
        if !self.is_running() {
            return Err(Error::EngineTerminated);
        }
        let index = self
            .shared
            .pool
            .lock()
            .acquire_handle()
            .ok_or(Error::PoolExhausted(PoolKind::Handle))?;
        let generation = {
            let mut slot = self.shared.handles[index].lock();
            slot.reuse();
            slot.flags = flags;
            slot.generation
        };
        // Dropping the handle on failure returns the slot.
        let handle = VoiceHandle::new(Arc::clone(&self.shared), index, generation);
        self.shared
            .submit(range, 1.0, flags, Some(HandleRef { index, generation }))?;
        Ok(handle)
    }

    pub fn destroy_voice_handle(&self, handle: VoiceHandle) {
        drop(handle);
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.lock().stats()
    }

    /// Ticks completed since start.
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    pub fn format(&self) -> DeviceFormat {
        self.shared.format
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.terminate();
    }
}
