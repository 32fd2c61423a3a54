//! Voice records and the per-voice stream that feeds them.

use std::sync::Arc;

use chorus_core::{DeviceFormat, PlayerFlags, Result};
use chorus_pack::TrackRange;
use parking_lot::Mutex;

use crate::convert::FormatConverter;
use crate::decode::DecodeStream;
use crate::device::DeviceVoice;

/// Rewinds allowed while filling one buffer, so a looping track shorter than
/// a buffer cannot spin forever.
const MAX_LOOP_PASSES: usize = 4;

/// Lifecycle of a voice as tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    /// In the free pool.
    #[default]
    Free,
    /// Queued for the engine thread.
    Requested,
    /// Being initialized on the engine thread.
    Initial,
    Playing,
    Paused,
    /// Drained; retired this tick.
    Stopped,
    /// Being returned to the pool.
    Retiring,
}

/// Binding from a voice back to the handle that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandleRef {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// Engine-side record for one voice.
#[derive(Debug, Default)]
pub(crate) struct Voice {
    pub(crate) state: VoiceState,
    pub(crate) flags: PlayerFlags,
    pub(crate) gain: f32,
    pub(crate) handle: Option<HandleRef>,
    pub(crate) stream: Option<usize>,
    /// The stream has produced its last buffer.
    pub(crate) exhausted: bool,
}

impl Voice {
    pub(crate) fn prepare(
        &mut self,
        stream: usize,
        flags: PlayerFlags,
        gain: f32,
        handle: Option<HandleRef>,
    ) {
        *self = Self {
            state: VoiceState::Requested,
            flags,
            gain,
            handle,
            stream: Some(stream),
            exhausted: false,
        };
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A voice arena slot: the device voice created at startup plus its record.
pub(crate) struct VoiceSlot {
    pub(crate) device: Arc<dyn DeviceVoice>,
    pub(crate) state: Mutex<Voice>,
}

impl VoiceSlot {
    pub(crate) fn new(device: Arc<dyn DeviceVoice>) -> Self {
        Self {
            device,
            state: Mutex::new(Voice::default()),
        }
    }
}

/// Result of filling one device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fill {
    pub(crate) frames: usize,
    /// No further audio will follow.
    pub(crate) finished: bool,
}

/// Decoder plus format conversion for one playing track.
pub(crate) struct ActiveStream {
    decoder: DecodeStream,
    converter: FormatConverter,
    channels: usize,
    scratch: Vec<f32>,
    flushed: bool,
}

impl ActiveStream {
    pub(crate) fn open(track: TrackRange, format: DeviceFormat) -> Result<Self> {
        let decoder = DecodeStream::open(track)?;
        let converter = FormatConverter::new(decoder.channels(), decoder.sample_rate(), format)?;
        Ok(Self {
            decoder,
            converter,
            channels: usize::from(format.channels).max(1),
            scratch: Vec::new(),
            flushed: false,
        })
    }

    /// Fill `out` with up to `frames` device frames.
    ///
    /// A looping stream rewinds at the end of the track and keeps going. A
    /// short block is only returned at the true end of a non-looping stream.
    pub(crate) fn fill_block(
        &mut self,
        out: &mut Vec<f32>,
        frames: usize,
        looping: bool,
    ) -> Result<Fill> {
        let want = frames * self.channels;
        let src_channels = self.decoder.channels().max(1);
        let mut passes = 0;
        out.clear();

        loop {
            self.converter.drain_into(out, want - out.len());
            if out.len() >= want {
                break;
            }

            if self.decoder.at_end() {
                if looping {
                    if passes == MAX_LOOP_PASSES {
                        break;
                    }
                    passes += 1;
                    self.decoder.rewind()?;
                    self.flushed = false;
                    continue;
                }
                if self.flushed {
                    break;
                }
                self.converter.finish()?;
                self.flushed = true;
                continue;
            }

            let src_frames = self
                .converter
                .source_frames_for((want - out.len()) / self.channels);
            self.scratch.resize(src_frames * src_channels, 0.0);
            let read = self.decoder.read(&mut self.scratch, src_frames)?;
            self.converter.push(&self.scratch[..read * src_channels])?;
        }

        Ok(Fill {
            frames: out.len() / self.channels,
            finished: !looping && self.flushed && self.converter.is_drained(),
        })
    }
}
