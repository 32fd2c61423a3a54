//! Track decoding using symphonia.
//!
//! A [`DecodeStream`] decodes one byte range of a [`BackingStore`]. The range is
//! exposed to symphonia as a seekable media source, so streamed packs read on
//! demand while memory packs read straight out of the shared blob.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use bytes::Bytes;
use chorus_core::{Error, Result};
use chorus_pack::{BackingStore, StoreKind, TrackRange};
use symphonia::core::{
    audio::{AudioBuffer, AudioBufferRef, Signal},
    codecs::{CodecRegistry, Decoder, DecoderOptions, CODEC_TYPE_NULL},
    conv::IntoSample,
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    sample::Sample,
};
use tracing::{debug, trace, warn};

/// Codecs available to decode streams.
#[cfg(feature = "opus")]
fn codec_registry() -> &'static CodecRegistry {
    use std::sync::OnceLock;
    use symphonia_adapter_libopus::OpusDecoder;

    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        registry.register_all::<OpusDecoder>();
        registry
    })
}

/// Codecs available to decode streams.
#[cfg(not(feature = "opus"))]
fn codec_registry() -> &'static CodecRegistry {
    symphonia::default::get_codecs()
}

/// Read cursor over `[start, start + len)` of a store.
struct StoreCursor {
    store: BackingStore,
    start: u64,
    len: u64,
    pos: u64,
}

impl Read for StoreCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = self.store.read_at(self.start + self.pos, &mut buf[..n])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for StoreCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.len) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of track",
            ));
        }
        self.pos = u64::try_from(target).unwrap_or(u64::MAX);
        Ok(self.pos)
    }
}

/// Backend-tagged byte source for one track.
enum RangeSource {
    File(StoreCursor),
    Memory(Cursor<Bytes>),
    Asset(StoreCursor),
}

impl RangeSource {
    fn new(track: &TrackRange) -> Result<Self> {
        let cursor = || StoreCursor {
            store: track.store.clone(),
            start: track.offset,
            len: track.size,
            pos: 0,
        };
        Ok(match track.store.kind() {
            StoreKind::File => Self::File(cursor()),
            StoreKind::Asset => Self::Asset(cursor()),
            StoreKind::Memory => {
                let bytes = track
                    .store
                    .memory_slice(track.offset, track.size)
                    .ok_or_else(|| Error::Pack("track range outside memory store".into()))?;
                Self::Memory(Cursor::new(bytes))
            }
        })
    }

    fn len(&self) -> u64 {
        match self {
            Self::File(c) | Self::Asset(c) => c.len,
            Self::Memory(c) => c.get_ref().len() as u64,
        }
    }
}

impl Read for RangeSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(c) | Self::Asset(c) => c.read(buf),
            Self::Memory(c) => c.read(buf),
        }
    }
}

impl Seek for RangeSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(c) | Self::Asset(c) => c.seek(pos),
            Self::Memory(c) => c.seek(pos),
        }
    }
}

impl MediaSource for RangeSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len())
    }
}

struct Opened {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    total: Option<u64>,
}

/// PCM decoder over one track of a pack.
///
/// Produces interleaved `f32` frames in the source channel layout. Holds a
/// reference to its backing store for as long as it lives.
pub struct DecodeStream {
    track: TrackRange,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    total: Option<u64>,
    position: u64,
    pending: Vec<f32>,
    pending_pos: usize,
    ended: bool,
}

impl DecodeStream {
    /// Probe the track header and prepare a decoder.
    ///
    /// Fails on unreadable data, a missing audio track, or a zero-length track.
    pub fn open(track: TrackRange) -> Result<Self> {
        let opened = Self::probe(&track)?;
        if opened.total == Some(0) {
            return Err(Error::Decode("track has no frames".into()));
        }
        debug!(
            "Opened stream: {:?} range {}+{}, {}Hz, {} channels, {:?} frames",
            track.store.kind(),
            track.offset,
            track.size,
            opened.sample_rate,
            opened.channels,
            opened.total
        );
        Ok(Self {
            track,
            format: opened.format,
            decoder: opened.decoder,
            track_id: opened.track_id,
            sample_rate: opened.sample_rate,
            channels: opened.channels,
            total: opened.total,
            position: 0,
            pending: Vec::new(),
            pending_pos: 0,
            ended: false,
        })
    }

    fn probe(track: &TrackRange) -> Result<Opened> {
        let source = RangeSource::new(track)?;
        let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&Hint::new(), mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe format: {e}")))?;
        let format = probed.format;

        let track_info = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio tracks found".to_string()))?;

        let params = &track_info.codec_params;
        let track_id = track_info.id;
        let sample_rate = params.sample_rate.unwrap_or(48000);
        let channels = params.channels.map_or(2, |c| c.count());
        let total = params.n_frames;

        let decoder = codec_registry()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("Failed to create decoder: {e}")))?;

        Ok(Opened {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            total,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Track length in frames, when the container reports it.
    pub const fn total(&self) -> Option<u64> {
        self.total
    }

    /// Frames delivered since the last rewind or seek.
    pub const fn position(&self) -> u64 {
        self.position
    }

    pub fn kind(&self) -> StoreKind {
        self.track.store.kind()
    }

    pub const fn store(&self) -> &BackingStore {
        &self.track.store
    }

    /// No more frames until the next rewind or seek.
    pub fn at_end(&self) -> bool {
        self.ended || self.total.is_some_and(|total| self.position >= total)
    }

    /// Decode up to `frames` frames into `dst`. Returns frames written.
    ///
    /// Never reads past the track length. Returns 0 only at end of stream.
    pub fn read(&mut self, dst: &mut [f32], frames: usize) -> Result<usize> {
        let channels = self.channels.max(1);
        let frames = frames.min(dst.len() / channels);
        let mut written = 0;

        while written < frames && !self.at_end() {
            if self.pending_pos >= self.pending.len() {
                if !self.decode_next()? {
                    self.ended = true;
                    break;
                }
                continue;
            }

            let available = (self.pending.len() - self.pending_pos) / channels;
            let mut n = available.min(frames - written);
            if let Some(total) = self.total {
                n = n.min(usize::try_from(total - self.position).unwrap_or(usize::MAX));
            }
            if n == 0 {
                // Partial trailing frame in a malformed packet.
                self.pending_pos = self.pending.len();
                continue;
            }

            let src = &self.pending[self.pending_pos..self.pending_pos + n * channels];
            dst[written * channels..(written + n) * channels].copy_from_slice(src);
            self.pending_pos += n * channels;
            self.position += n as u64;
            written += n;
        }

        trace!("Read {written} frames, position {}", self.position);
        Ok(written)
    }

    /// Restart from frame 0.
    ///
    /// Seeks the open container; a reader that cannot seek is re-probed.
    pub fn rewind(&mut self) -> Result<()> {
        let seek = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.track_id,
            },
        );
        match seek {
            Ok(seeked) if seeked.actual_ts == 0 => self.decoder.reset(),
            Ok(seeked) => {
                debug!("Rewind landed at {}, reopening", seeked.actual_ts);
                self.reopen()?;
            }
            Err(e) => {
                debug!("Rewind seek failed ({e}), reopening");
                self.reopen()?;
            }
        }
        self.clear_pending();
        self.position = 0;
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        let opened = Self::probe(&self.track)?;
        self.format = opened.format;
        self.decoder = opened.decoder;
        self.track_id = opened.track_id;
        Ok(())
    }

    /// Sample-accurate seek to `frame`.
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        if frame == 0 {
            return self.rewind();
        }
        if self.total.is_some_and(|total| frame > total) {
            return Err(Error::InvalidArgument(format!(
                "seek to {frame} past end of track"
            )));
        }

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| Error::Decode(format!("Seek failed: {e}")))?;

        self.decoder.reset();
        self.clear_pending();
        self.position = seeked.actual_ts;

        // The container lands on a packet boundary at or before the target.
        let channels = self.channels.max(1);
        let mut skip = seeked.required_ts.saturating_sub(seeked.actual_ts);
        while skip > 0 {
            if self.pending_pos >= self.pending.len() {
                if !self.decode_next()? {
                    self.ended = true;
                    break;
                }
                continue;
            }
            let available = (self.pending.len() - self.pending_pos) / channels;
            let n = available.min(usize::try_from(skip).unwrap_or(usize::MAX));
            if n == 0 {
                self.pending_pos = self.pending.len();
                continue;
            }
            self.pending_pos += n * channels;
            self.position += n as u64;
            skip -= n as u64;
        }
        Ok(())
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
        self.ended = false;
    }

    /// Decode the next packet into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    self.pending.clear();
                    self.pending_pos = 0;
                    append_interleaved(&decoded, &mut self.pending);
                    if !self.pending.is_empty() {
                        return Ok(true);
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {e}");
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Decode failed: {e}")));
                }
            }
        }
    }
}

/// Append a decoded buffer as interleaved f32 samples.
fn append_interleaved(buffer: &AudioBufferRef<'_>, out: &mut Vec<f32>) {
    match buffer {
        AudioBufferRef::U8(buf) => interleave(buf, out),
        AudioBufferRef::U16(buf) => interleave(buf, out),
        AudioBufferRef::U24(buf) => interleave(buf, out),
        AudioBufferRef::U32(buf) => interleave(buf, out),
        AudioBufferRef::S8(buf) => interleave(buf, out),
        AudioBufferRef::S16(buf) => interleave(buf, out),
        AudioBufferRef::S24(buf) => interleave(buf, out),
        AudioBufferRef::S32(buf) => interleave(buf, out),
        AudioBufferRef::F32(buf) => interleave(buf, out),
        AudioBufferRef::F64(buf) => interleave(buf, out),
    }
}

fn interleave<S>(buffer: &AudioBuffer<S>, out: &mut Vec<f32>)
where
    S: Sample + IntoSample<f32>,
{
    let planes = buffer.planes();
    let channel_planes = planes.planes();
    let frames = buffer.frames();
    out.reserve(frames * channel_planes.len());
    for frame in 0..frames {
        for plane in channel_planes {
            out.push(plane[frame].into_sample());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::test_util::{ramp_wav, single_track};

    #[test]
    fn test_open_reports_format() {
        let stream = DecodeStream::open(single_track(ramp_wav(1000, 48000))).unwrap();
        assert_eq!(stream.sample_rate(), 48000);
        assert_eq!(stream.channels(), 1);
        assert_eq!(stream.total(), Some(1000));
        assert_eq!(stream.kind(), StoreKind::Memory);
        assert!(!stream.at_end());
    }

    #[test]
    fn test_read_clamps_to_total() {
        let mut stream = DecodeStream::open(single_track(ramp_wav(1000, 48000))).unwrap();
        let mut buf = vec![0.0f32; 600];
        assert_eq!(stream.read(&mut buf, 600).unwrap(), 600);
        assert_eq!(stream.read(&mut buf, 600).unwrap(), 400);
        assert!(stream.at_end());
        assert_eq!(stream.read(&mut buf, 600).unwrap(), 0);
        assert_eq!(stream.position(), 1000);
    }

    #[test]
    fn test_samples_follow_ramp() {
        let mut stream = DecodeStream::open(single_track(ramp_wav(1000, 48000))).unwrap();
        let mut buf = vec![0.0f32; 10];
        stream.read(&mut buf, 10).unwrap();
        assert!((buf[3] - 3.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_rewind_restarts() {
        let mut stream = DecodeStream::open(single_track(ramp_wav(1000, 48000))).unwrap();
        let mut buf = vec![0.0f32; 1000];
        stream.read(&mut buf, 1000).unwrap();
        stream.rewind().unwrap();
        assert_eq!(stream.position(), 0);
        assert!(!stream.at_end());
        stream.read(&mut buf, 1).unwrap();
        assert!(buf[0].abs() < 1e-6);
    }

    #[test]
    fn test_rewind_replays_whole_track() {
        let mut stream = DecodeStream::open(single_track(ramp_wav(1000, 48000))).unwrap();
        let mut first = vec![0.0f32; 1000];
        let mut second = vec![0.0f32; 1000];
        assert_eq!(stream.read(&mut first, 1000).unwrap(), 1000);
        for _ in 0..3 {
            stream.rewind().unwrap();
            assert_eq!(stream.read(&mut second, 1000).unwrap(), 1000);
            assert_eq!(first, second);
            assert!(stream.at_end());
        }
    }

    #[test]
    fn test_seek_is_sample_accurate() {
        let mut stream = DecodeStream::open(single_track(ramp_wav(4000, 48000))).unwrap();
        stream.seek(2500).unwrap();
        assert_eq!(stream.position(), 2500);
        let mut buf = vec![0.0f32; 4];
        assert_eq!(stream.read(&mut buf, 4).unwrap(), 4);
        assert!((buf[0] - 2500.0 / 32768.0).abs() < 1e-6);
        assert!(stream.seek(4001).is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let track = single_track(vec![0xAB; 256]);
        assert!(matches!(DecodeStream::open(track), Err(Error::Decode(_))));
    }

    #[test]
    fn test_stream_holds_store() {
        let track = single_track(ramp_wav(100, 48000));
        let store = track.store.clone();
        let stream = DecodeStream::open(track).unwrap();
        assert!(store.ref_count() >= 2);
        drop(stream);
        assert_eq!(store.ref_count(), 1);
    }
}
