//! WAV and pack fixtures for tests.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::io::Cursor;

use chorus_pack::{PackWriter, ResourcePack, TrackRange};

/// 16-bit PCM WAV with `frames` frames of `sample(i)` on every channel.
pub(crate) fn wav(frames: usize, rate: u32, channels: u16, sample: impl Fn(usize) -> i16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample(sample(i)).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Mono ramp: frame `i` holds `i / 32768`.
pub(crate) fn ramp_wav(frames: usize, rate: u32) -> Vec<u8> {
    wav(frames, rate, 1, |i| (i % 32768) as i16)
}

/// Mono constant at half scale.
pub(crate) fn half_scale_wav(frames: usize, rate: u32) -> Vec<u8> {
    wav(frames, rate, 1, |_| 16384)
}

pub(crate) fn pack_bytes(tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut writer = PackWriter::new();
    for (i, track) in tracks.iter().enumerate() {
        writer.push(format!("track{i}.wav"), track.clone());
    }
    writer.to_bytes().unwrap()
}

/// Track 0 of an in-memory pack holding only `payload`.
pub(crate) fn single_track(payload: Vec<u8>) -> TrackRange {
    ResourcePack::from_bytes(pack_bytes(&[payload]))
        .unwrap()
        .track(0)
        .unwrap()
}
