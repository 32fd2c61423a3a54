//! Sample-rate conversion using rubato.

use chorus_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames per resampler call.
const CHUNK_SIZE: usize = 1024;

/// Streaming resampler over interleaved samples.
///
/// Input is buffered until a full chunk is available, so output lags input by
/// up to one chunk until [`Resampler::flush`].
pub struct Resampler {
    inner: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk.
    input_buffer: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidArgument("resampler needs channels".into()));
        }
        let inner = FftFixedIn::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_SIZE,
            2,
            channels,
        )
        .map_err(|e| Error::InvalidArgument(format!("Failed to create resampler: {e}")))?;

        debug!("Resampler created: {input_rate}Hz -> {output_rate}Hz, {channels} channels");

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            input_buffer: vec![Vec::with_capacity(CHUNK_SIZE * 2); channels],
        })
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Input frames buffered but not yet resampled.
    pub fn buffered_frames(&self) -> usize {
        self.input_buffer[0].len()
    }

    /// Feed interleaved samples and append every completed chunk's output to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        for frame in input.chunks_exact(self.channels) {
            for (buffer, sample) in self.input_buffer.iter_mut().zip(frame) {
                buffer.push(*sample);
            }
        }

        while self.input_buffer[0].len() >= CHUNK_SIZE {
            let chunk: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_SIZE).collect())
                .collect();
            let resampled = self
                .inner
                .process(&chunk, None)
                .map_err(|e| Error::Decode(format!("Resample failed: {e}")))?;
            interleave_into(&resampled, usize::MAX, out);
        }
        Ok(())
    }

    /// Resample whatever is buffered, padding the final chunk with silence.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let remaining = self.input_buffer[0].len();
        if remaining == 0 {
            return Ok(());
        }

        let chunk: Vec<Vec<f32>> = self
            .input_buffer
            .iter_mut()
            .map(|ch| {
                let mut data = std::mem::take(ch);
                data.resize(CHUNK_SIZE, 0.0);
                data
            })
            .collect();
        let resampled = self
            .inner
            .process(&chunk, None)
            .map_err(|e| Error::Decode(format!("Resample failed: {e}")))?;

        // Only the non-padded portion
        let output_frames = (remaining as f64 * f64::from(self.output_rate)
            / f64::from(self.input_rate)) as usize;
        interleave_into(&resampled, output_frames, out);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.input_buffer.iter_mut().for_each(Vec::clear);
    }
}

/// Interleave up to `max_frames` frames of planar `channels` onto `out`.
fn interleave_into(channels: &[Vec<f32>], max_frames: usize, out: &mut Vec<f32>) {
    let Some(first) = channels.first() else {
        return;
    };
    let frames = first.len().min(max_frames);
    out.reserve(frames * channels.len());
    for frame in 0..frames {
        for ch in channels {
            out.push(ch[frame]);
        }
    }
}
