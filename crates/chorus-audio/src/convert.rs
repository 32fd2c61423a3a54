//! Conversion from decoded PCM to the device format.

use std::collections::VecDeque;

use chorus_core::{DeviceFormat, Result};

use crate::resample::Resampler;

/// Maps channel layout and sample rate of one source onto the device format.
///
/// Converted samples queue up in a FIFO that callers drain one device buffer
/// at a time, so a source read never has to line up with buffer boundaries.
pub struct FormatConverter {
    src_channels: usize,
    src_rate: u32,
    dst: DeviceFormat,
    resampler: Option<Resampler>,
    mapped: Vec<f32>,
    resampled: Vec<f32>,
    pending: VecDeque<f32>,
}

impl FormatConverter {
    pub fn new(src_channels: usize, src_rate: u32, dst: DeviceFormat) -> Result<Self> {
        let resampler = if src_rate == dst.sample_rate {
            None
        } else {
            Some(Resampler::new(src_rate, dst.sample_rate, usize::from(dst.channels))?)
        };
        Ok(Self {
            src_channels: src_channels.max(1),
            src_rate,
            dst,
            resampler,
            mapped: Vec::new(),
            resampled: Vec::new(),
            pending: VecDeque::new(),
        })
    }

    pub const fn needs_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    pub const fn src_channels(&self) -> usize {
        self.src_channels
    }

    /// Source frames to read for roughly `dst_frames` output frames.
    pub fn source_frames_for(&self, dst_frames: usize) -> usize {
        if self.resampler.is_none() {
            return dst_frames.max(1);
        }
        let needed = (dst_frames as u64 * u64::from(self.src_rate))
            .div_ceil(u64::from(self.dst.sample_rate));
        (needed as usize).max(1)
    }

    /// Convert interleaved source samples and queue them.
    pub fn push(&mut self, input: &[f32]) -> Result<()> {
        self.mapped.clear();
        map_channels(
            input,
            self.src_channels,
            usize::from(self.dst.channels),
            &mut self.mapped,
        );
        match &mut self.resampler {
            Some(resampler) => {
                self.resampled.clear();
                resampler.process(&self.mapped, &mut self.resampled)?;
                self.pending.extend(&self.resampled);
            }
            None => self.pending.extend(&self.mapped),
        }
        Ok(())
    }

    /// Flush resampler latency at end of stream.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(resampler) = &mut self.resampler {
            self.resampled.clear();
            resampler.flush(&mut self.resampled)?;
            self.pending.extend(&self.resampled);
        }
        Ok(())
    }

    /// Move up to `max_samples` converted samples onto `out`. Returns the count moved.
    pub fn drain_into(&mut self, out: &mut Vec<f32>, max_samples: usize) -> usize {
        let n = max_samples.min(self.pending.len());
        out.extend(self.pending.drain(..n));
        n
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
            && self
                .resampler
                .as_ref()
                .is_none_or(|r| r.buffered_frames() == 0)
    }

    /// Drop queued output and resampler state.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }
}

/// Up-mix by duplication, down-mix to mono by averaging, otherwise copy and zero-fill.
fn map_channels(input: &[f32], src: usize, dst: usize, out: &mut Vec<f32>) {
    if src == dst {
        out.extend_from_slice(input);
        return;
    }
    out.reserve(input.len() / src * dst);
    for frame in input.chunks_exact(src) {
        if src == 1 {
            out.extend(std::iter::repeat_n(frame[0], dst));
        } else if dst == 1 {
            out.push(frame.iter().sum::<f32>() / src as f32);
        } else {
            let copied = src.min(dst);
            out.extend_from_slice(&frame[..copied]);
            out.extend(std::iter::repeat_n(0.0, dst - copied));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    fn format(sample_rate: u32, channels: u16) -> DeviceFormat {
        DeviceFormat {
            sample_rate,
            channels,
        }
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mut conv = FormatConverter::new(1, 48000, format(48000, 2)).unwrap();
        conv.push(&[0.1, 0.2]).unwrap();
        let mut out = Vec::new();
        assert_eq!(conv.drain_into(&mut out, 16), 4);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
        assert!(conv.is_drained());
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut conv = FormatConverter::new(2, 48000, format(48000, 1)).unwrap();
        conv.push(&[0.2, 0.4, -1.0, 1.0]).unwrap();
        let mut out = Vec::new();
        conv.drain_into(&mut out, 16);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn test_surround_to_stereo_copies_front() {
        let mut out = Vec::new();
        map_channels(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_drain_respects_limit() {
        let mut conv = FormatConverter::new(1, 48000, format(48000, 1)).unwrap();
        conv.push(&[0.5; 10]).unwrap();
        let mut out = Vec::new();
        assert_eq!(conv.drain_into(&mut out, 4), 4);
        assert_eq!(conv.pending_samples(), 6);
        conv.reset();
        assert!(conv.is_drained());
    }

    #[test]
    fn test_resampled_length() {
        let mut conv = FormatConverter::new(1, 44100, format(48000, 1)).unwrap();
        assert!(conv.needs_resampling());
        assert_eq!(conv.source_frames_for(480), 441);
        conv.push(&vec![0.0; 4410]).unwrap();
        conv.finish().unwrap();
        let produced = conv.pending_samples();
        assert!((3500..=5600).contains(&produced), "produced {produced}");
    }
}
