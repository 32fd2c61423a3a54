//! Audio output using cpal.

use std::sync::Arc;
use std::thread::JoinHandle;

use chorus_core::{DeviceFormat, Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info, warn};

use super::{AudioDevice, DeviceVoice, Mixer};
use crate::wake::EngineWaker;

/// Requested output format. Unset fields take the device default.
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Default output device playing a software [`Mixer`].
///
/// The cpal stream lives on its own thread because it is not `Send`.
pub struct CpalDevice {
    mixer: Arc<Mixer>,
    name: String,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalDevice {
    /// Open the default output device.
    pub fn open(config: &OutputConfig) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<(Arc<Mixer>, String)>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let config = config.clone();

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match start_stream(&config) {
                    Ok((stream, mixer, name)) => {
                        let _ = ready_tx.send(Ok((mixer, name)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the device handle drops its sender.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Audio output stream closed");
            })
            .map_err(|e| Error::Device(format!("Failed to spawn output thread: {e}")))?;

        let (mixer, name) = ready_rx
            .recv()
            .map_err(|_| Error::Device("Output thread exited during startup".to_string()))??;

        Ok(Self {
            mixer,
            name,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

impl AudioDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
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

fn start_stream(config: &OutputConfig) -> Result<(Stream, Arc<Mixer>, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("No output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio output device: {name}");

    let (stream_config, sample_format) = choose_config(&device, config)?;
    let format = DeviceFormat {
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
    };
    debug!(
        "Output config: {}Hz, {} channels, {sample_format:?}",
        format.sample_rate, format.channels
    );

    let mixer = Arc::new(Mixer::new(format));
    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, Arc::clone(&mixer))?,
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, Arc::clone(&mixer))?,
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, Arc::clone(&mixer))?,
        _ => {
            return Err(Error::Device(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::Device(format!("Failed to start stream: {e}")))?;

    Ok((stream, mixer, name))
}

/// Honour the requested rate and channel count when the device supports them.
fn choose_config(device: &Device, requested: &OutputConfig) -> Result<(StreamConfig, SampleFormat)> {
    let default = device
        .default_output_config()
        .map_err(|e| Error::Device(format!("Failed to get output config: {e}")))?;

    if requested.sample_rate.is_none() && requested.channels.is_none() {
        return Ok((default.config(), default.sample_format()));
    }

    let channels = requested.channels.unwrap_or_else(|| default.channels());
    let rate = cpal::SampleRate(requested.sample_rate.unwrap_or(default.sample_rate().0));
    let matching = device
        .supported_output_configs()
        .map_err(|e| Error::Device(format!("Failed to list output configs: {e}")))?
        .find(|range| {
            range.channels() == channels
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        });

    match matching {
        Some(range) => {
            let supported = range.with_sample_rate(rate);
            Ok((supported.config(), supported.sample_format()))
        }
        None => {
            warn!("Requested output format unavailable, using device default");
            Ok((default.config(), default.sample_format()))
        }
    }
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    mixer: Arc<Mixer>,
) -> Result<Stream> {
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| {
        error!("Audio stream error: {err}");
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let block = &mut scratch[..data.len()];
                mixer.mix(block);

                // Soft clipping using tanh for smooth limiting
                for (sample, &mixed) in data.iter_mut().zip(block.iter()) {
                    let limited = if mixed.abs() > 0.9 { mixed.tanh() } else { mixed };
                    *sample = T::from_sample(limited);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Device(format!("Failed to build stream: {e}")))
}

/// Names of available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::Device(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OutputConfig::default();
        assert!(config.sample_rate.is_none());
        assert!(config.channels.is_none());
    }

    #[test]
    fn test_list_devices() {
        // May fail on CI without audio hardware; must not panic either way.
        let _ = list_output_devices();
    }
}
