//! cpal output stream feeding from an [`AudioBridge`].

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};
use tracing::{debug, error, warn};

use crate::audio::{AudioBridge, OutputFormat};
use crate::error::StartupError;
use crate::options::RuntimeOptions;

/// Converted in chunks of this many samples for integer devices.
const SCRATCH_SAMPLES: usize = 4096;

/// A playing output stream. Dropping it stops playback.
pub struct AudioOutput {
    _stream: Stream,
    format: OutputFormat,
}

impl AudioOutput {
    /// Open the default output device in the format `bridge` was built for
    /// and start pulling from it.
    pub fn open(bridge: &Arc<AudioBridge>, options: &RuntimeOptions) -> Result<Self, StartupError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(StartupError::NoAudioDevice)?;
        let sample_format = device
            .default_output_config()
            .map_err(|e| StartupError::Audio(format!("no default output config: {e}")))?
            .sample_format();

        let format = bridge.output_format();
        let mut config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Fixed(options.audio_buffers),
        };

        let stream = match build_stream(&device, &config, sample_format, bridge) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, buffers = options.audio_buffers, "fixed buffer size refused, using the device default");
                config.buffer_size = BufferSize::Default;
                build_stream(&device, &config, sample_format, bridge)?
            }
        };

        stream
            .play()
            .map_err(|e| StartupError::Audio(format!("failed to start stream: {e}")))?;

        debug!(
            device = %device.name().unwrap_or_default(),
            rate = format.sample_rate,
            channels = format.channels,
            ?sample_format,
            "audio stream started"
        );
        Ok(Self {
            _stream: stream,
            format,
        })
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    bridge: &Arc<AudioBridge>,
) -> Result<Stream, StartupError> {
    let on_error = |err: cpal::StreamError| error!("audio stream error: {err}");

    let result = match sample_format {
        SampleFormat::F32 => {
            let bridge = Arc::clone(bridge);
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    bridge.fill(data);
                },
                on_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let bridge = Arc::clone(bridge);
            let mut scratch = vec![0.0f32; SCRATCH_SAMPLES];
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(SCRATCH_SAMPLES) {
                        let samples = &mut scratch[..chunk.len()];
                        bridge.fill(samples);
                        for (out, &s) in chunk.iter_mut().zip(samples.iter()) {
                            *out = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        }
                    }
                },
                on_error,
                None,
            )
        }
        SampleFormat::U16 => {
            let bridge = Arc::clone(bridge);
            let mut scratch = vec![0.0f32; SCRATCH_SAMPLES];
            device.build_output_stream(
                config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(SCRATCH_SAMPLES) {
                        let samples = &mut scratch[..chunk.len()];
                        bridge.fill(samples);
                        for (out, &s) in chunk.iter_mut().zip(samples.iter()) {
                            *out = (s * 32767.0 + 32768.0).clamp(0.0, 65535.0) as u16;
                        }
                    }
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(StartupError::Audio(format!(
                "unsupported sample format {other:?}"
            )));
        }
    };

    result.map_err(|e| StartupError::Audio(format!("failed to build stream: {e}")))
}
