//! Microphone capture feeding the level meter

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};

use super::devices::find_input_device;
use super::levels::LevelSender;
use crate::track::TrackSource;
use crate::{Error, Result};

/// Captures an input device and publishes its level
pub struct AudioCapture {
    device: Device,
    device_name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open an input device, `None` for the system default
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceAcquisition`] if the device does not exist or
    /// has no usable input configuration
    pub fn open(device_id: Option<&str>) -> Result<Self> {
        let device = find_input_device(device_id)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| Error::device(TrackSource::Microphone, e.to_string()))?;
        let sample_format = supported.sample_format();
        let config = supported.config();

        tracing::debug!(
            device = %device_name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?sample_format,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            device_name,
            config,
            sample_format,
            stream: None,
        })
    }

    /// Start capturing, pushing one level per callback block
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceAcquisition`] if the stream cannot be built or
    /// started
    pub fn start(&mut self, levels: LevelSender) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let on_error = |err: cpal::StreamError| {
            tracing::error!(error = %err, "audio capture error");
        };

        let stream = match self.sample_format {
            SampleFormat::F32 => self.device.build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| levels.push_samples(data),
                on_error,
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &self.config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data
                        .iter()
                        .map(|&s| f32::from(s) / f32::from(i16::MAX))
                        .collect();
                    levels.push_samples(&samples);
                },
                on_error,
                None,
            ),
            other => {
                return Err(Error::device(
                    TrackSource::Microphone,
                    format!("unsupported sample format {other:?}"),
                ));
            }
        }
        .map_err(|e| Error::device(TrackSource::Microphone, e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::device(TrackSource::Microphone, e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(device = %self.device_name, "audio capture started");
        Ok(())
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(device = %self.device_name, "audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Name of the opened device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Native sample rate of the device
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
