//! Microphone capability backed by CPAL
//!
//! Opens the default input device, converts every sample to i16 and pushes
//! the callback buffers into the recorder's [`ChunkSink`]. The stream lives
//! as long as the returned [`LiveCapture`]; dropping it closes the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, Stream, StreamConfig};

use super::recorder::{CaptureError, CaptureFormat, CaptureProvider, ChunkSink, LiveCapture};

/// Capability provider for the host's default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Self {
        Self
    }
}

/// An open CPAL input stream.
struct CpalLiveCapture {
    _stream: Stream,
    format: CaptureFormat,
}

impl LiveCapture for CpalLiveCapture {
    fn format(&self) -> CaptureFormat {
        self.format
    }
}

impl Drop for CpalLiveCapture {
    fn drop(&mut self) {
        log::debug!("Releasing audio input stream");
    }
}

impl CaptureProvider for CpalCapture {
    fn acquire(&self, sink: ChunkSink) -> Result<Box<dyn LiveCapture>, CaptureError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();
        let format = CaptureFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let stream = match sample_format {
            SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, sink)?,
            SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, sink)?,
            SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, sink)?,
            _ => return Err(CaptureError::NoSupportedConfig),
        };

        stream
            .play()
            .map_err(|e| classify_stream_error(format!("Failed to start stream: {}", e)))?;

        Ok(Box::new(CpalLiveCapture {
            _stream: stream,
            format,
        }))
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: ChunkSink,
) -> Result<Stream, CaptureError>
where
    T: Sample + cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                sink.push(data.iter().map(|&s| sample_to_i16(s)).collect());
            },
            err_fn,
            None,
        )
        .map_err(|e| classify_stream_error(e.to_string()))
}

/// Hosts report a refused microphone as a generic backend error; pick out the
/// permission failures so callers can tell the user to grant access.
fn classify_stream_error(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        CaptureError::Denied(message)
    } else {
        CaptureError::StreamCreationFailed(message)
    }
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T>(sample: T) -> i16
where
    T: Sample,
    f32: FromSample<T>,
{
    let f32_sample = f32::from_sample(sample);
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-1.0f32), -i16::MAX);

        // Clamping
        assert_eq!(sample_to_i16(2.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn test_unsigned_midpoint_is_silence() {
        assert_eq!(sample_to_i16(32768u16), 0);
    }

    #[test]
    fn permission_errors_are_denials() {
        assert!(matches!(
            classify_stream_error("Permission denied (os error 13)".into()),
            CaptureError::Denied(_)
        ));
        assert!(matches!(
            classify_stream_error("device busy".into()),
            CaptureError::StreamCreationFailed(_)
        ));
    }
}
