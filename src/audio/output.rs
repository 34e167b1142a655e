//! Speaker playback of decoded clips
//!
//! CPAL streams are not `Send` on every host, so the output stream lives on a
//! dedicated thread for the lifetime of the element. The audio callback and
//! the element share a cursor (in source frames) and a playing flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};

use super::SampleBuffer;
use crate::playback::{PlaybackElement, PlaybackError};

struct Shared {
    buffer: Arc<SampleBuffer>,
    /// Playhead in source frames
    cursor: Mutex<f64>,
    playing: AtomicBool,
}

impl Shared {
    fn with_cursor<R>(&self, f: impl FnOnce(&mut f64) -> R) -> R {
        match self.cursor.lock() {
            Ok(mut cursor) => f(&mut cursor),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Plays a [`SampleBuffer`] through the default output device.
pub struct SpeakerElement {
    shared: Arc<Shared>,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerElement {
    /// Open the default output device for `buffer`. Playback starts paused.
    ///
    /// Blocks until the output thread has the device open. On a runtime, call
    /// it through `block_in_place` or `spawn_blocking`.
    pub fn open(buffer: Arc<SampleBuffer>) -> Result<Self, PlaybackError> {
        if buffer.is_empty() || buffer.sample_rate() == 0 {
            return Err(PlaybackError::Empty);
        }

        let shared = Arc::new(Shared {
            buffer,
            cursor: Mutex::new(0.0),
            playing: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PlaybackError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_shared = shared.clone();

        let thread = std::thread::Builder::new()
            .name("artvoice-output".into())
            .spawn(move || {
                let stream = match build_output_stream(thread_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until the element is dropped; the stream dies with this thread.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("Audio output stream closed");
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(PlaybackError::Device("output thread exited".into())),
        }
    }

    fn frames(&self) -> f64 {
        self.shared.buffer.frames() as f64
    }
}

impl PlaybackElement for SpeakerElement {
    fn play(&self) -> Result<(), PlaybackError> {
        let frames = self.frames();
        self.shared.with_cursor(|cursor| {
            if *cursor >= frames {
                *cursor = 0.0;
            }
        });
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
    }

    fn seek(&self, position: f64) {
        let rate = self.shared.buffer.sample_rate() as f64;
        let frames = self.frames();
        self.shared
            .with_cursor(|cursor| *cursor = (position * rate).clamp(0.0, frames));
    }

    fn current_time(&self) -> f64 {
        let rate = self.shared.buffer.sample_rate() as f64;
        let cursor = self.shared.with_cursor(|cursor| *cursor);
        (cursor / rate).min(self.duration())
    }

    fn duration(&self) -> f64 {
        self.shared.buffer.duration()
    }
}

impl Drop for SpeakerElement {
    fn drop(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio output thread panicked");
            }
        }
    }
}

fn build_output_stream(shared: Arc<Shared>) -> Result<cpal::Stream, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoOutputDevice)?;

    log::info!("Using audio output device: {:?}", device.name());

    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    log::info!(
        "Output config: {} Hz, {} channels, {:?}",
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, shared)?,
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, shared)?,
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, shared)?,
        other => {
            return Err(PlaybackError::Device(format!(
                "unsupported output sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    Ok(stream)
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let out_channels = config.channels.max(1) as usize;
    let step = shared.buffer.sample_rate() as f64 / config.sample_rate.0.max(1) as f64;
    let err_fn = |err| log::error!("Audio output stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_frames(&shared, data, out_channels, step);
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::Device(e.to_string()))
}

/// Write the next frames of the buffer into `data`, silence when paused.
///
/// Resamples by nearest frame; source channels beyond the output layout are
/// dropped and missing ones repeat the last source channel.
fn fill_frames<T>(shared: &Shared, data: &mut [T], out_channels: usize, step: f64)
where
    T: Sample + FromSample<f32>,
{
    let buffer = &shared.buffer;
    let frames = buffer.frames();
    let src_channels = buffer.channel_count();

    if !shared.playing.load(Ordering::Acquire) || src_channels == 0 {
        data.fill(T::EQUILIBRIUM);
        return;
    }

    shared.with_cursor(|cursor| {
        for frame in data.chunks_mut(out_channels) {
            let index = *cursor as usize;
            if index >= frames {
                frame.fill(T::EQUILIBRIUM);
                continue;
            }
            for (ch, out) in frame.iter_mut().enumerate() {
                let sample = buffer.channels()[ch.min(src_channels - 1)][index];
                *out = T::from_sample(sample);
            }
            *cursor += step;
        }

        if *cursor >= frames as f64 {
            *cursor = frames as f64;
            shared.playing.store(false, Ordering::Release);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(samples: Vec<f32>, playing: bool) -> Shared {
        Shared {
            buffer: Arc::new(SampleBuffer::new(vec![samples], 4)),
            cursor: Mutex::new(0.0),
            playing: AtomicBool::new(playing),
        }
    }

    #[test]
    fn paused_output_is_silent() {
        let shared = shared(vec![0.5; 4], false);
        let mut out = [1.0f32; 4];
        fill_frames(&shared, &mut out, 2, 1.0);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(shared.with_cursor(|c| *c), 0.0);
    }

    #[test]
    fn mono_is_duplicated_across_output_channels() {
        let shared = shared(vec![0.1, 0.2, 0.3, 0.4], true);
        let mut out = [0.0f32; 4];
        fill_frames(&shared, &mut out, 2, 1.0);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2]);
        assert_eq!(shared.with_cursor(|c| *c), 2.0);
    }

    #[test]
    fn reaching_the_end_stops_playback() {
        let shared = shared(vec![0.1, 0.2], true);
        let mut out = [9.0f32; 3];
        fill_frames(&shared, &mut out, 1, 1.0);
        assert_eq!(out, [0.1, 0.2, 0.0]);
        assert!(!shared.playing.load(Ordering::Acquire));
        assert_eq!(shared.with_cursor(|c| *c), 2.0);
    }
}
