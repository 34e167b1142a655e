//! Microphone recorder producing finalized WAV clips
//!
//! The Recorder asks a [`CaptureProvider`] for the microphone, collects the
//! captured chunks while a session is active, and on stop assembles them into
//! one immutable [`AudioClip`]. Recording is controlled via start(), stop()
//! and toggle().

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use hound::{WavSpec, WavWriter};
use uuid::Uuid;

use crate::clip::{ArtworkId, AudioClip};

/// MIME type of clips produced by the recorder.
pub const RECORDING_MIME: &str = "audio/wav";

/// Errors reported by a capability provider when acquiring the microphone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    Denied(String),
    #[error("no audio input device found")]
    NoInputDevice,
    #[error("no supported audio configuration")]
    NoSupportedConfig,
    #[error("failed to create audio stream: {0}")]
    StreamCreationFailed(String),
}

/// Errors that can occur during recording.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecorderError {
    #[error("microphone unavailable: {0}")]
    CapabilityDenied(#[from] CaptureError),
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("failed to encode recording: {0}")]
    Encode(String),
}

/// Sample layout of a live capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Shared accumulator the capture callback pushes interleaved i16 chunks into.
#[derive(Clone, Default)]
pub struct ChunkSink {
    chunks: Arc<Mutex<Vec<Vec<i16>>>>,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one captured chunk. Empty chunks are dropped.
    pub fn push(&self, chunk: Vec<i16>) {
        if chunk.is_empty() {
            return;
        }
        match self.chunks.lock() {
            Ok(mut chunks) => chunks.push(chunk),
            Err(_) => log::error!("Chunk sink poisoned, dropping {} samples", chunk.len()),
        }
    }

    /// Move all chunks out, leaving the sink empty.
    fn take(&self) -> Vec<Vec<i16>> {
        match self.chunks.lock() {
            Ok(mut chunks) => std::mem::take(&mut *chunks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.chunks.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// A granted microphone. Dropping it releases the device.
pub trait LiveCapture {
    fn format(&self) -> CaptureFormat;
}

/// Host capability for microphone access.
pub trait CaptureProvider {
    /// Acquire the microphone and start delivering chunks into `sink`.
    fn acquire(&self, sink: ChunkSink) -> Result<Box<dyn LiveCapture>, CaptureError>;
}

/// State of an active recording. Only exists while the recorder is running.
struct RecordingSession {
    id: Uuid,
    capture: Box<dyn LiveCapture>,
    sink: ChunkSink,
    started_at: Instant,
}

/// Records microphone audio into clips owned by one artwork.
pub struct Recorder<P: CaptureProvider> {
    provider: P,
    owner: ArtworkId,
    session: Option<RecordingSession>,
}

impl<P: CaptureProvider> Recorder<P> {
    pub fn new(provider: P, owner: ArtworkId) -> Self {
        Self {
            provider,
            owner,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn owner(&self) -> ArtworkId {
        self.owner
    }

    /// Acquire the microphone and begin a recording session.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.session.is_some() {
            log::warn!("Recorder start ignored: already recording");
            return Err(RecorderError::AlreadyRecording);
        }

        let sink = ChunkSink::new();
        let capture = self.provider.acquire(sink.clone()).map_err(|e| {
            log::error!("Error accessing microphone: {}", e);
            RecorderError::CapabilityDenied(e)
        })?;

        let id = Uuid::new_v4();
        let format = capture.format();
        log::info!(
            "Recording {} started for artwork {} ({} Hz, {} channels)",
            id,
            self.owner,
            format.sample_rate,
            format.channels
        );

        self.session = Some(RecordingSession {
            id,
            capture,
            sink,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Finish the active session and return the assembled clip.
    ///
    /// Returns `Ok(None)` when nothing is being recorded.
    pub fn stop(&mut self) -> Result<Option<AudioClip>, RecorderError> {
        let Some(session) = self.session.take() else {
            log::debug!("Recorder stop ignored: no active session");
            return Ok(None);
        };

        let RecordingSession {
            id,
            capture,
            sink,
            started_at,
        } = session;

        let format = capture.format();
        // Release the microphone before assembling so no further chunks arrive.
        drop(capture);

        let chunks = sink.take();
        let sample_count: usize = chunks.iter().map(Vec::len).sum();
        let bytes = encode_wav(format, &chunks)?;

        log::info!(
            "Recording {} stopped after {:?}: {} samples, {} bytes",
            id,
            started_at.elapsed(),
            sample_count,
            bytes.len()
        );

        Ok(Some(AudioClip::in_memory(self.owner, bytes, RECORDING_MIME)))
    }

    /// Stop if recording, otherwise start. Only a stop can produce a clip.
    pub fn toggle(&mut self) -> Result<Option<AudioClip>, RecorderError> {
        if self.is_recording() {
            self.stop()
        } else {
            self.start().map(|_| None)
        }
    }
}

impl<P: CaptureProvider> Drop for Recorder<P> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("Recorder dropped, discarding recording {}", session.id);
        }
    }
}

/// Concatenate interleaved i16 chunks into a 16-bit PCM WAV file in memory.
pub fn encode_wav(format: CaptureFormat, chunks: &[Vec<i16>]) -> Result<Vec<u8>, RecorderError> {
    let spec = WavSpec {
        channels: format.channels.max(1),
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).map_err(|e| RecorderError::Encode(e.to_string()))?;
        for &sample in chunks.iter().flatten() {
            writer
                .write_sample(sample)
                .map_err(|e| RecorderError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| RecorderError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider handing out a fake microphone that records a fixed chunk.
    pub(crate) struct FakeMicrophone {
        pub(crate) live: Arc<AtomicUsize>,
        pub(crate) deny: bool,
        pub(crate) chunk: Vec<i16>,
    }

    impl FakeMicrophone {
        pub(crate) fn new(chunk: Vec<i16>) -> Self {
            Self {
                live: Arc::new(AtomicUsize::new(0)),
                deny: false,
                chunk,
            }
        }
    }

    struct FakeCapture {
        live: Arc<AtomicUsize>,
    }

    impl LiveCapture for FakeCapture {
        fn format(&self) -> CaptureFormat {
            CaptureFormat {
                sample_rate: 8_000,
                channels: 1,
            }
        }
    }

    impl Drop for FakeCapture {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl CaptureProvider for FakeMicrophone {
        fn acquire(&self, sink: ChunkSink) -> Result<Box<dyn LiveCapture>, CaptureError> {
            if self.deny {
                return Err(CaptureError::Denied("permission dismissed".to_string()));
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            sink.push(self.chunk.clone());
            sink.push(Vec::new());
            sink.push(self.chunk.clone());
            Ok(Box::new(FakeCapture {
                live: self.live.clone(),
            }))
        }
    }

    #[test]
    fn stop_without_start_emits_nothing() {
        let mut recorder = Recorder::new(FakeMicrophone::new(vec![1, 2]), ArtworkId(1));
        let clip = recorder.stop().unwrap();
        assert!(clip.is_none());
        assert!(!recorder.is_recording());
    }

    #[test]
    fn start_stop_produces_wav_clip() {
        let mic = FakeMicrophone::new(vec![100, -100, 200]);
        let live = mic.live.clone();
        let mut recorder = Recorder::new(mic, ArtworkId(9));

        recorder.start().unwrap();
        assert!(recorder.is_recording());
        assert_eq!(live.load(Ordering::SeqCst), 1);

        let clip = recorder.stop().unwrap().expect("clip emitted");
        assert_eq!(clip.owner(), ArtworkId(9));
        assert_eq!(clip.mime_type(), RECORDING_MIME);
        assert!(!recorder.is_recording());
        // Microphone released once stop completes
        assert_eq!(live.load(Ordering::SeqCst), 0);

        let bytes = clip.bytes().unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -100, 200, 100, -100, 200]);
    }

    #[test]
    fn second_start_is_an_error() {
        let mut recorder = Recorder::new(FakeMicrophone::new(vec![1]), ArtworkId(1));
        recorder.start().unwrap();
        assert!(matches!(
            recorder.start(),
            Err(RecorderError::AlreadyRecording)
        ));
        assert!(recorder.is_recording());
    }

    #[test]
    fn denied_capability_leaves_no_session() {
        let mut mic = FakeMicrophone::new(vec![1]);
        mic.deny = true;
        let mut recorder = Recorder::new(mic, ArtworkId(1));
        assert!(matches!(
            recorder.start(),
            Err(RecorderError::CapabilityDenied(CaptureError::Denied(_)))
        ));
        assert!(!recorder.is_recording());
        assert!(recorder.stop().unwrap().is_none());
    }

    #[test]
    fn toggle_alternates_start_and_stop() {
        let mut recorder = Recorder::new(FakeMicrophone::new(vec![5]), ArtworkId(2));
        assert!(recorder.toggle().unwrap().is_none());
        assert!(recorder.is_recording());
        assert!(recorder.toggle().unwrap().is_some());
        assert!(!recorder.is_recording());
    }

    #[test]
    fn drop_releases_microphone() {
        let mic = FakeMicrophone::new(vec![1]);
        let live = mic.live.clone();
        {
            let mut recorder = Recorder::new(mic, ArtworkId(1));
            recorder.start().unwrap();
            assert_eq!(live.load(Ordering::SeqCst), 1);
        }
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sink_ignores_empty_chunks() {
        let sink = ChunkSink::new();
        sink.push(vec![]);
        sink.push(vec![1]);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take(), vec![vec![1]]);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn empty_recording_is_still_a_valid_wav() {
        let bytes = encode_wav(
            CaptureFormat {
                sample_rate: 16_000,
                channels: 1,
            },
            &[],
        )
        .unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }
}
