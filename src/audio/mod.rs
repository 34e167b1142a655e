//! Audio module for artvoice
//!
//! Microphone capture into WAV clips (CPAL + hound), decoding of stored clips
//! (hound + Symphonia, with libopus for browser recordings) and speaker
//! output for playback.

pub mod capture;
pub mod decoder;
#[cfg(feature = "opus")]
mod opus_codec;
pub mod output;
pub mod recorder;
mod sample_buffer;

pub use capture::CpalCapture;
pub use decoder::{
    AudioDecoder, AutoDecoder, ClipLoader, DecodeError, DecodeStatus, LoadError, SymphoniaDecoder,
    WavDecoder,
};
pub use output::SpeakerElement;
pub use recorder::{
    CaptureError, CaptureFormat, CaptureProvider, ChunkSink, LiveCapture, Recorder, RecorderError,
    RECORDING_MIME,
};
pub use sample_buffer::SampleBuffer;
