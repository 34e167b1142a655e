//! artvoice: voice clips for artworks
//!
//! Records microphone clips, decodes stored clips, renders their min/max
//! waveform and keeps the rendering in sync with playback.

pub mod api;
pub mod audio;
pub mod clip;
pub mod playback;
pub mod settings;
pub mod view;
pub mod waveform;

pub use api::{ApiError, ClipApi, ClipFetcher, ClipUploader};
pub use audio::{AudioDecoder, AutoDecoder, ClipLoader, Recorder, SampleBuffer};
pub use clip::{ArtworkId, AudioClip, ClipId, ClipRecord, ClipSource};
pub use playback::{PlaybackController, PlaybackPolicy, PlaybackState};
pub use settings::AppSettings;
pub use view::{ViewError, WaveformView};
pub use waveform::{Envelope, Theme};
