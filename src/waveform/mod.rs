//! Waveform visualization
//!
//! `envelope` reduces decoded samples to per-column min/max peaks, `render`
//! paints them with a playback-progress overlay onto any [`Surface`], and
//! `text` provides a character surface for terminals.

pub mod envelope;
pub mod render;
pub mod text;

pub use envelope::{compute_envelope, Envelope, Peak};
pub use render::{
    progress_columns, progress_ratio, DrawCommand, DrawList, Palette, Rgba, Surface, Theme,
    WaveformRenderer,
};
pub use text::TextSurface;
