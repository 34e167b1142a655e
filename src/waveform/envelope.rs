//! Min/max amplitude envelope
//!
//! Reduces raw samples to one `(min, max)` pair per output column. Each column
//! covers `ceil(N / width)` consecutive samples; columns past the end of the
//! data are flat.

use crate::audio::SampleBuffer;

/// Amplitude range of one column.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Peak {
    pub min: f32,
    pub max: f32,
}

impl Peak {
    pub const SILENT: Peak = Peak { min: 0.0, max: 0.0 };

    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
}

/// Fixed-width sequence of peaks, one per column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    peaks: Vec<Peak>,
}

impl Envelope {
    /// `width` silent columns.
    pub fn empty(width: usize) -> Self {
        Self {
            peaks: vec![Peak::SILENT; width],
        }
    }

    /// Envelope of the first channel of `buffer`.
    pub fn from_buffer(buffer: &SampleBuffer, width: usize) -> Self {
        compute_envelope(buffer.channel(0).unwrap_or(&[]), width)
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn width(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// Downsample `samples` into exactly `width` peaks in one pass.
pub fn compute_envelope(samples: &[f32], width: usize) -> Envelope {
    if width == 0 {
        return Envelope::default();
    }
    if samples.is_empty() {
        return Envelope::empty(width);
    }

    let step = samples.len().div_ceil(width);
    let mut peaks = Vec::with_capacity(width);

    for window in samples.chunks(step) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &sample in window.iter().filter(|s| !s.is_nan()) {
            min = min.min(sample);
            max = max.max(sample);
        }
        peaks.push(if min <= max {
            Peak::new(min, max)
        } else {
            // Window held only NaN
            Peak::SILENT
        });
    }

    peaks.resize(width, Peak::SILENT);
    Envelope { peaks }
}
