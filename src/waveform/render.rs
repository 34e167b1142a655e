//! Waveform rendering onto a drawing surface
//!
//! The renderer is stateless: every call clears the surface and strokes the
//! full envelope in the theme's low-contrast colour, then the played part in
//! the high-contrast colour.

use serde::{Deserialize, Serialize};

use super::envelope::{Envelope, Peak};

/// Colour with 8-bit channels and float alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 1.0);
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 1.0);

    pub const fn new(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Host colour scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Stroke colours for one theme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    /// Full waveform
    pub background: Rgba,
    /// Played part
    pub progress: Rgba,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                background: Rgba::new(128, 128, 128, 0.5),
                progress: Rgba::WHITE,
            },
            Theme::Light => Self {
                background: Rgba::new(200, 200, 200, 0.5),
                progress: Rgba::BLACK,
            },
        }
    }
}

/// Something a waveform can be painted on.
pub trait Surface {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn clear(&mut self);
    /// Stroke straight segments between consecutive points.
    fn stroke_polyline(&mut self, points: &[(f32, f32)], color: Rgba);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear,
    Polyline { points: Vec<(f32, f32)>, color: Rgba },
}

/// Surface that records commands for a host painter to replay.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawList {
    width: usize,
    height: usize,
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Number of polylines since the last clear.
    pub fn stroke_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Polyline { .. }))
            .count()
    }
}

impl Surface for DrawList {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn clear(&mut self) {
        self.commands.clear();
        self.commands.push(DrawCommand::Clear);
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], color: Rgba) {
        self.commands.push(DrawCommand::Polyline {
            points: points.to_vec(),
            color,
        });
    }
}

/// `current / duration` clamped to `[0, 1]`; `0` without a usable duration.
pub fn progress_ratio(current: f64, duration: f64) -> f64 {
    if !duration.is_finite() || duration <= 0.0 || current.is_nan() {
        return 0.0;
    }
    (current / duration).clamp(0.0, 1.0)
}

/// Number of leading columns drawn as played.
pub fn progress_columns(width: usize, ratio: f64) -> usize {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    ((width as f64 * ratio).floor() as usize).min(width)
}

/// Paints envelopes with a progress overlay.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaveformRenderer;

impl WaveformRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Clear `surface` and draw `envelope` with `ratio` of it highlighted.
    pub fn render<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        envelope: &Envelope,
        ratio: f64,
        theme: Theme,
    ) {
        surface.clear();
        if envelope.is_empty() {
            return;
        }

        let palette = Palette::for_theme(theme);
        let amp = surface.height() as f32 / 2.0;
        let peaks = envelope.peaks();

        surface.stroke_polyline(&trace(peaks, amp), palette.background);

        let played = progress_columns(peaks.len(), ratio);
        if played > 0 {
            surface.stroke_polyline(&trace(&peaks[..played], amp), palette.progress);
        }
    }
}

/// Zig-zag through every column's min and max, starting at the centre line.
fn trace(peaks: &[Peak], amp: f32) -> Vec<(f32, f32)> {
    let mut points = Vec::with_capacity(peaks.len() * 2 + 1);
    points.push((0.0, amp));
    for (i, peak) in peaks.iter().enumerate() {
        let x = i as f32;
        points.push((x, (1.0 + peak.min) * amp));
        points.push((x, (1.0 + peak.max) * amp));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::envelope::compute_envelope;

    #[test]
    fn ratio_is_clamped() {
        assert_eq!(progress_ratio(5.0, 10.0), 0.5);
        assert_eq!(progress_ratio(12.0, 10.0), 1.0);
        assert_eq!(progress_ratio(-1.0, 10.0), 0.0);
        assert_eq!(progress_ratio(3.0, 0.0), 0.0);
        assert_eq!(progress_ratio(3.0, f64::INFINITY), 0.0);
        assert_eq!(progress_ratio(f64::NAN, 10.0), 0.0);
    }

    #[test]
    fn progress_columns_floor() {
        assert_eq!(progress_columns(600, 0.5), 300);
        assert_eq!(progress_columns(3, 0.99), 2);
        assert_eq!(progress_columns(3, 1.0), 3);
        assert_eq!(progress_columns(3, 7.0), 3);
    }

    #[test]
    fn render_strokes_background_then_progress() {
        let envelope = compute_envelope(&[-1.0, 1.0, -0.5, 0.5], 2);
        let mut surface = DrawList::new(2, 100);
        WaveformRenderer.render(&mut surface, &envelope, 0.5, Theme::Dark);

        let commands = surface.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], DrawCommand::Clear);
        assert_eq!(
            commands[1],
            DrawCommand::Polyline {
                points: vec![(0.0, 50.0), (0.0, 0.0), (0.0, 100.0), (1.0, 25.0), (1.0, 75.0)],
                color: Rgba::new(128, 128, 128, 0.5),
            }
        );
        assert_eq!(
            commands[2],
            DrawCommand::Polyline {
                points: vec![(0.0, 50.0), (0.0, 0.0), (0.0, 100.0)],
                color: Rgba::WHITE,
            }
        );
    }

    #[test]
    fn no_progress_draws_background_only() {
        let envelope = compute_envelope(&[0.2; 10], 5);
        let mut surface = DrawList::new(5, 40);
        WaveformRenderer.render(&mut surface, &envelope, 0.0, Theme::Light);
        assert_eq!(surface.stroke_count(), 1);
    }

    #[test]
    fn empty_envelope_paints_nothing() {
        let mut surface = DrawList::new(10, 10);
        WaveformRenderer.render(&mut surface, &Envelope::default(), 0.5, Theme::Light);
        assert_eq!(surface.commands(), &[DrawCommand::Clear]);
    }

    #[test]
    fn repeated_renders_are_identical() {
        let envelope = compute_envelope(&[0.1, -0.4, 0.9, 0.0, -0.2], 3);
        let mut surface = DrawList::new(3, 60);
        WaveformRenderer.render(&mut surface, &envelope, 0.7, Theme::Light);
        let first = surface.clone();
        WaveformRenderer.render(&mut surface, &envelope, 0.7, Theme::Light);
        assert_eq!(surface, first);
    }

    #[test]
    fn theme_selects_palette() {
        assert_eq!(Palette::for_theme(Theme::Light).progress, Rgba::BLACK);
        assert_eq!(
            Palette::for_theme(Theme::Light).background,
            Rgba::new(200, 200, 200, 0.5)
        );
    }
}
