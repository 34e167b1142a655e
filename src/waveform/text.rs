//! Terminal surface
//!
//! Rasterizes strokes into a character grid so the CLI can print a waveform.
//! Opaque strokes are drawn with `#`, translucent ones with `.`; an opaque
//! cell is never overwritten by a translucent stroke.

use std::fmt;

use super::render::{Rgba, Surface};

const EMPTY: char = ' ';
const FAINT: char = '.';
const SOLID: char = '#';

#[derive(Debug, Clone)]
pub struct TextSurface {
    width: usize,
    height: usize,
    cells: Vec<char>,
}

impl TextSurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![EMPTY; width * height],
        }
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<char> {
        if x < self.width && y < self.height {
            Some(self.cells[y * self.width + x])
        } else {
            None
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = String> + '_ {
        self.cells
            .chunks(self.width.max(1))
            .map(|row| row.iter().collect())
    }

    fn plot(&mut self, x: f32, y: f32, glyph: char) {
        if self.width == 0 || self.height == 0 || !x.is_finite() || !y.is_finite() {
            return;
        }
        let col = (x.round().max(0.0) as usize).min(self.width - 1);
        let row = (y.floor().max(0.0) as usize).min(self.height - 1);
        let cell = &mut self.cells[row * self.width + col];
        if *cell != SOLID {
            *cell = glyph;
        }
    }

    fn line(&mut self, from: (f32, f32), to: (f32, f32), glyph: char) {
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.plot(from.0 + dx * t, from.1 + dy * t, glyph);
        }
    }
}

impl Surface for TextSurface {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn clear(&mut self) {
        self.cells.fill(EMPTY);
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], color: Rgba) {
        let glyph = if color.a >= 1.0 { SOLID } else { FAINT };
        match points {
            [] => {}
            [only] => self.plot(only.0, only.1, glyph),
            _ => {
                for pair in points.windows(2) {
                    self.line(pair[0], pair[1], glyph);
                }
            }
        }
    }
}

impl fmt::Display for TextSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            writeln!(f, "{}", row.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::envelope::compute_envelope;
    use crate::waveform::render::{Theme, WaveformRenderer};

    #[test]
    fn vertical_stroke_fills_column() {
        let mut surface = TextSurface::new(3, 4);
        surface.stroke_polyline(&[(1.0, 0.0), (1.0, 3.0)], Rgba::BLACK);
        for row in 0..4 {
            assert_eq!(surface.cell(1, row), Some('#'));
            assert_eq!(surface.cell(0, row), Some(' '));
        }
    }

    #[test]
    fn faint_stroke_does_not_cover_solid() {
        let mut surface = TextSurface::new(2, 2);
        surface.stroke_polyline(&[(0.0, 0.0)], Rgba::WHITE);
        surface.stroke_polyline(&[(0.0, 0.0), (1.0, 0.0)], Rgba::new(1, 1, 1, 0.5));
        assert_eq!(surface.cell(0, 0), Some('#'));
        assert_eq!(surface.cell(1, 0), Some('.'));
    }

    #[test]
    fn rendered_waveform_marks_played_part() {
        let samples: Vec<f32> = (0..40).map(|i| if i % 2 == 0 { 0.8 } else { -0.8 }).collect();
        let envelope = compute_envelope(&samples, 10);
        let mut surface = TextSurface::new(10, 5);
        WaveformRenderer.render(&mut surface, &envelope, 0.5, Theme::Light);

        let text = surface.to_string();
        assert!(text.contains('#'));
        assert!(text.contains('.'));
        assert_eq!(surface.cell(9, 2), Some('.'));
        assert_eq!(surface.cell(0, 2), Some('#'));

        surface.clear();
        assert!(surface.to_string().trim().is_empty());
    }
}
