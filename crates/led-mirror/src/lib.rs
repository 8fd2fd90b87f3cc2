//! The logical pixel mirror: an in-memory replica of the pixel buffer kept
//! alongside (or instead of) the physical strip.
//!
//! Per the design note on the encoder/executor feedback loop, both sides
//! drive a [`PixelMirror`] rather than duplicating color-buffer bookkeeping:
//! the compiler owns one instance to answer `dim`/`brighten`'s "what is the
//! current value" question, and the live interpreter owns another that also
//! feeds a real strip. Only the logical color storage lives here; loop and
//! timing state stay in the executor.

use led_color::Color;

pub trait PixelMirror: Send {
    fn len(&self) -> usize;
    fn color(&self, index: usize) -> Color;
    fn colors(&self) -> &[Color];
    fn set(&mut self, index: usize, color: Color);
    fn fill(&mut self, color: Color);
    fn set_brightness(&mut self, index: usize, l: u8);
    /// Inclusive span `[lo, hi]`.
    fn span(&self, lo: usize, hi: usize) -> Vec<Color>;
    fn write_span(&mut self, lo: usize, colors: &[Color]);
    /// Takes a full-buffer snapshot, for section-open rewind points.
    fn snapshot(&self) -> Vec<Color>;
    fn restore(&mut self, snapshot: &[Color]);
}

/// Plain `Vec<Color>`-backed mirror with no hardware behind it.
#[derive(Debug, Clone)]
pub struct InMemoryMirror {
    colors: Vec<Color>,
}

impl InMemoryMirror {
    pub fn new(len: usize) -> Self {
        Self {
            colors: vec![Color::BLACK; len],
        }
    }
}

impl PixelMirror for InMemoryMirror {
    fn len(&self) -> usize {
        self.colors.len()
    }

    fn color(&self, index: usize) -> Color {
        self.colors[index]
    }

    fn colors(&self) -> &[Color] {
        &self.colors
    }

    fn set(&mut self, index: usize, color: Color) {
        self.colors[index] = color;
    }

    fn fill(&mut self, color: Color) {
        self.colors.fill(color);
    }

    fn set_brightness(&mut self, index: usize, l: u8) {
        self.colors[index].l = l;
    }

    fn span(&self, lo: usize, hi: usize) -> Vec<Color> {
        self.colors[lo..=hi].to_vec()
    }

    fn write_span(&mut self, lo: usize, colors: &[Color]) {
        self.colors[lo..lo + colors.len()].copy_from_slice(colors);
    }

    fn snapshot(&self) -> Vec<Color> {
        self.colors.clone()
    }

    fn restore(&mut self, snapshot: &[Color]) {
        self.colors.copy_from_slice(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_read_back() {
        let mut m = InMemoryMirror::new(4);
        m.set(1, Color::rgb(1, 2, 3));
        assert_eq!(m.color(1), Color::rgb(1, 2, 3));
    }

    #[test]
    fn fill_sets_every_pixel() {
        let mut m = InMemoryMirror::new(3);
        m.fill(Color::rgb(9, 9, 9));
        assert!(m.colors().iter().all(|&c| c == Color::rgb(9, 9, 9)));
    }

    #[test]
    fn span_and_write_span_round_trip() {
        let mut m = InMemoryMirror::new(5);
        m.set(1, Color::rgb(1, 0, 0));
        m.set(2, Color::rgb(2, 0, 0));
        let span = m.span(1, 2);
        assert_eq!(span, vec![Color::rgb(1, 0, 0), Color::rgb(2, 0, 0)]);

        m.write_span(3, &[Color::rgb(9, 0, 0), Color::rgb(8, 0, 0)]);
        assert_eq!(m.color(3), Color::rgb(9, 0, 0));
        assert_eq!(m.color(4), Color::rgb(8, 0, 0));
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut m = InMemoryMirror::new(2);
        m.set(0, Color::rgb(1, 1, 1));
        let snap = m.snapshot();
        m.set(0, Color::rgb(2, 2, 2));
        m.restore(&snap);
        assert_eq!(m.color(0), Color::rgb(1, 1, 1));
    }
}
