use serde::{Deserialize, Serialize};

use crate::{BarSnapshot, Result, SpectrumError};

/// Boost applied after the square-root emphasis so quiet bars stay visible.
const HEIGHT_GAIN: f32 = 1.2;
/// Minimum bar height in pixels.
const MIN_BAR_HEIGHT: i32 = 2;

/// Pixel placement of one bar and its peak marker. `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarColumn {
    pub x: u32,
    pub top: u32,
    pub height: u32,
    pub peak_y: u32,
}

/// Lays bar values out on a left-aligned strip of fixed height.
///
/// Built through [`BarGeometry::new`], which keeps the strip tall enough for
/// the minimum bar height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarGeometry {
    height: u32,
    bar_width: u32,
    spacing: u32,
}

impl Default for BarGeometry {
    fn default() -> Self {
        Self {
            height: 40,
            bar_width: 3,
            spacing: 1,
        }
    }
}

impl BarGeometry {
    pub fn new(height: u32, bar_width: u32, spacing: u32) -> Result<Self> {
        if bar_width == 0 {
            return Err(SpectrumError::InvalidInput("bar width must be positive"));
        }
        if height < 4 {
            return Err(SpectrumError::InvalidInput("strip must be at least 4 pixels tall"));
        }
        Ok(Self {
            height,
            bar_width,
            spacing,
        })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bar_width(&self) -> u32 {
        self.bar_width
    }

    pub fn spacing(&self) -> u32 {
        self.spacing
    }

    /// Width of `bars` columns including the gaps between them.
    pub fn total_width(&self, bars: usize) -> u32 {
        let bars = bars as u32;
        (bars * (self.bar_width + self.spacing)).saturating_sub(self.spacing)
    }

    pub fn bar_height(&self, value: f32) -> u32 {
        let height = self.height as i32;
        let scaled = (value.max(0.0).sqrt() * self.height as f32 * HEIGHT_GAIN) as i32;
        scaled.min(height - 2).max(MIN_BAR_HEIGHT) as u32
    }

    pub fn peak_y(&self, peak: f32) -> u32 {
        let height = self.height as i32;
        let offset = (peak.max(0.0).sqrt() * self.height as f32 * HEIGHT_GAIN) as i32;
        (height - offset).max(1) as u32
    }

    pub fn layout(&self, snapshot: &BarSnapshot) -> Vec<BarColumn> {
        snapshot
            .bars
            .iter()
            .zip(&snapshot.peaks)
            .enumerate()
            .map(|(i, (&bar, &peak))| {
                let height = self.bar_height(bar);
                BarColumn {
                    x: i as u32 * (self.bar_width + self.spacing),
                    top: self.height.saturating_sub(height),
                    height,
                    peak_y: self.peak_y(peak),
                }
            })
            .collect()
    }

    /// Draws the strip as text, one character per pixel column.
    pub fn render_text(&self, snapshot: &BarSnapshot) -> String {
        let width = self.total_width(snapshot.bars.len()) as usize;
        let rows = self.height as usize;
        let mut canvas = vec![vec![' '; width]; rows];

        for column in self.layout(snapshot) {
            let x0 = column.x as usize;
            let x1 = (x0 + self.bar_width as usize).min(width);
            for row in canvas.iter_mut().skip(column.top as usize) {
                row[x0..x1].iter_mut().for_each(|cell| *cell = '█');
            }
            if let Some(row) = canvas.get_mut(column.peak_y as usize) {
                row[x0..x1].iter_mut().for_each(|cell| *cell = '▀');
            }
        }

        canvas
            .into_iter()
            .map(|row| row.into_iter().collect::<String>().trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heights_use_square_root_emphasis() {
        let geometry = BarGeometry::default();

        assert_eq!(geometry.bar_height(0.0), 2);
        assert_eq!(geometry.bar_height(0.25), 24);
        assert_eq!(geometry.bar_height(1.0), 38);
    }

    #[test]
    fn peak_marker_stays_on_strip() {
        let geometry = BarGeometry::default();

        assert_eq!(geometry.peak_y(0.0), 40);
        assert_eq!(geometry.peak_y(0.25), 16);
        assert_eq!(geometry.peak_y(1.0), 1);
    }

    #[test]
    fn lays_out_left_aligned_columns() {
        let geometry = BarGeometry::new(20, 2, 1).unwrap();
        let snapshot = BarSnapshot {
            bars: vec![0.0, 1.0, 0.25],
            peaks: vec![0.5, 1.0, 0.25],
        };

        let columns = geometry.layout(&snapshot);
        assert_eq!(geometry.total_width(3), 8);
        assert_eq!(
            columns.iter().map(|c| c.x).collect::<Vec<_>>(),
            vec![0, 3, 6]
        );
        assert_eq!(columns[1].top, 2);
        assert!(columns.iter().all(|c| c.top + c.height == 20));
    }

    #[test]
    fn renders_text_rows() {
        let geometry = BarGeometry::new(4, 1, 1).unwrap();
        let snapshot = BarSnapshot {
            bars: vec![0.0, 1.0],
            peaks: vec![0.0, 1.0],
        };

        let text = geometry.render_text(&snapshot);
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains('█'));
        assert!(text.contains('▀'));
    }

    #[test]
    fn rejects_zero_width_bars() {
        assert!(BarGeometry::new(40, 0, 1).is_err());
    }

    #[test]
    fn rejects_strips_too_short_for_minimum_height() {
        assert!(BarGeometry::new(1, 1, 1).is_err());
        assert!(BarGeometry::new(3, 1, 1).is_err());

        let geometry = BarGeometry::new(4, 2, 0).unwrap();
        assert_eq!(
            (geometry.height(), geometry.bar_width(), geometry.spacing()),
            (4, 2, 0)
        );
        let snapshot = BarSnapshot {
            bars: vec![1.0],
            peaks: vec![1.0],
        };
        let column = geometry.layout(&snapshot)[0];
        assert_eq!(column.top + column.height, 4);
    }
}
