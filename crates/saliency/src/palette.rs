//! Colour palettes for heatmaps

use image::{Rgb, RgbImage};
use ndarray::Array2;

/// Classic "jet": dark blue, blue, cyan, yellow, red, dark red
const JET_ANCHORS: [(f32, [u8; 3]); 6] = [
    (0.0, [0, 0, 128]),
    (0.125, [0, 0, 255]),
    (0.375, [0, 255, 255]),
    (0.625, [255, 255, 0]),
    (0.875, [255, 0, 0]),
    (1.0, [128, 0, 0]),
];

/// 256-entry lookup table from 8-bit level to colour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    table: [[u8; 3]; 256],
}

impl Default for Palette {
    fn default() -> Self {
        Self::jet()
    }
}

impl Palette {
    /// Cool-to-warm ramp: low activation is blue, high activation red
    #[must_use]
    pub fn jet() -> Self {
        Self::from_anchors(&JET_ANCHORS)
    }

    /// Piecewise-linear palette through `(position, colour)` anchors sorted by
    /// position in [0, 1]
    #[must_use]
    pub fn from_anchors(anchors: &[(f32, [u8; 3])]) -> Self {
        let mut table = [[0u8; 3]; 256];
        if anchors.is_empty() {
            return Self { table };
        }
        for (level, entry) in table.iter_mut().enumerate() {
            *entry = interpolate(anchors, level as f32 / 255.0);
        }
        Self { table }
    }

    #[must_use]
    pub fn color(&self, level: u8) -> Rgb<u8> {
        Rgb(self.table[usize::from(level)])
    }

    /// Colour image of the same size as `levels` (rows = height)
    #[must_use]
    pub fn apply(&self, levels: &Array2<u8>) -> RgbImage {
        let (height, width) = levels.dim();
        RgbImage::from_fn(width as u32, height as u32, |x, y| {
            self.color(levels[[y as usize, x as usize]])
        })
    }
}

fn interpolate(anchors: &[(f32, [u8; 3])], x: f32) -> [u8; 3] {
    let mut i = 0;
    while i + 2 < anchors.len() && x > anchors[i + 1].0 {
        i += 1;
    }
    let (x0, c0) = anchors[i];
    let (x1, c1) = anchors[(i + 1).min(anchors.len() - 1)];
    let t = if x1 > x0 {
        ((x - x0) / (x1 - x0)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let lerp = |a: u8, b: u8| (f32::from(a) + t * (f32::from(b) - f32::from(a))).round() as u8;
    [lerp(c0[0], c1[0]), lerp(c0[1], c1[1]), lerp(c0[2], c1[2])]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_jet_endpoints() {
        let jet = Palette::jet();
        assert_eq!(jet.color(0), Rgb([0, 0, 128]));
        assert_eq!(jet.color(255), Rgb([128, 0, 0]));
    }

    #[test]
    fn test_jet_is_cool_to_warm() {
        let jet = Palette::jet();
        let low = jet.color(20);
        let high = jet.color(235);
        assert!(low[2] > low[0], "low levels are blue: {low:?}");
        assert!(high[0] > high[2], "high levels are red: {high:?}");
        // Midpoint sits between cyan and yellow
        let mid = jet.color(128);
        assert!(mid[1] > 200);
    }

    #[test]
    fn test_apply_shape() {
        let image = Palette::jet().apply(&arr2(&[[0u8, 255, 128], [1, 2, 3]]));
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(*image.get_pixel(1, 0), Rgb([128, 0, 0]));
    }

    #[test]
    fn test_single_anchor_palette() {
        let flat = Palette::from_anchors(&[(0.0, [10, 20, 30])]);
        assert_eq!(flat.color(0), Rgb([10, 20, 30]));
        assert_eq!(flat.color(200), Rgb([10, 20, 30]));
    }
}
