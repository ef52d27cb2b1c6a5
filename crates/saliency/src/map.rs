//! Normalised saliency maps

use ndarray::{Array2, ArrayView2};

/// Non-negative 2-D map with values in [0, 1].
///
/// A freshly computed map peaks at exactly 1.0, or is all zeros when no
/// location contributed positively to the target score.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    values: Array2<f32>,
}

impl SaliencyMap {
    /// Clip negatives to zero and divide by the maximum.
    ///
    /// Maxima at or below `epsilon` yield an all-zero map.
    #[must_use]
    pub fn from_raw(raw: Array2<f32>, epsilon: f32) -> Self {
        let positive = raw.mapv(|v| if v > 0.0 { v } else { 0.0 });
        let max = positive.iter().copied().fold(0.0f32, f32::max);
        let values = if max > epsilon {
            positive.mapv(|v| v / max)
        } else {
            Array2::zeros(positive.raw_dim())
        };
        Self { values }
    }

    #[must_use]
    pub fn values(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    #[must_use]
    pub fn into_values(self) -> Array2<f32> {
        self.values
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    #[must_use]
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// `(row, column)` of the first maximum, `None` for an all-zero map
    #[must_use]
    pub fn peak(&self) -> Option<(usize, usize)> {
        let max = self.max();
        if max <= 0.0 {
            return None;
        }
        self.values
            .indexed_iter()
            .find(|&(_, &v)| v == max)
            .map(|(idx, _)| idx)
    }

    /// Bilinear resampling with pixel-centre alignment
    #[must_use]
    pub fn resize(&self, height: usize, width: usize) -> SaliencyMap {
        let (src_h, src_w) = self.values.dim();
        if src_h == 0 || src_w == 0 {
            return SaliencyMap {
                values: Array2::zeros((height, width)),
            };
        }
        if (src_h, src_w) == (height, width) {
            return self.clone();
        }

        let rows: Vec<(usize, usize, f32)> = (0..height)
            .map(|y| sample_axis(y, height, src_h))
            .collect();
        let cols: Vec<(usize, usize, f32)> = (0..width)
            .map(|x| sample_axis(x, width, src_w))
            .collect();

        let f = &self.values;
        let values = Array2::from_shape_fn((height, width), |(y, x)| {
            let (y0, y1, dy) = rows[y];
            let (x0, x1, dx) = cols[x];
            let top = f[[y0, x0]] * (1.0 - dx) + f[[y0, x1]] * dx;
            let bottom = f[[y1, x0]] * (1.0 - dx) + f[[y1, x1]] * dx;
            (top * (1.0 - dy) + bottom * dy).clamp(0.0, 1.0)
        });
        SaliencyMap { values }
    }

    /// Scale to 8-bit levels, `round(v * 255)`
    #[must_use]
    pub fn quantize(&self) -> Array2<u8> {
        self.values
            .mapv(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

/// Source neighbours and interpolation weight for output index `i`
fn sample_axis(i: usize, out_len: usize, src_len: usize) -> (usize, usize, f32) {
    let scale = src_len as f32 / out_len as f32;
    let pos = ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, (src_len - 1) as f32);
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(src_len - 1);
    (lo, hi, pos - lo as f32)
}
