//! Lens shading map operations.
//!
//! A shading map is a low-resolution grid of per-channel gains (four Bayer
//! planes) that corrects spatial falloff. The preprocessor samples it
//! bilinearly at every sensor site; the reshape operations below prepare the
//! map for the different vignette-correction modes before sampling starts.

use crate::source::CfaPhase;

/// Four-plane lens shading gain grid.
///
/// All planes have `width * height` samples. Plane order follows the 2x2
/// Bayer block order of the frame metadata: top-left, top-right,
/// bottom-left, bottom-right.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadingMap {
    planes: [Vec<f32>; 4],
    width: usize,
    height: usize,
}

impl ShadingMap {
    /// Build a map from four equally sized planes.
    ///
    /// Returns `None` when the planes are empty or disagree with the given
    /// grid dimensions.
    pub fn new(planes: [Vec<f32>; 4], width: usize, height: usize) -> Option<Self> {
        let expected = width.checked_mul(height)?;
        if expected == 0 || planes.iter().any(|p| p.len() != expected) {
            return None;
        }
        Some(Self {
            planes,
            width,
            height,
        })
    }

    /// Grid of constant 1.0 gains, used when a frame carries no map.
    pub fn identity(width: usize, height: usize) -> Self {
        let len = width * height;
        Self {
            planes: [
                vec![1.0; len],
                vec![1.0; len],
                vec![1.0; len],
                vec![1.0; len],
            ],
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn planes(&self) -> &[Vec<f32>; 4] {
        &self.planes
    }

    /// Divide every sample by the global maximum. No-op on an all-zero map.
    pub fn normalize(&mut self) {
        let max = self
            .planes
            .iter()
            .flat_map(|p| p.iter())
            .fold(0.0f32, |acc, &v| acc.max(v));

        if max == 0.0 {
            return;
        }

        for plane in &mut self.planes {
            for v in plane {
                *v /= max;
            }
        }
    }

    /// Replace every gain by its reciprocal. No-op unless all samples are
    /// strictly positive.
    pub fn invert(&mut self) {
        let all_positive = self.planes.iter().flat_map(|p| p.iter()).all(|&v| v > 0.0);
        if !all_positive {
            return;
        }

        for plane in &mut self.planes {
            for v in plane {
                *v = 1.0 / *v;
            }
        }
    }

    /// Reshape the map so its luminance component is 1 everywhere while the
    /// per-pixel channel ratios (the color tint) survive.
    ///
    /// Per-plane minima are gathered first, with the two green planes of
    /// `cfa` merged to their common minimum; a non-positive minimum means
    /// the map cannot be reshaped and the call is a no-op. Every grid
    /// position is then divided by the local minimum across the four planes.
    pub fn color_only(&mut self, cfa: CfaPhase) {
        let max = self
            .planes
            .iter()
            .flat_map(|p| p.iter())
            .fold(0.0f32, |acc, &v| acc.max(v));
        if max == 0.0 {
            return;
        }

        let mut minima = [f32::MAX; 4];
        for (plane, min) in self.planes.iter().zip(minima.iter_mut()) {
            for &v in plane {
                *min = min.min(v);
            }
        }

        // Symmetric green sites share one minimum.
        let (g0, g1) = cfa.green_indices();
        let merged = minima[g0].min(minima[g1]);
        minima[g0] = merged;
        minima[g1] = merged;

        if minima.iter().any(|&m| m <= 0.0) {
            return;
        }

        for i in 0..self.width * self.height {
            let local = self.planes[0][i]
                .min(self.planes[1][i])
                .min(self.planes[2][i])
                .min(self.planes[3][i]);
            for plane in &mut self.planes {
                plane[i] /= local;
            }
        }
    }

    /// Bilinear sample of one plane at normalized coordinates.
    ///
    /// `x` and `y` are clamped to `[0, 1]`; `(0, 0)` maps to the first grid
    /// cell, `(1, 1)` to the last.
    pub fn sample(&self, channel: usize, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);

        let map_x = x * (self.width - 1) as f32;
        let map_y = y * (self.height - 1) as f32;

        let x0 = map_x.floor() as usize;
        let y0 = map_y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let wx = map_x - x0 as f32;
        let wy = map_y - y0 as f32;

        let plane = &self.planes[channel];
        let val00 = plane[y0 * self.width + x0];
        let val01 = plane[y0 * self.width + x1];
        let val10 = plane[y1 * self.width + x0];
        let val11 = plane[y1 * self.width + x1];

        let top = val00 * (1.0 - wx) + val01 * wx;
        let bottom = val10 * (1.0 - wx) + val11 * wx;

        top * (1.0 - wy) + bottom * wy
    }
}
