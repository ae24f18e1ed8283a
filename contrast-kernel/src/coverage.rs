// SPDX-License-Identifier: MIT
//! # Grayscale / Gradient Pass
//!
//! Converts a captured RGBA frame into a per-pixel coverage field (how much of
//! the pixel is covered by glyph ink) plus a Sobel estimate of the coverage
//! gradient. The gradient only orients the seeds of anti-aliased pixels; the
//! final sampling direction always comes from the distance transform.
//!
//! Luminance uses fixed Rec. 601 weights. Text polarity is decided once per
//! frame from mean luminance: a light frame is assumed to carry dark text.
//! Coverage is luminance stretched over the frame's own range, so the
//! darkest pixel of a dark-on-light frame has coverage exactly 1 and the
//! lightest exactly 0. A frame with no luminance range has zero coverage.
//!
//! The Sobel operator is separable (derivative `[-1, 0, 1]`, smoothing
//! `[1, 2, 1]`) and borders are clamped, so a uniform frame yields exactly
//! zero gradient everywhere.

use rayon::prelude::*;

use crate::pixels::RgbaView;

/// Rec. 601 luma weights for R, G, B.
pub const REC601_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Below this luminance spread (one 8-bit step) a frame has no text.
const MIN_LUMA_RANGE: f32 = 1.0 / 255.0;

/// Which side of the luminance range carries the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Dark glyphs on a light background: coverage falls as luma rises.
    DarkOnLight,
    /// Light glyphs on a dark background: coverage rises with luma.
    LightOnDark,
}

/// Coverage in [0, 1] per pixel plus the initial gradient estimate.
#[derive(Debug, Clone)]
pub struct CoverageField {
    width: u32,
    height: u32,
    polarity: Polarity,
    values: Vec<f32>,
    grad_x: Vec<f32>,
    grad_y: Vec<f32>,
}

/// Edge emphasis weight `4α(1-α)`: 1 at α = 0.5, 0 at the extremes.
#[inline]
pub fn edge_weight(alpha: f32) -> f32 {
    let a = alpha.clamp(0.0, 1.0);
    4.0 * a * (1.0 - a)
}

/// One-dimensional offset of an anti-aliased pixel from its edge, measured
/// into the glyph: `α - 0.5`, bounded to [-0.5, 0.5].
#[inline]
pub fn gray_offset(alpha: f32) -> f32 {
    alpha.clamp(0.0, 1.0) - 0.5
}

#[inline]
fn luma(px: &[u8]) -> f32 {
    (REC601_WEIGHTS[0] * px[0] as f32
        + REC601_WEIGHTS[1] * px[1] as f32
        + REC601_WEIGHTS[2] * px[2] as f32)
        / 255.0
}

impl CoverageField {
    /// Run the pass with polarity detected from the frame.
    pub fn from_rgba(view: &RgbaView<'_>) -> Self {
        let polarity = detect_polarity(view);
        Self::with_polarity(view, polarity)
    }

    pub fn with_polarity(view: &RgbaView<'_>, polarity: Polarity) -> Self {
        let w = view.width() as usize;
        let mut values = vec![0.0f32; view.pixel_count()];
        values
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                let src = view.row(y as u32);
                for (x, v) in row.iter_mut().enumerate() {
                    *v = luma(&src[x * 4..x * 4 + 3]);
                }
            });

        let (lo, hi) = values
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &l| (lo.min(l), hi.max(l)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        let range = hi - lo;

        if range < MIN_LUMA_RANGE {
            log::debug!("luma range {:.4} is flat; frame has no coverage", range.max(0.0));
            values.iter_mut().for_each(|v| *v = 0.0);
        } else {
            values.par_iter_mut().for_each(|v| {
                *v = match polarity {
                    Polarity::DarkOnLight => (hi - *v) / range,
                    Polarity::LightOnDark => (*v - lo) / range,
                }
                .clamp(0.0, 1.0);
            });
        }
        Self::from_values(view.width(), view.height(), polarity, values)
    }

    /// Build from an explicit coverage raster (fixtures, host-provided masks).
    pub fn from_values(width: u32, height: u32, polarity: Polarity, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), width as usize * height as usize);
        let (grad_x, grad_y) = sobel(&values, width as usize, height as usize);
        Self {
            width,
            height,
            polarity,
            values,
            grad_x,
            grad_y,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn at(&self, idx: usize) -> f32 {
        self.values[idx]
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Sobel gradient of coverage at `idx`; points toward increasing coverage.
    #[inline]
    pub fn gradient_at(&self, idx: usize) -> [f32; 2] {
        [self.grad_x[idx], self.grad_y[idx]]
    }

    /// Same field with coverage mirrored (`1 - α`), used for the inner
    /// distance transform. Gradients flip sign.
    pub fn inverted(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            polarity: match self.polarity {
                Polarity::DarkOnLight => Polarity::LightOnDark,
                Polarity::LightOnDark => Polarity::DarkOnLight,
            },
            values: self.values.iter().map(|v| 1.0 - v).collect(),
            grad_x: self.grad_x.iter().map(|g| -g).collect(),
            grad_y: self.grad_y.iter().map(|g| -g).collect(),
        }
    }
}

/// Light frames (mean luma >= 0.5) are assumed to carry dark text.
pub fn detect_polarity(view: &RgbaView<'_>) -> Polarity {
    let total: f64 = (0..view.height())
        .into_par_iter()
        .map(|y| {
            view.row(y)
                .chunks_exact(4)
                .map(|px| luma(px) as f64)
                .sum::<f64>()
        })
        .sum();
    let mean = total / view.pixel_count() as f64;
    if mean >= 0.5 {
        Polarity::DarkOnLight
    } else {
        Polarity::LightOnDark
    }
}

/// 3x3 Sobel with clamp-to-edge addressing.
fn sobel(values: &[f32], w: usize, h: usize) -> (Vec<f32>, Vec<f32>) {
    let at = |x: isize, y: isize| -> f32 {
        let cx = x.clamp(0, w as isize - 1) as usize;
        let cy = y.clamp(0, h as isize - 1) as usize;
        values[cy * w + cx]
    };

    let rows: Vec<(Vec<f32>, Vec<f32>)> = (0..h)
        .into_par_iter()
        .map(|y| {
            let y = y as isize;
            let mut gx = vec![0.0f32; w];
            let mut gy = vec![0.0f32; w];
            for x in 0..w {
                let x = x as isize;
                let tl = at(x - 1, y - 1);
                let tc = at(x, y - 1);
                let tr = at(x + 1, y - 1);
                let ml = at(x - 1, y);
                let mr = at(x + 1, y);
                let bl = at(x - 1, y + 1);
                let bc = at(x, y + 1);
                let br = at(x + 1, y + 1);
                gx[x as usize] = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
                gy[x as usize] = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
            }
            (gx, gy)
        })
        .collect();

    let mut grad_x = Vec::with_capacity(w * h);
    let mut grad_y = Vec::with_capacity(w * h);
    for (gx, gy) in rows {
        grad_x.extend(gx);
        grad_y.extend(gy);
    }
    (grad_x, grad_y)
}
