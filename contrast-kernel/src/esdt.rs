// SPDX-License-Identifier: MIT
//! # ESDT Propagation
//!
//! Separable offset-vector distance transform. Each pixel carries the
//! displacement from its nearest edge point; two one-dimensional sweeps (X
//! over rows, then Y over columns of the X result) carry those vectors across
//! the image in O(width * height).
//!
//! ## Seeding
//!
//! | coverage α | seed |
//! |------------|------|
//! | α >= 1 | `(0, 0)` (glyph interior, never changes) |
//! | α <= 0 | sentinel |
//! | 0 < α < 1 | `m * (α - 0.5)` with `m` the unit Sobel direction into the glyph, `(1, 0)` when flat |
//!
//! ## Neighbourhood
//!
//! Propagation is 4-connected: each sweep only looks at the immediate
//! predecessor along its axis, carrying full 2D vectors. Candidates replace
//! the current offset only when strictly shorter, so an earlier sweep's value
//! survives an equal-length later candidate. Errors against a true Euclidean
//! transform stay below one pixel for the glyph-scale distances used here.
//!
//! ## Signed fields
//!
//! [`DistanceFields`] runs the transform twice: on coverage (outer field,
//! offsets toward ink) and on inverted coverage (inner field, offsets toward
//! background). Anti-aliased seeds are identical in both since they describe
//! the same edge point.

use rayon::prelude::*;

use crate::coverage::{gray_offset, CoverageField};
use crate::field::{Offset, OffsetField, GRADIENT_EPSILON};

/// Columns handed to one rayon task during the Y sweep.
const Y_SWEEP_MIN_LEN: usize = 256;

/// Initial offsets before propagation.
pub fn seed_offsets(coverage: &CoverageField) -> OffsetField {
    let w = coverage.width();
    let h = coverage.height();
    let offsets: Vec<Offset> = (0..coverage.values().len())
        .into_par_iter()
        .map(|idx| {
            let alpha = coverage.at(idx);
            if alpha >= 1.0 {
                Offset::ZERO
            } else if alpha <= 0.0 {
                Offset::INF
            } else {
                let d = gray_offset(alpha);
                let [gx, gy] = coverage.gradient_at(idx);
                let len = (gx * gx + gy * gy).sqrt();
                if len > GRADIENT_EPSILON {
                    Offset::new(gx / len * d, gy / len * d)
                } else {
                    Offset::new(d, 0.0)
                }
            }
        })
        .collect();
    OffsetField::from_offsets(w, h, offsets)
}

/// X pass then Y pass, in place.
pub fn propagate(field: &mut OffsetField) {
    x_pass(field);
    y_pass(field);
}

/// Seed and propagate: offsets from each pixel's nearest glyph edge.
pub fn esdt(coverage: &CoverageField) -> OffsetField {
    let mut field = seed_offsets(coverage);
    propagate(&mut field);
    field
}

#[inline]
fn relax(current: &mut Offset, candidate: Offset) {
    if candidate.length_squared() < current.length_squared() {
        *current = candidate;
    }
}

/// Horizontal sweeps, rows in parallel.
pub fn x_pass(field: &mut OffsetField) {
    let w = field.width() as usize;
    if w == 0 {
        return;
    }
    field.offsets_mut().par_chunks_mut(w).for_each(sweep_row);
}

fn sweep_row(row: &mut [Offset]) {
    for i in 1..row.len() {
        let prev = row[i - 1];
        relax(&mut row[i], Offset::new(prev.dx + 1.0, prev.dy));
    }
    for i in (0..row.len().saturating_sub(1)).rev() {
        let next = row[i + 1];
        relax(&mut row[i], Offset::new(next.dx - 1.0, next.dy));
    }
}

/// Vertical sweeps. Rows are visited in order; each row's pixels relax in
/// parallel against the row before (forward) or after (backward).
pub fn y_pass(field: &mut OffsetField) {
    let w = field.width() as usize;
    let h = field.height() as usize;
    if w == 0 || h < 2 {
        return;
    }
    let data = field.offsets_mut();

    for y in 1..h {
        let (above, below) = data.split_at_mut(y * w);
        let prev = &above[(y - 1) * w..];
        let cur = &mut below[..w];
        cur.par_iter_mut()
            .zip(prev.par_iter())
            .with_min_len(Y_SWEEP_MIN_LEN)
            .for_each(|(c, p)| relax(c, Offset::new(p.dx, p.dy + 1.0)));
    }

    for y in (0..h - 1).rev() {
        let (upper, lower) = data.split_at_mut((y + 1) * w);
        let cur = &mut upper[y * w..];
        let next = &lower[..w];
        cur.par_iter_mut()
            .zip(next.par_iter())
            .with_min_len(Y_SWEEP_MIN_LEN)
            .for_each(|(c, n)| relax(c, Offset::new(n.dx, n.dy - 1.0)));
    }
}

/// Outer (toward ink) and inner (toward background) offset fields.
#[derive(Debug, Clone)]
pub struct DistanceFields {
    pub outer: OffsetField,
    pub inner: OffsetField,
}

impl DistanceFields {
    pub fn compute(coverage: &CoverageField) -> Self {
        let inverted = coverage.inverted();
        let (outer, inner) = rayon::join(|| esdt(coverage), || esdt(&inverted));
        Self { outer, inner }
    }

    /// Offset whose direction points away from the glyph, toward background.
    ///
    /// Background-side pixels (α < 0.5) already carry such a vector in the
    /// outer field. Ink-side pixels use the inner field reversed.
    #[inline]
    pub fn outward(&self, idx: usize, alpha: f32) -> Offset {
        if alpha < 0.5 {
            self.outer.at(idx)
        } else {
            -self.inner.at(idx)
        }
    }
}
