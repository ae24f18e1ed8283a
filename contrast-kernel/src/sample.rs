// SPDX-License-Identifier: MIT
//! # Background Sampler
//!
//! Estimates the colour behind each glyph pixel by stepping
//! `sample_distance` pixels along its outward gradient and reading the frame
//! there.
//!
//! ## Degenerate offsets
//!
//! Pixels whose offset is shorter than [`GRADIENT_EPSILON`] have no
//! direction. They borrow the nearest valid gradient from a glyph pixel in
//! the same region (searched in growing square rings up to
//! `fallback_radius`). Failing that, they read their own lowest-coverage
//! neighbour, or themselves when no neighbour is more background than they are.
//!
//! ## Read batching
//!
//! Samples are grouped per region. For each group the sampler either issues
//! one read per point or a single read of the group's bounding box, whichever
//! the density rule picks (see [`plan_reads`]).

use std::collections::BTreeMap;

use crate::coverage::CoverageField;
use crate::extract::GlyphPixel;
use crate::field::GRADIENT_EPSILON;
use crate::pixels::{PixelRect, PixelSource};

/// Default fraction of a bounding box that must be sampled before a single
/// box read beats individual point reads.
pub const DEFAULT_BBOX_DENSITY: f32 = 0.25;

/// Default ring radius for borrowing a neighbour's gradient.
pub const DEFAULT_FALLBACK_RADIUS: u32 = 8;

/// How a batch of sample positions is read from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    Points,
    BoundingBox(PixelRect),
}

/// Bounding-box read once `points.len() > density * box_area`.
pub fn plan_reads(points: &[(u32, u32)], density: f32) -> ReadPlan {
    let Some(&(x0, y0)) = points.first() else {
        return ReadPlan::Points;
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
    for &(x, y) in &points[1..] {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let rect = PixelRect {
        x: min_x,
        y: min_y,
        w: max_x - min_x + 1,
        h: max_y - min_y + 1,
    };
    if points.len() as f32 > density * rect.area() as f32 {
        ReadPlan::BoundingBox(rect)
    } else {
        ReadPlan::Points
    }
}

/// Read `points` from `source` following `plan`. Output order matches input.
pub fn read_batch<S: PixelSource + ?Sized>(
    source: &S,
    points: &[(u32, u32)],
    plan: ReadPlan,
    staging: &mut Vec<u8>,
) -> Vec<[u8; 3]> {
    match plan {
        ReadPlan::Points => points
            .iter()
            .map(|&(x, y)| {
                let p = source.read_pixel(x, y);
                [p[0], p[1], p[2]]
            })
            .collect(),
        ReadPlan::BoundingBox(rect) => {
            source.read_rect(rect, staging);
            let row = rect.w as usize * 4;
            points
                .iter()
                .map(|&(x, y)| {
                    let off = (y - rect.y) as usize * row + (x - rect.x) as usize * 4;
                    [staging[off], staging[off + 1], staging[off + 2]]
                })
                .collect()
        }
    }
}

/// Sampling configuration.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundSampler {
    pub sample_distance: f32,
    pub bbox_density: f32,
    pub fallback_radius: u32,
}

impl Default for BackgroundSampler {
    fn default() -> Self {
        Self {
            sample_distance: 5.0,
            bbox_density: DEFAULT_BBOX_DENSITY,
            fallback_radius: DEFAULT_FALLBACK_RADIUS,
        }
    }
}

impl BackgroundSampler {
    /// Where each glyph pixel's background is read, clamped to the frame.
    pub fn sample_positions(&self, pixels: &[GlyphPixel], coverage: &CoverageField) -> Vec<(u32, u32)> {
        let w = coverage.width();
        let h = coverage.height();

        // Valid gradients indexed by pixel, for the same-region fallback.
        let mut valid: Vec<Option<(u16, [f32; 2])>> = vec![None; w as usize * h as usize];
        for px in pixels {
            let g = px.offset.gradient();
            if g != [0.0, 0.0] {
                valid[(px.y * w + px.x) as usize] = Some((px.region, g));
            }
        }

        pixels
            .iter()
            .map(|px| {
                let g = px.offset.gradient();
                let dir = if g != [0.0, 0.0] {
                    Some(g)
                } else {
                    self.borrow_gradient(px, &valid, w, h)
                };
                match dir {
                    Some([gx, gy]) => self.step(px.x, px.y, gx, gy, w, h),
                    None => background_neighbour(px.x, px.y, coverage),
                }
            })
            .collect()
    }

    /// Background colour per glyph pixel, batched per region.
    pub fn sample<S: PixelSource + ?Sized>(
        &self,
        source: &S,
        pixels: &[GlyphPixel],
        coverage: &CoverageField,
    ) -> Vec<[u8; 3]> {
        let positions = self.sample_positions(pixels, coverage);

        let mut groups: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
        for (i, px) in pixels.iter().enumerate() {
            groups.entry(px.region).or_default().push(i);
        }

        let mut out = vec![[0u8; 3]; pixels.len()];
        let mut staging = Vec::new();
        let mut batch = Vec::new();
        for indices in groups.values() {
            batch.clear();
            batch.extend(indices.iter().map(|&i| positions[i]));
            let plan = plan_reads(&batch, self.bbox_density);
            let colours = read_batch(source, &batch, plan, &mut staging);
            for (&i, c) in indices.iter().zip(colours) {
                out[i] = c;
            }
        }
        out
    }

    fn step(&self, x: u32, y: u32, gx: f32, gy: f32, w: u32, h: u32) -> (u32, u32) {
        let sx = (x as f32 + gx * self.sample_distance).round();
        let sy = (y as f32 + gy * self.sample_distance).round();
        (
            sx.clamp(0.0, (w - 1) as f32) as u32,
            sy.clamp(0.0, (h - 1) as f32) as u32,
        )
    }

    fn borrow_gradient(
        &self,
        px: &GlyphPixel,
        valid: &[Option<(u16, [f32; 2])>],
        w: u32,
        h: u32,
    ) -> Option<[f32; 2]> {
        let (cx, cy) = (px.x as i64, px.y as i64);
        let mut best: Option<(i64, [f32; 2])> = None;
        for r in 1..=self.fallback_radius as i64 {
            // Ring r holds nothing closer than r, so stop once the best is nearer.
            if let Some((d2, _)) = best {
                if d2 <= r * r {
                    break;
                }
            }
            for dy in -r..=r {
                let on_edge_row = dy == -r || dy == r;
                let step = if on_edge_row { 1 } else { 2 * r };
                let mut dx = -r;
                while dx <= r {
                    let (nx, ny) = (cx + dx, cy + dy);
                    if nx >= 0 && ny >= 0 && nx < w as i64 && ny < h as i64 {
                        if let Some((region, g)) = valid[(ny * w as i64 + nx) as usize] {
                            let d2 = dx * dx + dy * dy;
                            if region == px.region && best.is_none_or(|(b, _)| d2 < b) {
                                best = Some((d2, g));
                            }
                        }
                    }
                    dx += step;
                }
            }
        }
        best.map(|(_, g)| g)
    }
}

/// Lowest-coverage 8-neighbour strictly below the pixel's own coverage, or
/// the pixel itself.
fn background_neighbour(x: u32, y: u32, coverage: &CoverageField) -> (u32, u32) {
    let (w, h) = (coverage.width() as i64, coverage.height() as i64);
    let mut best = (x, y);
    let mut best_cov = coverage.get(x, y);
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            let (nx, ny) = (x as i64 + dx, y as i64 + dy);
            if (dx == 0 && dy == 0) || nx < 0 || ny < 0 || nx >= w || ny >= h {
                continue;
            }
            let c = coverage.get(nx as u32, ny as u32);
            if c + GRADIENT_EPSILON < best_cov {
                best_cov = c;
                best = (nx as u32, ny as u32);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Polarity;
    use crate::field::Offset;
    use crate::pixels::RgbaView;
    use std::cell::Cell;

    struct CountingSource<'a> {
        view: RgbaView<'a>,
        point_reads: Cell<usize>,
        rect_reads: Cell<usize>,
    }

    impl PixelSource for CountingSource<'_> {
        fn dimensions(&self) -> (u32, u32) {
            self.view.dimensions()
        }
        fn read_pixel(&self, x: u32, y: u32) -> [u8; 4] {
            self.point_reads.set(self.point_reads.get() + 1);
            self.view.read_pixel(x, y)
        }
        fn read_rect(&self, rect: PixelRect, out: &mut Vec<u8>) {
            self.rect_reads.set(self.rect_reads.get() + 1);
            self.view.read_rect(rect, out)
        }
    }

    fn glyph(x: u32, y: u32, region: u16, offset: Offset) -> GlyphPixel {
        GlyphPixel { x, y, coverage: 1.0, region, offset }
    }

    fn gradient_frame(w: u32, h: u32) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..h {
            for x in 0..w {
                let v = (x * 10) as u8;
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        data
    }

    #[test]
    fn test_plan_switches_on_density() {
        let sparse = [(0, 0), (9, 9)];
        assert_eq!(plan_reads(&sparse, 0.25), ReadPlan::Points);

        let dense: Vec<(u32, u32)> = (0..4).flat_map(|y| (0..4).map(move |x| (x, y))).collect();
        assert_eq!(
            plan_reads(&dense, 0.25),
            ReadPlan::BoundingBox(PixelRect { x: 0, y: 0, w: 4, h: 4 })
        );
        assert_eq!(plan_reads(&[], 0.25), ReadPlan::Points);
    }

    #[test]
    fn test_samples_along_gradient() {
        let data = gradient_frame(20, 3);
        let view = RgbaView::packed(&data, 20, 3).unwrap();
        let cov = CoverageField::from_values(20, 3, Polarity::DarkOnLight, vec![0.0; 60]);
        let sampler = BackgroundSampler::default();

        let pixels = [glyph(2, 1, 0, Offset::new(1.0, 0.0))];
        assert_eq!(sampler.sample_positions(&pixels, &cov), vec![(7, 1)]);
        assert_eq!(sampler.sample(&view, &pixels, &cov), vec![[70, 70, 70]]);

        // Clamped at the frame border.
        let pixels = [glyph(18, 1, 0, Offset::new(2.0, 0.0))];
        assert_eq!(sampler.sample_positions(&pixels, &cov), vec![(19, 1)]);
    }

    #[test]
    fn test_degenerate_offset_borrows_same_region() {
        let cov = CoverageField::from_values(20, 5, Polarity::DarkOnLight, vec![1.0; 100]);
        let sampler = BackgroundSampler::default();
        let pixels = [
            glyph(5, 2, 0, Offset::ZERO),
            glyph(7, 2, 0, Offset::new(0.0, -1.0)),
            glyph(6, 2, 1, Offset::new(1.0, 0.0)),
        ];
        let pos = sampler.sample_positions(&pixels, &cov);
        // Nearest same-region gradient is (0, -1) two pixels away, not the
        // closer pixel from region 1.
        assert_eq!(pos[0], (5, 0));
    }

    #[test]
    fn test_degenerate_offset_without_neighbours_uses_background_side() {
        let mut values = vec![1.0f32; 9];
        values[5] = 0.2; // (2, 1)
        let cov = CoverageField::from_values(3, 3, Polarity::DarkOnLight, values);
        let sampler = BackgroundSampler::default();
        let pixels = [glyph(1, 1, 0, Offset::ZERO)];
        assert_eq!(sampler.sample_positions(&pixels, &cov), vec![(2, 1)]);

        let flat = CoverageField::from_values(3, 3, Polarity::DarkOnLight, vec![1.0; 9]);
        assert_eq!(sampler.sample_positions(&pixels, &flat), vec![(1, 1)]);
    }

    #[test]
    fn test_dense_region_uses_one_box_read() {
        let data = gradient_frame(8, 8);
        let view = RgbaView::packed(&data, 8, 8).unwrap();
        let source = CountingSource {
            view,
            point_reads: Cell::new(0),
            rect_reads: Cell::new(0),
        };
        let cov = CoverageField::from_values(8, 8, Polarity::DarkOnLight, vec![0.0; 64]);
        let sampler = BackgroundSampler { sample_distance: 1.0, ..Default::default() };

        let pixels: Vec<GlyphPixel> = (0..4)
            .flat_map(|y| (0..4).map(move |x| glyph(x, y, 0, Offset::new(1.0, 0.0))))
            .collect();
        let colours = sampler.sample(&source, &pixels, &cov);
        assert_eq!(source.rect_reads.get(), 1);
        assert_eq!(source.point_reads.get(), 0);
        assert_eq!(colours[0], [10, 10, 10]);
        assert_eq!(colours[3], [40, 40, 40]);
    }
}
