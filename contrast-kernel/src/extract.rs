// SPDX-License-Identifier: MIT
//! # Glyph Pixel Extraction
//!
//! Selects ink pixels that lie within `max_distance` of a glyph edge and tags
//! each with a region id. Pixels beyond the threshold are left out of the
//! list entirely, which bounds sampling and contrast work to edge-adjacent
//! pixels.
//!
//! Regions are square tiles. The tile grows until the frame holds at most
//! [`MAX_REGIONS`] of them, so ids always fit the transfer buffer's colour
//! table.

use rayon::prelude::*;

use crate::coverage::CoverageField;
use crate::esdt::DistanceFields;
use crate::field::Offset;
use crate::pixels::RgbaView;

/// Upper bound on regions per frame.
pub const MAX_REGIONS: usize = 256;

/// Pixels at or above this coverage count as solid ink when estimating the
/// text colour of a region.
const SOLID_COVERAGE: f32 = 0.5;

/// An ink pixel near an edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphPixel {
    pub x: u32,
    pub y: u32,
    pub coverage: f32,
    pub region: u16,
    /// Outward offset (see [`DistanceFields::outward`]).
    pub offset: Offset,
}

/// Tiling of the frame into at most [`MAX_REGIONS`] regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGrid {
    tile: u32,
    cols: u32,
    rows: u32,
}

impl RegionGrid {
    pub fn new(width: u32, height: u32, min_tile: u32) -> Self {
        let mut tile = min_tile.max(1);
        loop {
            let cols = width.div_ceil(tile).max(1);
            let rows = height.div_ceil(tile).max(1);
            if (cols * rows) as usize <= MAX_REGIONS {
                return Self { tile, cols, rows };
            }
            tile *= 2;
        }
    }

    pub fn tile(&self) -> u32 {
        self.tile
    }

    pub fn region_count(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    #[inline]
    pub fn region_of(&self, x: u32, y: u32) -> u16 {
        ((y / self.tile) * self.cols + (x / self.tile)) as u16
    }
}

/// Ink pixels (coverage > 0) whose outward distance is `<= max_distance`,
/// in raster order.
pub fn extract_glyph_pixels(
    coverage: &CoverageField,
    fields: &DistanceFields,
    grid: &RegionGrid,
    max_distance: f32,
) -> Vec<GlyphPixel> {
    let w = coverage.width();
    let limit = max_distance * max_distance;
    (0..coverage.height())
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..w).filter_map(move |x| {
                let idx = (y * w + x) as usize;
                let alpha = coverage.at(idx);
                if alpha <= 0.0 {
                    return None;
                }
                let offset = fields.outward(idx, alpha);
                if !offset.is_resolved() || offset.length_squared() > limit {
                    return None;
                }
                Some(GlyphPixel {
                    x,
                    y,
                    coverage: alpha,
                    region: grid.region_of(x, y),
                    offset,
                })
            })
        })
        .collect()
}

/// Coverage-weighted mean colour of solid ink per region. Regions with no
/// solid ink fall back to all of their glyph pixels; empty regions are black.
pub fn estimate_region_colours(
    view: &RgbaView<'_>,
    pixels: &[GlyphPixel],
    region_count: usize,
) -> Vec<[u8; 3]> {
    let mut solid = vec![[0.0f64; 4]; region_count];
    let mut any = vec![[0.0f64; 4]; region_count];

    for px in pixels {
        let rgb = view.rgb(px.x, px.y);
        let w = px.coverage as f64;
        let r = px.region as usize;
        let acc = if px.coverage >= SOLID_COVERAGE {
            &mut solid[r]
        } else {
            &mut any[r]
        };
        acc[0] += rgb[0] as f64 * w;
        acc[1] += rgb[1] as f64 * w;
        acc[2] += rgb[2] as f64 * w;
        acc[3] += w;
    }

    solid
        .iter()
        .zip(any.iter())
        .map(|(s, a)| {
            let acc = if s[3] > 0.0 {
                *s
            } else {
                [s[0] + a[0], s[1] + a[1], s[2] + a[2], s[3] + a[3]]
            };
            if acc[3] <= 0.0 {
                return [0, 0, 0];
            }
            [
                (acc[0] / acc[3]).round().clamp(0.0, 255.0) as u8,
                (acc[1] / acc[3]).round().clamp(0.0, 255.0) as u8,
                (acc[2] / acc[3]).round().clamp(0.0, 255.0) as u8,
            ]
        })
        .collect()
}
