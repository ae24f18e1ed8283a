// SPDX-License-Identifier: MIT
// Per-frame tunables for the kernel passes.

use crate::error::{KernelError, KernelResult};
use crate::sample::{BackgroundSampler, DEFAULT_BBOX_DENSITY, DEFAULT_FALLBACK_RADIUS};
use crate::wcag::DEFAULT_ADJUST_ITERATIONS;

/// Numeric knobs shared by extraction, sampling and adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhanceParams {
    /// Required ratio, in [1, 21].
    pub target_contrast: f64,
    /// Glyph pixels farther than this from an edge are skipped (inclusive).
    pub max_distance: f32,
    /// How far past the edge the background is read.
    pub sample_distance: f32,
    /// Smallest region tile side; grows until the frame fits 256 regions.
    pub region_tile: u32,
    pub bbox_density_threshold: f32,
    pub fallback_search_radius: u32,
    pub adjust_iterations: u32,
}

impl Default for EnhanceParams {
    fn default() -> Self {
        Self {
            target_contrast: 7.0,
            max_distance: 3.0,
            sample_distance: 5.0,
            region_tile: 32,
            bbox_density_threshold: DEFAULT_BBOX_DENSITY,
            fallback_search_radius: DEFAULT_FALLBACK_RADIUS,
            adjust_iterations: DEFAULT_ADJUST_ITERATIONS,
        }
    }
}

impl EnhanceParams {
    pub fn validate(&self) -> KernelResult<()> {
        let bad = |name: &'static str, value: f64| -> KernelResult<()> {
            Err(KernelError::InvalidParameter { name, value })
        };

        if !(1.0..=21.0).contains(&self.target_contrast) {
            return bad("target_contrast", self.target_contrast);
        }
        if !self.max_distance.is_finite() || self.max_distance <= 0.0 {
            return bad("max_distance", self.max_distance as f64);
        }
        if !self.sample_distance.is_finite() || self.sample_distance <= 0.0 {
            return bad("sample_distance", self.sample_distance as f64);
        }
        if self.region_tile == 0 {
            return bad("region_tile", 0.0);
        }
        if !(self.bbox_density_threshold > 0.0 && self.bbox_density_threshold <= 1.0) {
            return bad("bbox_density_threshold", self.bbox_density_threshold as f64);
        }
        if self.adjust_iterations == 0 || self.adjust_iterations > 64 {
            return bad("adjust_iterations", self.adjust_iterations as f64);
        }
        Ok(())
    }

    pub fn sampler(&self) -> BackgroundSampler {
        BackgroundSampler {
            sample_distance: self.sample_distance,
            bbox_density: self.bbox_density_threshold,
            fallback_radius: self.fallback_search_radius,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EnhanceParams::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let p = EnhanceParams { target_contrast: 22.0, ..Default::default() };
        assert!(matches!(
            p.validate(),
            Err(KernelError::InvalidParameter { name: "target_contrast", .. })
        ));

        let p = EnhanceParams { max_distance: 0.0, ..Default::default() };
        assert!(p.validate().is_err());

        let p = EnhanceParams { sample_distance: f32::NAN, ..Default::default() };
        assert!(p.validate().is_err());

        let p = EnhanceParams { bbox_density_threshold: 1.5, ..Default::default() };
        assert!(p.validate().is_err());
    }
}
