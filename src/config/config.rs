//! # Configuration Module
//!
//! Configuration for the remediation pipeline, shared by the CLI, the
//! dispatcher and long-running sessions.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Range | Default | Description |
//! |-----------|------|-------|---------|-------------|
//! | `target_contrast` | `f64` | 1-21 | 7.0 | Required WCAG ratio |
//! | `max_distance` | `f32` | > 0 | 3.0 | Edge distance for glyph pixels (inclusive) |
//! | `sample_distance` | `f32` | > 0 | 5.0 | How far outside the edge the background is read |
//! | `pixel_capacity` | `usize` | 1 to `Layout::max_pixel_capacity()` | 2097152 | Transfer buffer pixel slots |
//! | `region_tile` | `u32` | >= 1 | 32 | Smallest region tile side |
//! | `bbox_density_threshold` | `f32` | (0, 1] | 0.25 | Box read once samples exceed this share of the box |
//! | `fallback_search_radius` | `u32` | any | 8 | Ring radius for borrowing a gradient |
//! | `adjust_iterations` | `u32` | 1-64 | 24 | Lightness bisection steps |
//! | `completion_timeout_ms` | `u64` | >= 1 | 2000 | Bound on the completion wait |
//! | `poll_interval_us` | `u64` | >= 1 | 200 | Flag polling period |
//! | `backend` | `BackendPreference` | | auto | Highest tier to try |
//! | `worker_threads` | `Option<usize>` | >= 1 | auto | Parallel pool size |
//!
//! ## WCAG Levels
//!
//! - `aa`: 4.5
//! - `aa-large`: 3.0
//! - `aaa`: 7.0 (default)
//! - `aaa-large`: 4.5
//!
//! ## Examples
//!
//! ```rust
//! use contrast_remediation::config::EnhanceConfig;
//! use contrast_remediation::WcagLevel;
//!
//! let config = EnhanceConfig::default().with_level(WcagLevel::AaNormal);
//! assert_eq!(config.target_contrast, 4.5);
//! assert!(config.validate().is_ok());
//!
//! let config = EnhanceConfig::from_json_str(r#"{ "max_distance": 2.0 }"#).unwrap();
//! assert_eq!(config.max_distance, 2.0);
//! assert_eq!(config.sample_distance, 5.0);
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use contrast_kernel::{EnhanceParams, WcagLevel};
use serde::{Deserialize, Serialize};

use crate::core::Layout;
use crate::error::{RemediationError, RemediationResult};

/// Highest backend tier the dispatcher may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Gpu,
    Parallel,
    Scalar,
    Disabled,
}

impl FromStr for BackendPreference {
    type Err = RemediationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gpu" => Ok(Self::Gpu),
            "parallel" => Ok(Self::Parallel),
            "scalar" => Ok(Self::Scalar),
            "disabled" | "none" => Ok(Self::Disabled),
            _ => Err(RemediationError::config(
                "backend",
                s,
                "expected one of: auto, gpu, parallel, scalar, disabled",
            )),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    pub target_contrast: f64,
    pub max_distance: f32,
    pub sample_distance: f32,
    /// Pixel slots reserved in the transfer buffer. Fixed for the
    /// dispatcher's lifetime.
    pub pixel_capacity: usize,
    pub region_tile: u32,
    pub bbox_density_threshold: f32,
    pub fallback_search_radius: u32,
    pub adjust_iterations: u32,
    pub completion_timeout_ms: u64,
    pub poll_interval_us: u64,
    pub backend: BackendPreference,
    /// `None` lets rayon pick from the available parallelism.
    pub worker_threads: Option<usize>,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            target_contrast: WcagLevel::AaaNormal.threshold(),
            max_distance: 3.0,
            sample_distance: 5.0,
            pixel_capacity: 2_097_152,
            region_tile: 32,
            bbox_density_threshold: 0.25,
            fallback_search_radius: 8,
            adjust_iterations: 24,
            completion_timeout_ms: 2000,
            poll_interval_us: 200,
            backend: BackendPreference::Auto,
            worker_threads: None,
        }
    }
}

impl EnhanceConfig {
    pub fn with_level(mut self, level: WcagLevel) -> Self {
        self.target_contrast = level.threshold();
        self
    }

    pub fn from_json_str(json: &str) -> RemediationResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> RemediationResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RemediationError::io("read config", e).with_path(path.display().to_string())
        })?;
        Self::from_json_str(&text)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if !(1.0..=21.0).contains(&self.target_contrast) {
            return Err("target_contrast must be between 1 and 21".to_string());
        }
        if !(self.max_distance.is_finite() && self.max_distance > 0.0) {
            return Err("max_distance must be a positive number".to_string());
        }
        if !(self.sample_distance.is_finite() && self.sample_distance > 0.0) {
            return Err("sample_distance must be a positive number".to_string());
        }
        if self.pixel_capacity == 0 {
            return Err("pixel_capacity must be greater than 0".to_string());
        }
        if let Err(e) = Layout::checked(self.pixel_capacity) {
            return Err(e.to_string());
        }
        if self.region_tile == 0 {
            return Err("region_tile must be greater than 0".to_string());
        }
        if !(self.bbox_density_threshold > 0.0 && self.bbox_density_threshold <= 1.0) {
            return Err("bbox_density_threshold must be in (0, 1]".to_string());
        }
        if !(1..=64).contains(&self.adjust_iterations) {
            return Err("adjust_iterations must be between 1 and 64".to_string());
        }
        if self.completion_timeout_ms == 0 {
            return Err("completion_timeout_ms must be greater than 0".to_string());
        }
        if self.poll_interval_us == 0 {
            return Err("poll_interval_us must be greater than 0".to_string());
        }
        if self.worker_threads == Some(0) {
            return Err("worker_threads must be at least 1".to_string());
        }
        Ok(())
    }

    /// Kernel parameters for one frame.
    pub fn params(&self) -> EnhanceParams {
        EnhanceParams {
            target_contrast: self.target_contrast,
            max_distance: self.max_distance,
            sample_distance: self.sample_distance,
            region_tile: self.region_tile,
            bbox_density_threshold: self.bbox_density_threshold,
            fallback_search_radius: self.fallback_search_radius,
            adjust_iterations: self.adjust_iterations,
        }
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EnhanceConfig::default();
        assert_eq!(config.target_contrast, 7.0);
        assert_eq!(config.max_distance, 3.0);
        assert_eq!(config.sample_distance, 5.0);
        assert_eq!(config.backend, BackendPreference::Auto);
        assert!(config.params().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EnhanceConfig::default();
        assert!(config.validate().is_ok());

        config.target_contrast = 0.5;
        assert!(config.validate().is_err());
        config.target_contrast = 7.0;

        config.max_distance = -1.0;
        assert!(config.validate().is_err());
        config.max_distance = 3.0;

        config.pixel_capacity = 0;
        assert!(config.validate().is_err());
        config.pixel_capacity = 1024;

        config.worker_threads = Some(0);
        assert!(config.validate().is_err());
        config.worker_threads = Some(2);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pixel_capacity_bounded_by_header_offsets() {
        let max = Layout::max_pixel_capacity();
        let mut config = EnhanceConfig {
            pixel_capacity: max,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.pixel_capacity = max + 1;
        let err = config.validate().unwrap_err();
        assert!(err.contains("pixel_capacity"), "{err}");

        config.pixel_capacity = 600_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let config =
            EnhanceConfig::from_json_str(r#"{ "target_contrast": 4.5, "backend": "scalar" }"#)
                .unwrap();
        assert_eq!(config.target_contrast, 4.5);
        assert_eq!(config.backend, BackendPreference::Scalar);
        assert_eq!(config.pixel_capacity, 2_097_152);

        assert!(EnhanceConfig::from_json_str(r#"{ "backend": "quantum" }"#).is_err());
    }

    #[test]
    fn test_backend_preference_parse() {
        assert_eq!("Parallel".parse::<BackendPreference>().unwrap(), BackendPreference::Parallel);
        assert_eq!("none".parse::<BackendPreference>().unwrap(), BackendPreference::Disabled);
        assert!("fast".parse::<BackendPreference>().is_err());
    }
}
