// SPDX-License-Identifier: MIT
//! # contrast-kernel: Edge-Aware Contrast Kernels for On-Screen Text
//!
//! CPU implementations of the per-frame passes that locate glyph edges in a
//! captured frame, read the background just outside them, and compute
//! WCAG-conforming replacement colours.
//!
//! ## Pass Order
//!
//! 1. [`coverage`]: RGBA to coverage field plus Sobel gradient
//! 2. [`esdt`]: signed offset-vector distance transform
//! 3. [`extract`]: glyph pixels within `max_distance` of an edge, tagged by region
//! 4. [`sample`]: background colour along each pixel's outward gradient
//! 5. [`wcag`]: luminance, ratio and hue-preserving lightness adjustment
//!
//! Every pass is pure over its inputs. Parallelism is internal (rayon) and
//! follows whatever pool the caller installs, so a single-threaded pool
//! gives a scalar run with identical results.
//!
//! ## Usage Example
//!
//! ```rust
//! use contrast_kernel::{CoverageField, DistanceFields, RgbaView};
//!
//! let data = vec![255u8; 16 * 16 * 4];
//! let view = RgbaView::packed(&data, 16, 16).unwrap();
//! let coverage = CoverageField::from_rgba(&view);
//! let fields = DistanceFields::compute(&coverage);
//! assert_eq!(fields.outer.to_flat().len(), 16 * 16 * 2);
//! ```

pub mod coverage;
pub mod error;
pub mod esdt;
pub mod extract;
pub mod field;
pub mod params;
pub mod pixels;
pub mod sample;
pub mod wcag;

pub use coverage::{edge_weight, gray_offset, CoverageField, Polarity};
pub use error::{KernelError, KernelResult};
pub use esdt::{esdt, DistanceFields};
pub use extract::{estimate_region_colours, extract_glyph_pixels, GlyphPixel, RegionGrid, MAX_REGIONS};
pub use field::{Offset, OffsetField, GRADIENT_EPSILON, OFFSET_INF};
pub use params::EnhanceParams;
pub use pixels::{PixelRect, PixelSource, RgbaView};
pub use sample::{BackgroundSampler, ReadPlan};
pub use wcag::{contrast_ratio, relative_luminance, ColourCache, ContrastAnalyzer, ContrastResult, WcagLevel};
