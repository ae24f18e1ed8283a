// SPDX-License-Identifier: MIT
//! # WCAG Contrast Analysis & Adjustment
//!
//! Relative luminance and contrast ratio per WCAG 2.x, and a hue-preserving
//! lightness adjustment for text that misses its target.
//!
//! ## Constants
//!
//! The sRGB linearization threshold (`0.03928`) and exponent (`2.4`) are the
//! WCAG values, not the IEC 61966 ones; results must match WCAG checkers
//! bit-for-bit at the threshold.
//!
//! ## Adjustment
//!
//! Hue and saturation are held fixed while HSL lightness moves toward black
//! or white, whichever gives the larger achievable ratio against the sampled
//! background. For fixed hue and saturation, every RGB channel is
//! non-decreasing in lightness, so luminance is monotone and the target
//! boundary is found by bisection. The rounded `u8` colour is then nudged a
//! step at a time until it meets the target on its own, or the lightness
//! bound is reached.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::KernelError;

pub const LINEAR_THRESHOLD: f64 = 0.03928;
pub const GAMMA: f64 = 2.4;
pub const LUMINANCE_WEIGHTS: [f64; 3] = [0.2126, 0.7152, 0.0722];

/// Flare term added to both luminances in the ratio.
const FLARE: f64 = 0.05;

/// Default bisection steps for the lightness search.
pub const DEFAULT_ADJUST_ITERATIONS: u32 = 24;

/// Linearize one sRGB channel given in [0, 1].
#[inline]
pub fn linearize_unit(c: f64) -> f64 {
    if c <= LINEAR_THRESHOLD {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(GAMMA)
    }
}

#[inline]
pub fn linearize(c: u8) -> f64 {
    linearize_unit(c as f64 / 255.0)
}

/// Relative luminance of an 8-bit sRGB colour.
pub fn relative_luminance(rgb: [u8; 3]) -> f64 {
    LUMINANCE_WEIGHTS[0] * linearize(rgb[0])
        + LUMINANCE_WEIGHTS[1] * linearize(rgb[1])
        + LUMINANCE_WEIGHTS[2] * linearize(rgb[2])
}

fn luminance_unit(rgb: [f64; 3]) -> f64 {
    LUMINANCE_WEIGHTS[0] * linearize_unit(rgb[0])
        + LUMINANCE_WEIGHTS[1] * linearize_unit(rgb[1])
        + LUMINANCE_WEIGHTS[2] * linearize_unit(rgb[2])
}

/// `(L_lighter + 0.05) / (L_darker + 0.05)`, order-independent, in [1, 21].
#[inline]
pub fn contrast_ratio(l1: f64, l2: f64) -> f64 {
    let (hi, lo) = if l1 >= l2 { (l1, l2) } else { (l2, l1) };
    (hi + FLARE) / (lo + FLARE)
}

/// WCAG conformance level and text size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WcagLevel {
    AaNormal,
    AaLarge,
    #[default]
    AaaNormal,
    AaaLarge,
}

impl WcagLevel {
    pub fn threshold(self) -> f64 {
        match self {
            WcagLevel::AaNormal => 4.5,
            WcagLevel::AaLarge => 3.0,
            WcagLevel::AaaNormal => 7.0,
            WcagLevel::AaaLarge => 4.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WcagLevel::AaNormal => "aa",
            WcagLevel::AaLarge => "aa-large",
            WcagLevel::AaaNormal => "aaa",
            WcagLevel::AaaLarge => "aaa-large",
        }
    }
}

impl FromStr for WcagLevel {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aa" | "aa-normal" => Ok(WcagLevel::AaNormal),
            "aa-large" => Ok(WcagLevel::AaLarge),
            "aaa" | "aaa-normal" => Ok(WcagLevel::AaaNormal),
            "aaa-large" => Ok(WcagLevel::AaaLarge),
            _ => Err(KernelError::UnknownName {
                what: "WCAG level",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for WcagLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linearization table for all 256 channel values. Built once and shared
/// by whoever owns the pipeline.
#[derive(Debug, Clone)]
pub struct ColourCache {
    lut: [f64; 256],
}

impl ColourCache {
    pub fn new() -> Self {
        let mut lut = [0.0f64; 256];
        for (c, slot) in lut.iter_mut().enumerate() {
            *slot = linearize(c as u8);
        }
        Self { lut }
    }

    #[inline]
    pub fn linear(&self, c: u8) -> f64 {
        self.lut[c as usize]
    }

    #[inline]
    pub fn luminance(&self, rgb: [u8; 3]) -> f64 {
        LUMINANCE_WEIGHTS[0] * self.lut[rgb[0] as usize]
            + LUMINANCE_WEIGHTS[1] * self.lut[rgb[1] as usize]
            + LUMINANCE_WEIGHTS[2] * self.lut[rgb[2] as usize]
    }

    pub fn ratio(&self, a: [u8; 3], b: [u8; 3]) -> f64 {
        contrast_ratio(self.luminance(a), self.luminance(b))
    }
}

impl Default for ColourCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of checking one text/background pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastResult {
    pub text_luminance: f64,
    pub background_luminance: f64,
    /// Ratio of the original text colour.
    pub ratio: f64,
    pub target: f64,
    pub passes: bool,
    /// Replacement colour, present only when the original fails.
    pub adjusted: Option<[u8; 3]>,
    pub adjusted_ratio: Option<f64>,
}

impl ContrastResult {
    /// Colour to render and the ratio it achieves.
    pub fn resolved(&self, original: [u8; 3]) -> ([u8; 3], f64) {
        match (self.adjusted, self.adjusted_ratio) {
            (Some(c), Some(r)) => (c, r),
            _ => (original, self.ratio),
        }
    }

    /// True when the rendered colour meets the target, adjusted or not.
    pub fn meets_target(&self) -> bool {
        self.passes || self.adjusted_ratio.is_some_and(|r| r >= self.target)
    }
}

/// Per-frame analyzer: shared linearization table plus a memo of pairs
/// already adjusted this frame.
#[derive(Debug)]
pub struct ContrastAnalyzer {
    cache: Arc<ColourCache>,
    target: f64,
    iterations: u32,
    memo: HashMap<([u8; 3], [u8; 3]), ContrastResult>,
}

impl ContrastAnalyzer {
    pub fn new(cache: Arc<ColourCache>, target: f64, iterations: u32) -> Self {
        Self {
            cache,
            target,
            iterations: iterations.max(1),
            memo: HashMap::new(),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    pub fn analyze(&mut self, text: [u8; 3], background: [u8; 3]) -> ContrastResult {
        if let Some(hit) = self.memo.get(&(text, background)) {
            return *hit;
        }
        let result = self.compute(text, background);
        self.memo.insert((text, background), result);
        result
    }

    fn compute(&self, text: [u8; 3], background: [u8; 3]) -> ContrastResult {
        let lt = self.cache.luminance(text);
        let lb = self.cache.luminance(background);
        let ratio = contrast_ratio(lt, lb);
        let passes = ratio >= self.target;

        let (adjusted, adjusted_ratio) = if passes {
            (None, None)
        } else {
            let c = adjust_lightness(&self.cache, text, background, self.target, self.iterations);
            (Some(c), Some(self.cache.ratio(c, background)))
        };

        ContrastResult {
            text_luminance: lt,
            background_luminance: lb,
            ratio,
            target: self.target,
            passes,
            adjusted,
            adjusted_ratio,
        }
    }
}

/// Move `text` lightness toward black or white until it reaches `target`
/// against `background`, holding hue and saturation. Returns the extreme
/// when the target is out of reach.
pub fn adjust_lightness(
    cache: &ColourCache,
    text: [u8; 3],
    background: [u8; 3],
    target: f64,
    iterations: u32,
) -> [u8; 3] {
    let lb = cache.luminance(background);
    let darken = contrast_ratio(0.0, lb) >= contrast_ratio(1.0, lb);
    let (h, s, l0) = rgb_to_hsl(text);

    let meets = |l: f64| {
        let lum = luminance_unit(hsl_to_rgb(h, s, l));
        if darken {
            lum <= (lb + FLARE) / target - FLARE
        } else {
            lum >= target * (lb + FLARE) - FLARE
        }
    };

    // `good` always satisfies the bound when anything does; `bad` never does.
    let (mut good, mut bad) = if darken { (0.0, l0) } else { (1.0, l0) };
    if meets(good) {
        for _ in 0..iterations {
            let mid = 0.5 * (good + bad);
            if meets(mid) {
                good = mid;
            } else {
                bad = mid;
            }
        }
    }

    let step = if darken { -1.0 / 255.0 } else { 1.0 / 255.0 };
    let mut l = good;
    let mut rgb = to_u8(hsl_to_rgb(h, s, l));
    while cache.ratio(rgb, background) < target {
        let next = (l + step).clamp(0.0, 1.0);
        if next == l {
            break;
        }
        l = next;
        rgb = to_u8(hsl_to_rgb(h, s, l));
    }
    rgb
}

fn to_u8(rgb: [f64; 3]) -> [u8; 3] {
    rgb.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Hue in [0, 1), saturation and lightness in [0, 1].
pub fn rgb_to_hsl(rgb: [u8; 3]) -> (f64, f64, f64) {
    let [r, g, b] = rgb.map(|c| c as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = 0.5 * (max + min);
    let d = max - min;
    if d == 0.0 {
        return (0.0, 0.0, l);
    }
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (h / 6.0, s, l)
}

pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [f64; 3] {
    if s == 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_channel(p, q, h + 1.0 / 3.0),
        hue_channel(p, q, h),
        hue_channel(p, q, h - 1.0 / 3.0),
    ]
}

fn hue_channel(p: f64, q: f64, t: f64) -> f64 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: [u8; 3] = [0, 0, 0];
    const WHITE: [u8; 3] = [255, 255, 255];

    fn analyzer(target: f64) -> ContrastAnalyzer {
        ContrastAnalyzer::new(Arc::new(ColourCache::new()), target, DEFAULT_ADJUST_ITERATIONS)
    }

    #[test]
    fn test_linearization_branches() {
        assert_eq!(linearize(0), 0.0);
        assert!((linearize(255) - 1.0).abs() < 1e-9);
        // 10/255 sits below the threshold, 11/255 above.
        assert_eq!(linearize(10), 10.0 / 255.0 / 12.92);
        let c: f64 = 11.0 / 255.0;
        assert_eq!(linearize(11), ((c + 0.055) / 1.055).powf(2.4));

        let cache = ColourCache::new();
        for c in 1..=255u8 {
            assert!(cache.linear(c) > cache.linear(c - 1));
            assert_eq!(cache.linear(c), linearize(c));
        }
    }

    #[test]
    fn test_ratio_bounds_and_symmetry() {
        let black = relative_luminance(BLACK);
        let white = relative_luminance(WHITE);
        assert!((contrast_ratio(black, white) - 21.0).abs() < 1e-6);
        assert_eq!(contrast_ratio(0.3, 0.3), 1.0);

        for (a, b) in [(0.0, 0.5), (0.2, 0.9), (0.7, 0.1)] {
            let r = contrast_ratio(a, b);
            assert_eq!(r, contrast_ratio(b, a));
            assert!((1.0..=21.0).contains(&r));
        }
    }

    #[test]
    fn test_levels() {
        assert_eq!("aa".parse::<WcagLevel>().unwrap().threshold(), 4.5);
        assert_eq!("AA-large".parse::<WcagLevel>().unwrap().threshold(), 3.0);
        assert_eq!("aaa".parse::<WcagLevel>().unwrap().threshold(), 7.0);
        assert_eq!("aaa-large".parse::<WcagLevel>().unwrap().threshold(), 4.5);
        assert!("triple-a".parse::<WcagLevel>().is_err());
        assert_eq!(WcagLevel::default(), WcagLevel::AaaNormal);
    }

    #[test]
    fn test_passing_pair_is_untouched() {
        let result = analyzer(7.0).analyze(BLACK, WHITE);
        assert!(result.passes);
        assert_eq!(result.adjusted, None);
        assert_eq!(result.resolved(BLACK), (BLACK, result.ratio));
    }

    #[test]
    fn test_darkens_on_light_background() {
        let mut a = analyzer(7.0);
        let text = [200, 60, 60];
        let result = a.analyze(text, WHITE);
        assert!(!result.passes);
        let adjusted = result.adjusted.unwrap();
        assert!(result.adjusted_ratio.unwrap() >= 7.0);
        assert!(result.meets_target());

        let (h0, _, l0) = rgb_to_hsl(text);
        let (h1, _, l1) = rgb_to_hsl(adjusted);
        assert!((h0 - h1).abs() < 0.02, "hue drifted {h0} -> {h1}");
        assert!(l1 < l0);
    }

    #[test]
    fn test_lightens_on_dark_background() {
        let result = analyzer(4.5).analyze([60, 60, 90], [20, 20, 20]);
        let adjusted = result.adjusted.unwrap();
        assert!(result.adjusted_ratio.unwrap() >= 4.5);
        assert!(rgb_to_hsl(adjusted).2 > rgb_to_hsl([60, 60, 90]).2);
    }

    #[test]
    fn test_unreachable_target_hits_bound() {
        // Mid gray caps out below 7:1 in both directions.
        let result = analyzer(7.0).analyze([120, 120, 120], [119, 119, 119]);
        assert_eq!(result.adjusted, Some(BLACK));
        assert!(!result.meets_target());
    }

    #[test]
    fn test_memo_reuses_pairs() {
        let mut a = analyzer(4.5);
        let first = a.analyze([150, 150, 150], WHITE);
        let second = a.analyze([150, 150, 150], WHITE);
        assert_eq!(first, second);
        assert_eq!(a.memo_len(), 1);
    }

    #[test]
    fn test_hsl_round_trip() {
        for rgb in [[255, 0, 0], [12, 200, 99], [128, 128, 128], [3, 7, 250]] {
            let (h, s, l) = rgb_to_hsl(rgb);
            assert_eq!(to_u8(hsl_to_rgb(h, s, l)), rgb);
        }
    }
}
