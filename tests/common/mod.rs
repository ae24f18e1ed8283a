//! Common test utilities for the contrast remediation tests
//!
//! Synthetic frames with known text and background colours.

#![allow(dead_code)]

use contrast_remediation::{BackendPreference, EnhanceConfig, RgbaFrame};

/// Uniform frame.
pub fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> RgbaFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
    }
    RgbaFrame::new(data, width, height).expect("valid solid frame")
}

/// Left-to-right grayscale ramp from black to white.
pub fn gradient_frame(width: u32, height: u32) -> RgbaFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _y in 0..height {
        for x in 0..width {
            let v = ((x as f32 / (width - 1).max(1) as f32) * 255.0).round() as u8;
            data.extend_from_slice(&[v, v, v, 255]);
        }
    }
    RgbaFrame::new(data, width, height).expect("valid gradient frame")
}

/// `paper` background with vertical strokes of `ink`, a crude stand-in for
/// a line of text. Strokes are 3 px wide with 9 px gaps, wider than the
/// default sample distance plus glyph band.
pub fn text_frame(width: u32, height: u32, ink: [u8; 3], paper: [u8; 3]) -> RgbaFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let in_line = (height / 4..3 * height / 4).contains(&y);
            let in_stroke = x >= 6 && x + 6 < width && (x - 6) % 12 < 3;
            let c = if in_line && in_stroke { ink } else { paper };
            data.extend_from_slice(&[c[0], c[1], c[2], 255]);
        }
    }
    RgbaFrame::new(data, width, height).expect("valid text frame")
}

pub fn test_config(backend: BackendPreference) -> EnhanceConfig {
    EnhanceConfig {
        pixel_capacity: 8192,
        backend,
        ..Default::default()
    }
}
