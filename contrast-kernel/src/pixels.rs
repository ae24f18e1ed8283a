// SPDX-License-Identifier: MIT
// Borrowed RGBA8 views and the read interface the sampler batches against.

use crate::error::{KernelError, KernelResult};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub fn area(&self) -> usize {
        self.w as usize * self.h as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.w && y < self.y + self.h
    }
}

/// Anything the background sampler can read pixels from.
///
/// Captured frames may live behind an expensive boundary (a GPU readback,
/// a canvas), so the sampler chooses between per-point reads and a single
/// rectangle read per batch.
pub trait PixelSource {
    fn dimensions(&self) -> (u32, u32);

    fn read_pixel(&self, x: u32, y: u32) -> [u8; 4];

    /// Copy `rect` into `out` as tightly packed RGBA rows.
    fn read_rect(&self, rect: PixelRect, out: &mut Vec<u8>);
}

/// Stride-aware borrowed view over RGBA8 bytes.
#[derive(Debug, Clone, Copy)]
pub struct RgbaView<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> RgbaView<'a> {
    /// `stride` is bytes per row; pass `width * 4` for tightly packed input.
    pub fn new(data: &'a [u8], width: u32, height: u32, stride: usize) -> KernelResult<Self> {
        if width == 0 || height == 0 || stride < width as usize * 4 {
            return Err(KernelError::InvalidDimensions {
                width,
                height,
                stride,
            });
        }
        let needed = stride * (height as usize - 1) + width as usize * 4;
        if data.len() < needed {
            return Err(KernelError::BufferTooSmall {
                needed,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    pub fn packed(data: &'a [u8], width: u32, height: u32) -> KernelResult<Self> {
        Self::new(data, width, height, width as usize * 4)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let off = y as usize * self.stride + x as usize * 4;
        [
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ]
    }

    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let p = self.pixel(x, y);
        [p[0], p[1], p[2]]
    }

    /// One row of `width * 4` bytes, without stride padding.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let off = y as usize * self.stride;
        &self.data[off..off + self.width as usize * 4]
    }
}

impl PixelSource for RgbaView<'_> {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixel(x, y)
    }

    fn read_rect(&self, rect: PixelRect, out: &mut Vec<u8>) {
        let row_bytes = rect.w as usize * 4;
        out.clear();
        out.reserve(row_bytes * rect.h as usize);
        for r in 0..rect.h {
            let off = (rect.y + r) as usize * self.stride + rect.x as usize * 4;
            out.extend_from_slice(&self.data[off..off + row_bytes]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_view_skips_padding() {
        // 2x2 image, stride 12 (4 bytes padding per row)
        let mut data = vec![0u8; 24];
        data[12..16].copy_from_slice(&[1, 2, 3, 4]);
        let view = RgbaView::new(&data, 2, 2, 12).unwrap();
        assert_eq!(view.pixel(0, 1), [1, 2, 3, 4]);

        let mut out = Vec::new();
        view.read_rect(PixelRect { x: 0, y: 1, w: 2, h: 1 }, &mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let data = vec![0u8; 15];
        assert!(matches!(
            RgbaView::packed(&data, 2, 2),
            Err(KernelError::BufferTooSmall { needed: 16, actual: 15 })
        ));
        assert!(RgbaView::packed(&data, 0, 2).is_err());
    }
}
