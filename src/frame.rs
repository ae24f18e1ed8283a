//! Captured RGBA frames.
//!
//! Frames are shared by reference count so a session can keep the previous
//! overlay alive while the next frame is in flight.

use std::sync::Arc;

use contrast_kernel::{KernelResult, RgbaView};

use crate::error::{RemediationError, RemediationResult};

/// RGBA8 frame with optional row padding.
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    /// Raw RGBA pixel data. Length must be at least `stride * height`.
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (may exceed `width * 4` due to padding)
    pub stride: usize,
}

impl RgbaFrame {
    /// Tightly packed frame; validates the byte length.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> RemediationResult<Self> {
        Self::with_stride(data, width, height, width as usize * 4)
    }

    pub fn with_stride(data: Vec<u8>, width: u32, height: u32, stride: usize) -> RemediationResult<Self> {
        RgbaView::new(&data, width, height, stride)?;
        Ok(Self {
            data: Arc::new(data),
            width,
            height,
            stride,
        })
    }

    pub fn view(&self) -> KernelResult<RgbaView<'_>> {
        RgbaView::new(&self.data, self.width, self.height, self.stride)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Tightly packed copy of the pixels, dropping any row padding.
    pub fn to_packed(&self) -> Vec<u8> {
        let row = self.width as usize * 4;
        if self.stride == row {
            return self.data[..row * self.height as usize].to_vec();
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let off = y * self.stride;
            out.extend_from_slice(&self.data[off..off + row]);
        }
        out
    }

    pub fn from_image(image: image::RgbaImage) -> RemediationResult<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    pub fn to_image(&self) -> RemediationResult<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.to_packed()).ok_or_else(|| {
            RemediationError::validation(
                "frame",
                "packed length must equal width * height * 4",
                format!("{}x{}", self.width, self.height),
            )
        })
    }
}
