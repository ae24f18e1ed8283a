// SPDX-License-Identifier: MIT
// Kernel-level failures. Kept dependency-free so the root crate can wrap them.

#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Pixel buffer shorter than `stride * height`.
    BufferTooSmall { needed: usize, actual: usize },
    /// Width or height is zero, or stride is narrower than a row.
    InvalidDimensions { width: u32, height: u32, stride: usize },
    /// Two per-pixel arrays that must agree in length do not.
    LengthMismatch { what: &'static str, expected: usize, actual: usize },
    /// A tunable is out of its documented range.
    InvalidParameter { name: &'static str, value: f64 },
    /// A named choice (level, preference) that is not recognised.
    UnknownName { what: &'static str, value: String },
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::BufferTooSmall { needed, actual } => {
                write!(f, "Pixel buffer too small: need {} bytes, got {}", needed, actual)
            }
            KernelError::InvalidDimensions { width, height, stride } => {
                write!(f, "Invalid frame dimensions {}x{} (stride {})", width, height, stride)
            }
            KernelError::LengthMismatch { what, expected, actual } => {
                write!(f, "Length mismatch for {}: expected {}, got {}", what, expected, actual)
            }
            KernelError::InvalidParameter { name, value } => {
                write!(f, "Invalid parameter {}: {}", name, value)
            }
            KernelError::UnknownName { what, value } => {
                write!(f, "Unknown {}: '{}'", what, value)
            }
        }
    }
}

impl std::error::Error for KernelError {}

pub type KernelResult<T> = Result<T, KernelError>;
