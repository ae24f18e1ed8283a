// SPDX-License-Identifier: MIT
//! # Offset-Vector Field
//!
//! Per-pixel displacement from the nearest edge point to the pixel centre.
//! The edge point for pixel `p` is `p - offset`, so propagating one step to
//! the right adds `+1` to `dx` (see [`crate::esdt`]).
//!
//! Distance is never stored; it is always derived from the vector.

use std::ops::Neg;

/// Magnitude used for unresolved offsets. Large enough that any resolved
/// candidate wins, small enough that its square stays finite in `f32`.
pub const OFFSET_INF: f32 = 1.0e10;

/// Offsets shorter than this have no usable direction.
pub const GRADIENT_EPSILON: f32 = 0.001;

/// Displacement from the nearest edge point to a pixel, in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub dx: f32,
    pub dy: f32,
}

impl Offset {
    pub const ZERO: Offset = Offset { dx: 0.0, dy: 0.0 };
    pub const INF: Offset = Offset {
        dx: OFFSET_INF,
        dy: OFFSET_INF,
    };

    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dx * self.dx + self.dy * self.dy
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// False while the pixel still carries the sentinel.
    #[inline]
    pub fn is_resolved(self) -> bool {
        self.dx.abs() < OFFSET_INF * 0.5 && self.dy.abs() < OFFSET_INF * 0.5
    }

    /// Unit direction of the offset, or the zero vector when the offset is
    /// at or below [`GRADIENT_EPSILON`].
    pub fn gradient(self) -> [f32; 2] {
        let len = self.length();
        if len > GRADIENT_EPSILON && self.is_resolved() {
            [self.dx / len, self.dy / len]
        } else {
            [0.0, 0.0]
        }
    }
}

impl Neg for Offset {
    type Output = Offset;

    fn neg(self) -> Offset {
        Offset::new(-self.dx, -self.dy)
    }
}

/// Row-major grid of [`Offset`]s, one per pixel.
#[derive(Debug, Clone)]
pub struct OffsetField {
    width: u32,
    height: u32,
    data: Vec<Offset>,
}

impl OffsetField {
    /// A field with every pixel unresolved.
    pub fn unresolved(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![Offset::INF; width as usize * height as usize],
        }
    }

    pub fn from_offsets(width: u32, height: u32, data: Vec<Offset>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize,
            "offset count must equal width * height"
        );
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Offset {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, offset: Offset) {
        let idx = self.index(x, y);
        self.data[idx] = offset;
    }

    #[inline]
    pub fn at(&self, idx: usize) -> Offset {
        self.data[idx]
    }

    pub fn distance(&self, x: u32, y: u32) -> f32 {
        self.get(x, y).length()
    }

    pub fn offsets(&self) -> &[Offset] {
        &self.data
    }

    pub fn offsets_mut(&mut self) -> &mut [Offset] {
        &mut self.data
    }

    /// Flat `[dx0, dy0, dx1, dy1, ...]` view, `width * height * 2` long.
    pub fn to_flat(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.data.len() * 2);
        for o in &self.data {
            flat.push(o.dx);
            flat.push(o.dy);
        }
        flat
    }
}
