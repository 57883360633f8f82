//! Three-channel color values used throughout the regression kernels.
//!
//! Colors in a render tile are stored as three separate planes; this type is
//! the transient register form used while accumulating and solving.

use std::ops::{Add, AddAssign, Sub};

use crate::float_trait::LwrFloat;

/// An RGB triple generic over the working float type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb<F> {
    pub r: F,
    pub g: F,
    pub b: F,
}

impl<F: LwrFloat> Rgb<F> {
    #[inline]
    pub fn new(r: F, g: F, b: F) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub fn zero() -> Self {
        Self::splat(F::zero())
    }

    #[inline]
    pub fn splat(v: F) -> Self {
        Self { r: v, g: v, b: v }
    }

    /// Multiply all channels by a scalar.
    #[inline]
    pub fn scale(self, s: F) -> Self {
        Self {
            r: self.r * s,
            g: self.g * s,
            b: self.b * s,
        }
    }

    /// Mean absolute per-channel difference, used by the firefly test.
    #[inline]
    pub fn mean_abs_diff(self, other: Self) -> F {
        let third = F::one() / F::usize_as(3);
        ((self.r - other.r).abs() + (self.g - other.g).abs() + (self.b - other.b).abs()) * third
    }

    /// True if any channel is NaN or infinite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }
}

impl<F: LwrFloat> Add for Rgb<F> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            r: self.r + rhs.r,
            g: self.g + rhs.g,
            b: self.b + rhs.b,
        }
    }
}

impl<F: LwrFloat> Sub for Rgb<F> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            r: self.r - rhs.r,
            g: self.g - rhs.g,
            b: self.b - rhs.b,
        }
    }
}

impl<F: LwrFloat> AddAssign for Rgb<F> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.r += rhs.r;
        self.g += rhs.g;
        self.b += rhs.b;
    }
}
