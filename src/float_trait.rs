//! Float trait abstraction for f32/f64 support.
//!
//! This module provides a unified trait for floating-point operations,
//! enabling the LWR kernels to work with both f32 and f64 precision.
//! It also carries the atomic accumulation cell used by the scatter
//! reconstruction path, implemented as a compare-exchange loop on the
//! float's bit pattern.

use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Trait alias for floating point types supported by the LWR denoiser.
///
/// This trait combines all the bounds needed for the regression kernels:
/// - Basic float operations (Float, NumAssign)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug printing
/// - An associated atomic cell for weighted scatter accumulation
pub trait LwrFloat:
    Float + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Atomic storage cell holding one value of this float type.
    type Atomic: Send + Sync;

    /// Create an atomic cell initialized to zero.
    fn atomic_zero() -> Self::Atomic;

    /// Read the current value of an atomic cell.
    fn atomic_load(cell: &Self::Atomic) -> Self;

    /// Atomically add `value` to the cell.
    fn atomic_add(cell: &Self::Atomic, value: Self);

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;
}

impl LwrFloat for f32 {
    type Atomic = AtomicU32;

    #[inline]
    fn atomic_zero() -> AtomicU32 {
        AtomicU32::new(0.0f32.to_bits())
    }

    #[inline]
    fn atomic_load(cell: &AtomicU32) -> f32 {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }

    #[inline]
    fn atomic_add(cell: &AtomicU32, value: f32) {
        let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((f32::from_bits(bits) + value).to_bits())
        });
    }

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }
}

impl LwrFloat for f64 {
    type Atomic = AtomicU64;

    #[inline]
    fn atomic_zero() -> AtomicU64 {
        AtomicU64::new(0.0f64.to_bits())
    }

    #[inline]
    fn atomic_load(cell: &AtomicU64) -> f64 {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }

    #[inline]
    fn atomic_add(cell: &AtomicU64, value: f64) {
        let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((f64::from_bits(bits) + value).to_bits())
        });
    }

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }
}
