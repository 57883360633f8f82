//! Feature vectors and regression design rows.
//!
//! Each pixel carries a fixed set of auxiliary features used as regression
//! predictors: its screen coordinates plus eight buffer planes (depth,
//! world-space normal, albedo, shadow visibility by convention; the kernels
//! only care that they are the first [`FEATURE_PASSES`] planes of the tile).
//!
//! A design row is the neighbor's mean-subtracted feature vector projected
//! through the owning pixel's transform basis, with an intercept term
//! prepended. The transform fixes the rank once per output pixel; every
//! neighbor of that pixel is projected through the same basis.

use crate::buffer::TileBuffer;
use crate::float_trait::LwrFloat;

/// Number of tile planes read as features (planes `0..FEATURE_PASSES`).
pub const FEATURE_PASSES: usize = 8;

/// Total feature count: screen x, screen y, plus the feature planes.
pub const DENOISE_FEATURES: usize = FEATURE_PASSES + 2;

/// Side length of the full normal-equations system (features + intercept).
pub const MATRIX_SIZE: usize = DENOISE_FEATURES + 1;

/// Raw feature vector of one pixel. The center pixel's raw features double
/// as the per-output-pixel feature means.
#[inline]
pub fn get_features<F: LwrFloat>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
) -> [F; DENOISE_FEATURES] {
    let mut features = [F::zero(); DENOISE_FEATURES];
    features[0] = F::usize_as(x);
    features[1] = F::usize_as(y);
    for (pass, slot) in features.iter_mut().skip(2).enumerate() {
        *slot = tile.plane_value(pass, x, y);
    }
    features
}

/// Build the design row of a neighbor pixel relative to `means`, projected
/// through `transform` (row-major, `rank` rows of [`DENOISE_FEATURES`]
/// columns). Entry 0 is the intercept; entries beyond `rank` stay zero.
///
/// Pure and deterministic: the same inputs always produce the same row.
#[inline]
pub fn get_design_row<F: LwrFloat>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
    means: &[F; DENOISE_FEATURES],
    rank: usize,
    transform: &[F],
) -> [F; MATRIX_SIZE] {
    debug_assert!(rank <= DENOISE_FEATURES);
    debug_assert!(transform.len() >= rank * DENOISE_FEATURES);

    let features = get_features(tile, x, y);
    let mut centered = [F::zero(); DENOISE_FEATURES];
    for f in 0..DENOISE_FEATURES {
        centered[f] = features[f] - means[f];
    }

    let mut row = [F::zero(); MATRIX_SIZE];
    row[0] = F::one();
    for i in 0..rank {
        let basis = &transform[i * DENOISE_FEATURES..(i + 1) * DENOISE_FEATURES];
        let mut dot = F::zero();
        for f in 0..DENOISE_FEATURES {
            dot += centered[f] * basis[f];
        }
        row[i + 1] = dot;
    }
    row
}
