//! Per-pixel feature transform prepass.
//!
//! Before any accumulation, each output pixel gets a reduced-rank basis for
//! its feature space: the windowed feature Gramian is eigendecomposed and
//! only the directions with non-negligible variance are kept. This bounds
//! the regression rank and keeps the normal equations well conditioned when
//! features are locally flat or redundant.
//!
//! The resulting `{rank, transform}` pair is read-only input to the
//! accumulation and finalize kernels; the rank is fixed once per pixel and
//! shared by all of its neighbors.

use crate::buffer::TileBuffer;
use crate::features::{get_features, DENOISE_FEATURES};
use crate::float_trait::LwrFloat;
use crate::matrix::jacobi_eigendecomposition;

/// Floor on the per-feature deviation used for scale normalization.
const FEATURE_SCALE_EPSILON: f64 = 1e-8;

/// Per-pixel regression storage: the chosen rank and the feature basis.
///
/// `transform` is row-major with `rank` rows of [`DENOISE_FEATURES`]
/// columns; the per-feature normalization scale is folded into the rows.
#[derive(Debug, Clone)]
pub struct PixelStorage<F> {
    pub rank: usize,
    pub transform: Vec<F>,
}

impl<F: LwrFloat> PixelStorage<F> {
    /// Rank-zero storage: the regression degenerates to a weighted mean.
    pub fn rank_zero() -> Self {
        Self {
            rank: 0,
            transform: Vec::new(),
        }
    }
}

/// Estimate the feature basis for the window of half-width `half_window`
/// around `(x, y)`, clipped to the tile.
///
/// Keeps eigenvectors whose singular value exceeds `rank_threshold` times
/// the largest one, sorted by decreasing eigenvalue. Rank lands in
/// `[0, DENOISE_FEATURES]`; a constant window yields rank 0.
pub fn estimate_storage<F: LwrFloat>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
    half_window: usize,
    rank_threshold: F,
) -> PixelStorage<F> {
    let n = DENOISE_FEATURES;
    let (lo_x, hi_x) = window_range(x, half_window, tile.width());
    let (lo_y, hi_y) = window_range(y, half_window, tile.height());
    let count = (hi_x - lo_x) * (hi_y - lo_y);

    // Window mean of every feature.
    let mut mean = [F::zero(); DENOISE_FEATURES];
    for ny in lo_y..hi_y {
        for nx in lo_x..hi_x {
            let features = get_features(tile, nx, ny);
            for f in 0..n {
                mean[f] += features[f];
            }
        }
    }
    let inv_count = F::one() / F::usize_as(count);
    for m in mean.iter_mut() {
        *m = *m * inv_count;
    }

    // Largest absolute deviation per feature, for scale normalization.
    let mut dev_max = [F::zero(); DENOISE_FEATURES];
    for ny in lo_y..hi_y {
        for nx in lo_x..hi_x {
            let features = get_features(tile, nx, ny);
            for f in 0..n {
                dev_max[f] = dev_max[f].max((features[f] - mean[f]).abs());
            }
        }
    }
    let mut scale = [F::zero(); DENOISE_FEATURES];
    for f in 0..n {
        scale[f] = F::one() / dev_max[f].max(F::from_f64_c(FEATURE_SCALE_EPSILON));
    }

    // Feature Gramian of the scaled deviations, both triangles filled for
    // the Jacobi sweep.
    let mut gram = vec![F::zero(); n * n];
    for ny in lo_y..hi_y {
        for nx in lo_x..hi_x {
            let features = get_features(tile, nx, ny);
            let mut d = [F::zero(); DENOISE_FEATURES];
            for f in 0..n {
                d[f] = (features[f] - mean[f]) * scale[f];
            }
            for r in 0..n {
                for c in r..n {
                    gram[r * n + c] += d[r] * d[c];
                }
            }
        }
    }
    for r in 1..n {
        for c in 0..r {
            gram[r * n + c] = gram[c * n + r];
        }
    }

    let mut vectors = vec![F::zero(); n * n];
    jacobi_eigendecomposition(&mut gram, &mut vectors, n);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        gram[j * n + j]
            .partial_cmp(&gram[i * n + i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let lambda_max = gram[order[0] * n + order[0]].max(F::zero());
    if lambda_max == F::zero() {
        return PixelStorage::rank_zero();
    }
    let cutoff = rank_threshold * lambda_max.sqrt();

    let mut rank = 0;
    for &idx in &order {
        let lambda = gram[idx * n + idx].max(F::zero());
        if lambda.sqrt() > cutoff {
            rank += 1;
        } else {
            break;
        }
    }

    let mut transform = vec![F::zero(); rank * n];
    for (i, &idx) in order.iter().take(rank).enumerate() {
        for f in 0..n {
            // Fold the normalization scale into the basis so design rows can
            // project raw deviations directly.
            transform[i * n + f] = vectors[f * n + idx] * scale[f];
        }
    }

    PixelStorage { rank, transform }
}

/// Clip a window of half-width `hw` around `center` to `[0, len)`.
#[inline]
pub fn window_range(center: usize, hw: usize, len: usize) -> (usize, usize) {
    (center.saturating_sub(hw), (center + hw + 1).min(len))
}
