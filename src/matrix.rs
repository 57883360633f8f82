//! Strided triangular-matrix kernels for the normal equations.
//!
//! The Gram matrix `XtWX` is symmetric, so only the upper triangle is ever
//! written; reads go through a symmetric index helper. All kernels take an
//! element stride so the same code serves both accumulator layouts: a
//! private contiguous block per pixel (stride 1) and an element-interleaved
//! slab shared by a batch of pixels (stride = batch size).

use crate::color::Rgb;
use crate::float_trait::LwrFloat;

/// Maximum Jacobi sweeps for the feature eigendecomposition.
const JACOBI_MAX_SWEEPS: usize = 32;

/// Physical index of logical element `(r, c)` of an `n x n` matrix stored
/// row-major with the given element stride, folding `(r, c)` and `(c, r)`
/// onto the upper-triangle entry.
#[inline]
pub fn tri_idx(n: usize, r: usize, c: usize, stride: usize) -> usize {
    let (r, c) = if r <= c { (r, c) } else { (c, r) };
    (r * n + c) * stride
}

/// Symmetric read of element `(r, c)`.
#[inline]
pub fn tri_get<F: LwrFloat>(a: &[F], n: usize, r: usize, c: usize, stride: usize) -> F {
    a[tri_idx(n, r, c, stride)]
}

/// Zero the upper triangle of an `n x n` matrix.
pub fn trimatrix_zero<F: LwrFloat>(a: &mut [F], n: usize, stride: usize) {
    for r in 0..n {
        for c in r..n {
            a[(r * n + c) * stride] = F::zero();
        }
    }
}

/// Zero the first `n` entries of a strided color vector.
pub fn vec3_zero<F: LwrFloat>(v: &mut [Rgb<F>], n: usize, stride: usize) {
    for i in 0..n {
        v[i * stride] = Rgb::zero();
    }
}

/// Rank-one Gramian update: `A += weight * row * row^T`, upper triangle only.
#[inline]
pub fn trimatrix_add_gramian<F: LwrFloat>(
    a: &mut [F],
    n: usize,
    row: &[F],
    weight: F,
    stride: usize,
) {
    for r in 0..n {
        let wr = weight * row[r];
        for c in r..n {
            a[(r * n + c) * stride] += wr * row[c];
        }
    }
}

/// Right-hand-side update: `b[i] += row[i] * color` for a weighted color.
#[inline]
pub fn vec3_add_weighted<F: LwrFloat>(
    v: &mut [Rgb<F>],
    n: usize,
    row: &[F],
    color: Rgb<F>,
    stride: usize,
) {
    for i in 0..n {
        v[i * stride] += color.scale(row[i]);
    }
}

/// Solve `A * S = b` in place for a symmetric positive definite `A` stored
/// in its upper triangle, with a three-channel right-hand side.
///
/// Cholesky-factors `A = L L^T` (the factor overwrites the stored triangle)
/// and applies forward/back substitution to each color channel. A Gramian
/// that collapsed to zero (every neighbor rejected) or lost positive
/// definiteness yields a non-positive pivot; in that case the solution is
/// zeroed and `false` is returned, so degenerate pixels produce a defined
/// black result rather than NaN.
pub fn trimatrix_vec3_solve<F: LwrFloat>(
    a: &mut [F],
    b: &mut [Rgb<F>],
    n: usize,
    stride: usize,
) -> bool {
    // Factorization: U = L^T lives in the stored upper triangle.
    for r in 0..n {
        for c in r..n {
            let mut sum = a[(r * n + c) * stride];
            for k in 0..r {
                sum = sum - a[(k * n + r) * stride] * a[(k * n + c) * stride];
            }
            if c == r {
                if !(sum > F::zero()) || !sum.is_finite() {
                    vec3_zero(b, n, stride);
                    return false;
                }
                a[(r * n + r) * stride] = sum.sqrt();
            } else {
                a[(r * n + c) * stride] = sum / a[(r * n + r) * stride];
            }
        }
    }

    // Forward substitution: L y = b.
    for r in 0..n {
        let mut sum = b[r * stride];
        for k in 0..r {
            sum = sum - b[k * stride].scale(a[(k * n + r) * stride]);
        }
        b[r * stride] = sum.scale(F::one() / a[(r * n + r) * stride]);
    }

    // Back substitution: L^T s = y.
    for r in (0..n).rev() {
        let mut sum = b[r * stride];
        for k in (r + 1)..n {
            sum = sum - b[k * stride].scale(a[(r * n + k) * stride]);
        }
        b[r * stride] = sum.scale(F::one() / a[(r * n + r) * stride]);
    }

    true
}

/// Cyclic Jacobi eigendecomposition of a symmetric `n x n` matrix stored
/// row-major with both triangles filled (stride 1; this runs host-side in
/// the transform prepass, never in the strided accumulator slabs).
///
/// On return the eigenvalues sit on the diagonal of `a` and column `i` of
/// `v` holds the corresponding eigenvector.
pub fn jacobi_eigendecomposition<F: LwrFloat>(a: &mut [F], v: &mut [F], n: usize) {
    debug_assert!(a.len() >= n * n && v.len() >= n * n);

    for r in 0..n {
        for c in 0..n {
            v[r * n + c] = if r == c { F::one() } else { F::zero() };
        }
    }
    if n < 2 {
        return;
    }

    let off_eps = F::from_f64_c(1e-20);
    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = F::zero();
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[p * n + q] * a[p * n + q];
            }
        }
        if off <= off_eps {
            break;
        }

        for p in 0..(n - 1) {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq == F::zero() {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (F::usize_as(2) * apq);
                let t = {
                    let denom = theta.abs() + (theta * theta + F::one()).sqrt();
                    if theta >= F::zero() {
                        F::one() / denom
                    } else {
                        -F::one() / denom
                    }
                };
                let c = F::one() / (t * t + F::one()).sqrt();
                let s = t * c;

                // Rotate columns p and q.
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                // Rotate rows p and q.
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                // Accumulate the rotation into the eigenvector columns.
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }
}
