//! Non-local-means style patch similarity weights.
//!
//! The neighbor weight compares a small patch around the center pixel with
//! the same-size patch around the candidate neighbor on a guide color pass
//! (a pass distinct from the one being denoised). The squared difference is
//! compensated by the pixels' own variances so that pure noise does not read
//! as dissimilarity, then mapped through a decaying exponential.

use crate::buffer::TileBuffer;
use crate::float_trait::LwrFloat;

/// Numerical floor of the per-pixel distance denominator.
const DISTANCE_EPSILON: f64 = 1e-4;

/// Patch-similarity weight between the center `(x, y)` and a neighbor
/// `(nx, ny)`, computed on the guide pass.
///
/// `weighting_adjust` scales the variance term of the denominator: larger
/// values are more permissive (flatter weights), smaller values sharper.
/// The patch is clipped so both footprints stay inside the tile. The result
/// is non-negative, at most 1, and exactly 1 for identical patches.
pub fn nlm_weight<F: LwrFloat>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
    nx: usize,
    ny: usize,
    guide_pass: usize,
    weighting_adjust: F,
    patch_radius: usize,
) -> F {
    let w = tile.width() as isize;
    let h = tile.height() as isize;
    let r = patch_radius as isize;
    let (x, y, nx, ny) = (x as isize, y as isize, nx as isize, ny as isize);

    let mut dist = F::zero();
    let mut count = 0usize;
    let third = F::one() / F::usize_as(3);

    for py in -r..=r {
        for px in -r..=r {
            let (cx, cy) = (x + px, y + py);
            let (qx, qy) = (nx + px, ny + py);
            if cx < 0 || cy < 0 || cx >= w || cy >= h {
                continue;
            }
            if qx < 0 || qy < 0 || qx >= w || qy >= h {
                continue;
            }
            let (cx, cy, qx, qy) = (cx as usize, cy as usize, qx as usize, qy as usize);

            let cp = tile.color(cx, cy, guide_pass);
            let cq = tile.color(qx, qy, guide_pass);
            let vp = tile.variance(cx, cy, guide_pass);
            let vq = tile.variance(qx, qy, guide_pass);

            let d = cp - cq;
            let diff2 = (d.r * d.r + d.g * d.g + d.b * d.b) * third;
            let numer = diff2 - (vp + vp.min(vq));
            let denom = F::from_f64_c(DISTANCE_EPSILON) + weighting_adjust * (vp + vq);
            dist += numer / denom;
            count += 1;
        }
    }

    if count == 0 {
        return F::zero();
    }
    let dist = (dist / F::usize_as(count)).max(F::zero());
    (-dist).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::COLOR_PASS_PLANES;
    use crate::features::FEATURE_PASSES;
    use ndarray::Array3;

    const GUIDE_PASS: usize = FEATURE_PASSES;

    fn tile_planes() -> Array3<f64> {
        Array3::from_elem((FEATURE_PASSES + COLOR_PASS_PLANES, 8, 8), 0.0)
    }

    #[test]
    fn test_identical_patches_weigh_one() {
        let mut planes = tile_planes();
        for p in GUIDE_PASS..GUIDE_PASS + 3 {
            for y in 0..8 {
                for x in 0..8 {
                    planes[[p, y, x]] = 0.7;
                }
            }
        }
        let tile = TileBuffer::new(planes.view());
        let w = nlm_weight(&tile, 3, 3, 5, 4, GUIDE_PASS, 1.0, 2);
        assert_eq!(w, 1.0);
    }

    #[test]
    fn test_weight_decreases_with_difference() {
        let mut planes = tile_planes();
        // Left half dark, right half increasingly bright
        for p in GUIDE_PASS..GUIDE_PASS + 3 {
            for y in 0..8 {
                for x in 4..8 {
                    planes[[p, y, x]] = (x - 3) as f64;
                }
            }
        }
        let tile = TileBuffer::new(planes.view());
        let w_similar = nlm_weight(&tile, 1, 3, 2, 3, GUIDE_PASS, 1.0, 1);
        let w_different = nlm_weight(&tile, 1, 3, 6, 3, GUIDE_PASS, 1.0, 1);
        assert!(w_similar > w_different);
        assert!(w_different >= 0.0);
        assert!(w_similar <= 1.0);
    }

    #[test]
    fn test_variance_compensation_forgives_noise() {
        let mut planes = tile_planes();
        // Same mean signal but one noisy sample at the neighbor, with the
        // variance planes reporting that noise honestly.
        planes[[GUIDE_PASS, 3, 5]] = 0.3;
        for p in GUIDE_PASS + 3..GUIDE_PASS + 6 {
            for y in 0..8 {
                for x in 0..8 {
                    planes[[p, y, x]] = 0.5;
                }
            }
        }
        let tile = TileBuffer::new(planes.view());
        let w = nlm_weight(&tile, 2, 3, 5, 3, GUIDE_PASS, 1.0, 1);
        // 0.3^2 difference is well inside the reported variance budget
        assert_eq!(w, 1.0);
    }

    #[test]
    fn test_weight_is_finite_at_border() {
        let planes = tile_planes();
        let tile = TileBuffer::new(planes.view());
        let w = nlm_weight(&tile, 0, 0, 7, 7, GUIDE_PASS, 1.0, 3);
        assert!(w.is_finite());
        assert!(w >= 0.0);
    }
}
