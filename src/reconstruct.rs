//! Monolithic single-pixel reconstruction (full window, two modes).
//!
//! [`reconstruct_pixel`] runs the entire accumulate/solve/write sequence for
//! one pixel in a single call, as an alternative to the decomposed
//! per-neighbor dispatch in [`crate::gramian`]. The decomposed path is the
//! production path; this one is kept as a self-contained reference and as a
//! correctness oracle for it.
//!
//! Two reconstruction modes share the fitted model:
//! - **Direct**: write the fitted intercept to the center pixel, exactly as
//!   finalize does.
//! - **Scatter** (gradient-domain): evaluate the fitted model at every
//!   window neighbor and atomically blend the prediction into that
//!   neighbor's own output location, together with the weight for a later
//!   normalization. Overlapping windows contend on the same locations, so
//!   this is the one path that needs atomic adds.

use crate::buffer::{OutputBuffer, ScatterBuffer, TileBuffer};
use crate::color::Rgb;
use crate::features::{get_design_row, get_features, MATRIX_SIZE};
use crate::float_trait::LwrFloat;
use crate::gramian::{construct_gramian, finalize, firefly_rejected, Contiguous, GramianArena};
use crate::nlm::nlm_weight;
use crate::transform::{window_range, PixelStorage};

/// Weights below this floor are treated as negligible and rejected.
pub const NEIGHBOR_WEIGHT_FLOOR: f64 = 1e-5;

/// Where the reconstructed pixel lands.
pub enum ReconstructTarget<'a, 'b, F: LwrFloat> {
    /// Overwrite the center pixel (single writer per location).
    Direct(&'a mut OutputBuffer<'b, F>),
    /// Atomically blend predictions into every window neighbor.
    Scatter(&'a ScatterBuffer<'b, F>),
}

/// Window and weighting parameters of the monolithic path.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructConfig<F> {
    /// Half-width of the square accumulation window.
    pub half_window: usize,
    /// Patch radius of the similarity weight.
    pub patch_radius: usize,
    /// Variance scaling of the similarity weight.
    pub weighting_adjust: F,
    /// Sample count the direct-mode intercept is scaled by.
    pub sample: F,
}

/// Full neighbor weight of the monolithic path: similarity on the guide
/// pass, floored, then divided by the neighbor's variance to downweight
/// noisy pixels. Returns `None` for rejected neighbors.
#[allow(clippy::too_many_arguments)]
pub fn neighbor_weight<F: LwrFloat>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
    nx: usize,
    ny: usize,
    guide_pass: usize,
    weighting_adjust: F,
    patch_radius: usize,
    variance: F,
) -> Option<F> {
    let weight = nlm_weight(tile, x, y, nx, ny, guide_pass, weighting_adjust, patch_radius);
    if weight < F::from_f64_c(NEIGHBOR_WEIGHT_FLOOR) {
        return None;
    }
    Some(weight / variance.max(F::one()))
}

/// Accumulate, solve and reconstruct one pixel over its whole window.
///
/// `weight_cache` is scratch reused across calls; on return it holds one
/// weight per window neighbor in row-major window order, zero for rejected
/// neighbors. The scatter pass reuses it instead of recomputing similarity.
#[allow(clippy::too_many_arguments)]
pub fn reconstruct_pixel<F: LwrFloat>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
    color_pass: usize,
    guide_pass: usize,
    storage: &PixelStorage<F>,
    config: &ReconstructConfig<F>,
    weight_cache: &mut Vec<F>,
    target: ReconstructTarget<'_, '_, F>,
) {
    let (lo_x, hi_x) = window_range(x, config.half_window, tile.width());
    let (lo_y, hi_y) = window_range(y, config.half_window, tile.height());

    let center_color = tile.color(x, y, color_pass);
    let center_std_dev = tile.variance(x, y, color_pass).sqrt();
    let feature_means = get_features(tile, x, y);
    let n = storage.rank + 1;

    weight_cache.clear();
    weight_cache.resize((hi_x - lo_x) * (hi_y - lo_y), F::zero());

    let mut arena = GramianArena::new(1, Contiguous);

    let mut cache_idx = 0;
    for ny in lo_y..hi_y {
        for nx in lo_x..hi_x {
            let idx = cache_idx;
            cache_idx += 1;

            let variance = tile.variance(nx, ny, color_pass);
            let q_color = tile.color(nx, ny, color_pass);
            if firefly_rejected(center_color, q_color, center_std_dev, variance.sqrt()) {
                continue;
            }
            let Some(weight) = neighbor_weight(
                tile,
                x,
                y,
                nx,
                ny,
                guide_pass,
                config.weighting_adjust,
                config.patch_radius,
                variance,
            ) else {
                continue;
            };
            weight_cache[idx] = weight;

            construct_gramian(
                tile,
                x,
                y,
                nx as isize - x as isize,
                ny as isize - y as isize,
                color_pass,
                weight,
                storage,
                &mut arena,
                0,
            );
        }
    }

    match target {
        ReconstructTarget::Direct(out) => {
            finalize(&mut arena, 0, storage, x, y, config.sample, out);
        }
        ReconstructTarget::Scatter(scatter) => {
            {
                let (xtwx, xtwy) = arena.system_mut(0);
                crate::matrix::trimatrix_vec3_solve(xtwx, xtwy, n, 1);
            }
            let mut solution = [Rgb::zero(); MATRIX_SIZE];
            solution[..n].copy_from_slice(&arena.vector(0)[..n]);

            let mut cache_idx = 0;
            for ny in lo_y..hi_y {
                for nx in lo_x..hi_x {
                    let weight = weight_cache[cache_idx];
                    cache_idx += 1;
                    if weight == F::zero() {
                        continue;
                    }
                    let design_row =
                        get_design_row(tile, nx, ny, &feature_means, storage.rank, &storage.transform);
                    let mut prediction = Rgb::zero();
                    for i in 0..n {
                        prediction += solution[i].scale(design_row[i]);
                    }
                    scatter.add(nx, ny, prediction.scale(weight), weight);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{scatter_cells, OutputSpec, COLOR_PASS_PLANES};
    use crate::features::FEATURE_PASSES;
    use crate::transform::estimate_storage;
    use ndarray::Array3;

    const COLOR_PASS: usize = FEATURE_PASSES;
    const GUIDE_PASS: usize = FEATURE_PASSES + COLOR_PASS_PLANES;
    const PASSES: usize = FEATURE_PASSES + 2 * COLOR_PASS_PLANES;

    // Helper: Simple Linear Congruential Generator for deterministic
    // "random" test data
    struct SimpleLcg {
        state: u64,
    }

    impl SimpleLcg {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_u64(&mut self) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            self.state
        }

        fn next_f64(&mut self) -> f64 {
            let u = self.next_u64();
            (u >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    fn random_tile(w: usize, h: usize, seed: u64) -> Array3<f64> {
        let mut rng = SimpleLcg::new(seed);
        Array3::from_shape_fn((PASSES, h, w), |(p, _, _)| {
            let variance_plane = (COLOR_PASS + 3..COLOR_PASS + 6).contains(&p)
                || (GUIDE_PASS + 3..GUIDE_PASS + 6).contains(&p);
            if variance_plane {
                0.5 + rng.next_f64()
            } else {
                rng.next_f64()
            }
        })
    }

    fn constant_tile(w: usize, h: usize, color: f64) -> Array3<f64> {
        Array3::from_shape_fn((PASSES, h, w), |(p, _, _)| {
            let variance_plane = (COLOR_PASS + 3..COLOR_PASS + 6).contains(&p)
                || (GUIDE_PASS + 3..GUIDE_PASS + 6).contains(&p);
            if p < FEATURE_PASSES {
                0.25
            } else if variance_plane {
                0.0
            } else {
                color
            }
        })
    }

    fn test_config() -> ReconstructConfig<f64> {
        ReconstructConfig {
            half_window: 2,
            patch_radius: 1,
            weighting_adjust: 1.0,
            sample: 1.0,
        }
    }

    #[test]
    fn test_direct_mode_on_constant_image() {
        let planes = constant_tile(7, 7, 0.75);
        let tile = TileBuffer::new(planes.view());
        let storage = PixelStorage::<f64>::rank_zero();
        let config = test_config();

        let mut data = vec![0.0f64; 7 * 7 * 3];
        let spec = OutputSpec {
            offset: 0,
            row_stride: 7,
            pixel_stride: 3,
            base_pass: None,
        };
        let mut out = OutputBuffer::new(&mut data, spec);
        let mut cache = Vec::new();
        reconstruct_pixel(
            &tile,
            3,
            3,
            COLOR_PASS,
            GUIDE_PASS,
            &storage,
            &config,
            &mut cache,
            ReconstructTarget::Direct(&mut out),
        );
        let written = out.read(3, 3);
        assert!((written.r - 0.75).abs() < 1e-12);
        assert!((written.g - 0.75).abs() < 1e-12);
        assert!((written.b - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_direct_mode_matches_decomposed_path() {
        // The monolithic path must agree with driving construct_gramian +
        // finalize by hand with the same weights.
        let planes = random_tile(9, 9, 1234);
        let tile = TileBuffer::new(planes.view());
        let storage = estimate_storage(&tile, 4, 4, 2, 0.01);
        let config = test_config();
        let spec = OutputSpec {
            offset: 0,
            row_stride: 9,
            pixel_stride: 3,
            base_pass: None,
        };

        let mut mono_data = vec![0.0f64; 9 * 9 * 3];
        let mut mono_out = OutputBuffer::new(&mut mono_data, spec);
        let mut cache = Vec::new();
        reconstruct_pixel(
            &tile,
            4,
            4,
            COLOR_PASS,
            GUIDE_PASS,
            &storage,
            &config,
            &mut cache,
            ReconstructTarget::Direct(&mut mono_out),
        );
        let mono = mono_out.read(4, 4);

        let mut arena = GramianArena::new(1, Contiguous);
        let center_color = tile.color(4, 4, COLOR_PASS);
        let center_std_dev = tile.variance(4, 4, COLOR_PASS).sqrt();
        for ny in 2..7usize {
            for nx in 2..7usize {
                let variance = tile.variance(nx, ny, COLOR_PASS);
                let q_color = tile.color(nx, ny, COLOR_PASS);
                if firefly_rejected(center_color, q_color, center_std_dev, variance.sqrt()) {
                    continue;
                }
                let Some(weight) =
                    neighbor_weight(&tile, 4, 4, nx, ny, GUIDE_PASS, 1.0, 1, variance)
                else {
                    continue;
                };
                construct_gramian(
                    &tile,
                    4,
                    4,
                    nx as isize - 4,
                    ny as isize - 4,
                    COLOR_PASS,
                    weight,
                    &storage,
                    &mut arena,
                    0,
                );
            }
        }
        let mut split_data = vec![0.0f64; 9 * 9 * 3];
        let mut split_out = OutputBuffer::new(&mut split_data, spec);
        finalize(&mut arena, 0, &storage, 4, 4, 1.0, &mut split_out);
        let split = split_out.read(4, 4);

        assert!((mono.r - split.r).abs() < 1e-9);
        assert!((mono.g - split.g).abs() < 1e-9);
        assert!((mono.b - split.b).abs() < 1e-9);
    }

    #[test]
    fn test_scatter_single_window_resolves_to_prediction() {
        // With a constant image any prediction equals the image color, so
        // the normalized scatter output must reproduce it.
        let planes = constant_tile(5, 5, 0.4);
        let tile = TileBuffer::new(planes.view());
        let storage = PixelStorage::<f64>::rank_zero();
        let config = test_config();

        let cells = scatter_cells::<f64>(5 * 5 * 4);
        let spec = OutputSpec {
            offset: 0,
            row_stride: 5,
            pixel_stride: 4,
            base_pass: None,
        };
        let scatter = ScatterBuffer::<f64>::new(&cells, spec);
        let mut cache = Vec::new();
        reconstruct_pixel(
            &tile,
            2,
            2,
            COLOR_PASS,
            GUIDE_PASS,
            &storage,
            &config,
            &mut cache,
            ReconstructTarget::Scatter(&scatter),
        );

        let (color, weight) = scatter.read(1, 2);
        assert!(weight > 0.0);
        assert!((color.r / weight - 0.4).abs() < 1e-12);
        // The center pixel itself also received a blended prediction
        let (center, center_weight) = scatter.read(2, 2);
        assert!(center_weight > 0.0);
        assert!((center.g / center_weight - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_scatter_skips_cached_zero_weights() {
        let mut planes = constant_tile(5, 5, 0.2);
        // One firefly neighbor inside the window
        planes[[COLOR_PASS, 2, 3]] = 50.0;
        planes[[COLOR_PASS + 1, 2, 3]] = 50.0;
        planes[[COLOR_PASS + 2, 2, 3]] = 50.0;
        let tile = TileBuffer::new(planes.view());
        let storage = PixelStorage::<f64>::rank_zero();
        let config = test_config();

        let cells = scatter_cells::<f64>(5 * 5 * 4);
        let spec = OutputSpec {
            offset: 0,
            row_stride: 5,
            pixel_stride: 4,
            base_pass: None,
        };
        let scatter = ScatterBuffer::<f64>::new(&cells, spec);
        let mut cache = Vec::new();
        reconstruct_pixel(
            &tile,
            2,
            2,
            COLOR_PASS,
            GUIDE_PASS,
            &storage,
            &config,
            &mut cache,
            ReconstructTarget::Scatter(&scatter),
        );

        // The rejected neighbor received nothing
        let (color, weight) = scatter.read(3, 2);
        assert_eq!(weight, 0.0);
        assert_eq!(color, Rgb::zero());
        // Its cache entry is zero while accepted neighbors are positive
        assert!(cache.iter().any(|&w| w > 0.0));
    }

    #[test]
    fn test_firefly_center_keeps_only_itself() {
        // A firefly at the center rejects every other window neighbor (the
        // center always passes its own firefly test), so only the center
        // location receives scatter contributions.
        let mut planes = constant_tile(3, 3, 0.0);
        planes[[COLOR_PASS, 1, 1]] = 100.0;
        planes[[COLOR_PASS + 1, 1, 1]] = 100.0;
        planes[[COLOR_PASS + 2, 1, 1]] = 100.0;
        let tile = TileBuffer::new(planes.view());
        let storage = PixelStorage::<f64>::rank_zero();
        let config = ReconstructConfig {
            half_window: 1,
            ..test_config()
        };

        let cells = scatter_cells::<f64>(3 * 3 * 4);
        let spec = OutputSpec {
            offset: 0,
            row_stride: 3,
            pixel_stride: 4,
            base_pass: None,
        };
        let scatter = ScatterBuffer::<f64>::new(&cells, spec);
        let mut cache = Vec::new();
        reconstruct_pixel(
            &tile,
            1,
            1,
            COLOR_PASS,
            GUIDE_PASS,
            &storage,
            &config,
            &mut cache,
            ReconstructTarget::Scatter(&scatter),
        );

        for y in 0..3 {
            for x in 0..3 {
                let (color, weight) = scatter.read(x, y);
                if (x, y) == (1, 1) {
                    assert!(weight > 0.0);
                    assert!((color.r / weight - 100.0).abs() < 1e-9);
                } else {
                    assert_eq!(weight, 0.0);
                    assert_eq!(color, Rgb::zero());
                }
            }
        }
    }
}
