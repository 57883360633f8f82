//! Tile-level denoising drivers.
//!
//! These drivers play the role of the work distributor: they run the
//! transform prepass, enumerate window neighbors, compute neighbor weights,
//! and schedule the regression kernels across threads.
//!
//! - [`run_denoise_tile`]: production gather path. Rows are processed in
//!   parallel; within a row each pixel's accumulator has exactly one owner
//!   thread, which drives [`construct_gramian`] per neighbor and
//!   [`finalize`] once. No synchronization is needed anywhere.
//! - [`run_scatter_tile`]: gradient-domain path. Pixels are processed in
//!   parallel and their windows overlap, so contributions land in a shared
//!   atomic buffer that is normalized at the end.

use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;

use crate::buffer::{scatter_cells, OutputBuffer, OutputSpec, ScatterBuffer, TileBuffer};
use crate::float_trait::LwrFloat;
use crate::gramian::{construct_gramian, finalize, Contiguous, GramianArena};
use crate::reconstruct::{
    neighbor_weight, reconstruct_pixel, ReconstructConfig, ReconstructTarget,
};
use crate::transform::{estimate_storage, window_range, PixelStorage};

/// Default half-width of the square accumulation window.
const DEFAULT_HALF_WINDOW: usize = 8;

/// Default patch radius of the similarity weight.
const DEFAULT_PATCH_RADIUS: usize = 4;

/// Default variance scaling of the similarity weight.
const DEFAULT_WEIGHTING_ADJUST: f64 = 1.0;

/// Default singular-value cutoff of the transform prepass, relative to the
/// largest singular value.
const DEFAULT_RANK_THRESHOLD: f64 = 0.01;

/// Accumulated weights below this threshold fall back to the noisy input
/// during scatter normalization.
const SCATTER_WEIGHT_EPSILON: f64 = 1e-6;

/// Tunables of the tile drivers.
#[derive(Debug, Clone, Copy)]
pub struct DenoiseConfig<F> {
    pub half_window: usize,
    pub patch_radius: usize,
    pub weighting_adjust: F,
    pub rank_threshold: F,
    /// Sample count of the tile; the solved intercept is scaled by it
    /// because pipeline colors are stored as sums.
    pub sample: F,
}

impl<F: LwrFloat> Default for DenoiseConfig<F> {
    fn default() -> Self {
        Self {
            half_window: DEFAULT_HALF_WINDOW,
            patch_radius: DEFAULT_PATCH_RADIUS,
            weighting_adjust: F::from_f64_c(DEFAULT_WEIGHTING_ADJUST),
            rank_threshold: F::from_f64_c(DEFAULT_RANK_THRESHOLD),
            sample: F::one(),
        }
    }
}

impl<F: LwrFloat> DenoiseConfig<F> {
    fn reconstruct(&self) -> ReconstructConfig<F> {
        ReconstructConfig {
            half_window: self.half_window,
            patch_radius: self.patch_radius,
            weighting_adjust: self.weighting_adjust,
            sample: self.sample,
        }
    }
}

/// Transform prepass for every pixel of the tile, in parallel.
fn storage_prepass<F: LwrFloat>(
    tile: &TileBuffer<F>,
    config: &DenoiseConfig<F>,
) -> Vec<PixelStorage<F>> {
    let w = tile.width();
    (0..w * tile.height())
        .into_par_iter()
        .map(|i| estimate_storage(tile, i % w, i / w, config.half_window, config.rank_threshold))
        .collect()
}

/// Denoise a tile with the decomposed gather path (the production path).
///
/// `planes` is pass-major `(passes, h, w)`; `color_pass` selects the pass
/// group to denoise and `guide_pass` the group driving similarity weights.
/// Returns the denoised color as `(h, w, 3)`.
pub fn run_denoise_tile<F: LwrFloat>(
    planes: ArrayView3<F>,
    color_pass: usize,
    guide_pass: usize,
    config: &DenoiseConfig<F>,
) -> Array3<F> {
    let tile = TileBuffer::new(planes);
    let (w, h) = (tile.width(), tile.height());
    let storages = storage_prepass(&tile, config);

    let mut out = vec![F::zero(); w * h * 3];
    let row_spec = OutputSpec {
        offset: 0,
        row_stride: w,
        pixel_stride: 3,
        base_pass: None,
    };

    out.par_chunks_mut(w * 3)
        .enumerate()
        .for_each(|(y, row_data)| {
            let mut arena = GramianArena::new(1, Contiguous);
            let mut row_out = OutputBuffer::new(row_data, row_spec);
            let (lo_y, hi_y) = window_range(y, config.half_window, h);

            for x in 0..w {
                let storage = &storages[y * w + x];
                arena.reset_slot(0);

                let (lo_x, hi_x) = window_range(x, config.half_window, w);
                for ny in lo_y..hi_y {
                    for nx in lo_x..hi_x {
                        let variance = tile.variance(nx, ny, color_pass);
                        let Some(weight) = neighbor_weight(
                            &tile,
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
                        construct_gramian(
                            &tile,
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
                // The row buffer starts at this row, so finalize addresses y=0
                finalize(&mut arena, 0, storage, x, 0, config.sample, &mut row_out);
            }
        });

    Array3::from_shape_vec((h, w, 3), out).expect("output length matches tile shape")
}

/// Denoise a tile with the gradient-domain scatter path.
///
/// Every pixel's window is reconstructed independently and blended into a
/// shared atomic buffer; the result is normalized by the accumulated weight
/// sum, falling back to the noisy input where no window contributed.
pub fn run_scatter_tile<F: LwrFloat>(
    planes: ArrayView3<F>,
    color_pass: usize,
    guide_pass: usize,
    config: &DenoiseConfig<F>,
) -> Array3<F> {
    let tile = TileBuffer::new(planes);
    let (w, h) = (tile.width(), tile.height());
    let storages = storage_prepass(&tile, config);

    let cells = scatter_cells::<F>(w * h * 4);
    let spec = OutputSpec {
        offset: 0,
        row_stride: w,
        pixel_stride: 4,
        base_pass: None,
    };
    let scatter = ScatterBuffer::<F>::new(&cells, spec);
    let reconstruct_config = config.reconstruct();

    (0..w * h)
        .into_par_iter()
        .for_each_init(Vec::new, |weight_cache, i| {
            let (x, y) = (i % w, i / w);
            reconstruct_pixel(
                &tile,
                x,
                y,
                color_pass,
                guide_pass,
                &storages[i],
                &reconstruct_config,
                weight_cache,
                ReconstructTarget::Scatter(&scatter),
            );
        });

    let eps = F::from_f64_c(SCATTER_WEIGHT_EPSILON);
    Array3::from_shape_fn((h, w, 3), |(y, x, c)| {
        // Where no window contributed, keep the noisy input
        let resolved = scatter.resolve(x, y, eps, tile.color(x, y, color_pass));
        [resolved.r, resolved.g, resolved.b][c]
    })
}
