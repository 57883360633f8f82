//! Incremental Gramian accumulation and per-pixel finalize.
//!
//! This is the production shape of the regression engine: the work
//! distributor calls [`construct_gramian`] once per (output pixel, neighbor)
//! pair, in any order, and [`finalize`] once per pixel after all neighbors
//! landed. Accumulation is commutative and associative, which is what allows
//! dispatching one call per neighbor edge; the caller guarantees that no two
//! concurrent calls touch the same accumulator slot.
//!
//! Accumulator memory supports two physical layouts behind one interface:
//! a private contiguous block per slot for one-thread-per-pixel execution,
//! and an element-interleaved slab for wide-parallel batches where adjacent
//! lanes read adjacent addresses of the same matrix element.

use crate::buffer::{OutputBuffer, TileBuffer};
use crate::color::Rgb;
use crate::features::{get_design_row, get_features, MATRIX_SIZE};
use crate::float_trait::LwrFloat;
use crate::matrix::{trimatrix_add_gramian, trimatrix_vec3_solve, vec3_add_weighted};
use crate::transform::PixelStorage;

/// Variance floor in the firefly test, guarding zero-variance pixels.
pub const FIREFLY_VARIANCE_EPSILON: f64 = 1e-3;

/// Statistical outlier ("firefly") test: a neighbor whose mean absolute
/// color difference from the center exceeds three joint standard deviations
/// contributes nothing.
#[inline]
pub(crate) fn firefly_rejected<F: LwrFloat>(
    p_color: Rgb<F>,
    q_color: Rgb<F>,
    p_std_dev: F,
    q_std_dev: F,
) -> bool {
    p_color.mean_abs_diff(q_color)
        > F::usize_as(3) * (p_std_dev + q_std_dev + F::from_f64_c(FIREFLY_VARIANCE_EPSILON))
}

// =============================================================================
// Accumulator layouts
// =============================================================================

/// Physical placement of accumulator elements within the arena slabs.
///
/// Selected by type parameter at construction, not at runtime; the kernels
/// are written once against this interface.
pub trait AccumLayout: Copy + Send + Sync {
    /// Physical index of a slot's matrix element 0.
    fn matrix_base(&self, slot: usize) -> usize;
    /// Physical index of a slot's vector element 0.
    fn vector_base(&self, slot: usize) -> usize;
    /// Distance between consecutive logical elements of one slot.
    fn stride(&self) -> usize;
}

/// Each slot owns a private contiguous block; stride 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Contiguous;

impl AccumLayout for Contiguous {
    #[inline]
    fn matrix_base(&self, slot: usize) -> usize {
        MATRIX_SIZE * MATRIX_SIZE * slot
    }

    #[inline]
    fn vector_base(&self, slot: usize) -> usize {
        MATRIX_SIZE * slot
    }

    #[inline]
    fn stride(&self) -> usize {
        1
    }
}

/// All slots interleave element-wise across the slab: element `e` of slot
/// `s` lives at `s + e * slots`, so lanes working on different slots touch
/// adjacent addresses for the same element. The stride is fixed for the
/// lifetime of the arena.
#[derive(Debug, Clone, Copy)]
pub struct Interleaved {
    pub slots: usize,
}

impl AccumLayout for Interleaved {
    #[inline]
    fn matrix_base(&self, slot: usize) -> usize {
        slot
    }

    #[inline]
    fn vector_base(&self, slot: usize) -> usize {
        slot
    }

    #[inline]
    fn stride(&self) -> usize {
        self.slots
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Owns the `XtWX` and `XtWY` slabs for a batch of accumulator slots.
///
/// Every slot is sized for the full [`MATRIX_SIZE`] system regardless of the
/// pixel's actual rank. Slots start zeroed; [`reset_slot`](Self::reset_slot)
/// re-zeros one slot for reuse. No two slots alias.
pub struct GramianArena<F: LwrFloat, L: AccumLayout> {
    xtwx: Vec<F>,
    xtwy: Vec<Rgb<F>>,
    layout: L,
    slots: usize,
}

impl<F: LwrFloat, L: AccumLayout> GramianArena<F, L> {
    pub fn new(slots: usize, layout: L) -> Self {
        Self {
            xtwx: vec![F::zero(); slots * MATRIX_SIZE * MATRIX_SIZE],
            xtwy: vec![Rgb::zero(); slots * MATRIX_SIZE],
            layout,
            slots,
        }
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    /// Zero one slot's matrix and vector for reuse.
    ///
    /// Accumulation packs a pixel's `rank + 1`-wide system into the low
    /// indices of the slot region, so the packed footprint depends on the
    /// rank; the whole region is cleared so a reused slot is clean for any
    /// successor rank.
    pub fn reset_slot(&mut self, slot: usize) {
        let stride = self.layout.stride();
        let mb = self.layout.matrix_base(slot);
        for e in 0..MATRIX_SIZE * MATRIX_SIZE {
            self.xtwx[mb + e * stride] = F::zero();
        }
        let vb = self.layout.vector_base(slot);
        for e in 0..MATRIX_SIZE {
            self.xtwy[vb + e * stride] = Rgb::zero();
        }
    }

    /// Slot's matrix slab, starting at its element 0 (strided access).
    #[inline]
    pub fn matrix(&self, slot: usize) -> &[F] {
        &self.xtwx[self.layout.matrix_base(slot)..]
    }

    #[inline]
    pub fn matrix_mut(&mut self, slot: usize) -> &mut [F] {
        let base = self.layout.matrix_base(slot);
        &mut self.xtwx[base..]
    }

    /// Slot's right-hand-side slab, starting at its element 0.
    #[inline]
    pub fn vector(&self, slot: usize) -> &[Rgb<F>] {
        &self.xtwy[self.layout.vector_base(slot)..]
    }

    #[inline]
    pub fn vector_mut(&mut self, slot: usize) -> &mut [Rgb<F>] {
        let base = self.layout.vector_base(slot);
        &mut self.xtwy[base..]
    }

    /// Both slabs of one slot, for the in-place solve.
    #[inline]
    pub fn system_mut(&mut self, slot: usize) -> (&mut [F], &mut [Rgb<F>]) {
        let mb = self.layout.matrix_base(slot);
        let vb = self.layout.vector_base(slot);
        (&mut self.xtwx[mb..], &mut self.xtwy[vb..])
    }
}

// =============================================================================
// Kernels
// =============================================================================

/// Add one neighbor's weighted contribution to an accumulator slot, or add
/// nothing.
///
/// Reads the center `(x, y)` and neighbor `(x+dx, y+dy)` color and variance
/// on `color_pass`, applies the firefly short-circuit (a rejected neighbor
/// has no side effect at all), then accumulates
/// `XtWX += weight * row * row^T` (upper triangle) and
/// `XtWY += weight * row * neighbor_color`, with the design row built
/// against the center's feature means through the center's transform basis.
///
/// The caller guarantees both coordinates are inside the tile and that this
/// slot's rank/transform match `storage`.
#[allow(clippy::too_many_arguments)]
pub fn construct_gramian<F: LwrFloat, L: AccumLayout>(
    tile: &TileBuffer<F>,
    x: usize,
    y: usize,
    dx: isize,
    dy: isize,
    color_pass: usize,
    weight: F,
    storage: &PixelStorage<F>,
    arena: &mut GramianArena<F, L>,
    slot: usize,
) {
    let nx = (x as isize + dx) as usize;
    let ny = (y as isize + dy) as usize;
    debug_assert!(nx < tile.width() && ny < tile.height());

    let p_color = tile.color(x, y, color_pass);
    let q_color = tile.color(nx, ny, color_pass);
    let p_std_dev = tile.variance(x, y, color_pass).sqrt();
    let q_std_dev = tile.variance(nx, ny, color_pass).sqrt();

    if firefly_rejected(p_color, q_color, p_std_dev, q_std_dev) {
        return;
    }

    let feature_means = get_features(tile, x, y);
    let design_row = get_design_row(tile, nx, ny, &feature_means, storage.rank, &storage.transform);

    let n = storage.rank + 1;
    let stride = arena.stride();
    trimatrix_add_gramian(arena.matrix_mut(slot), n, &design_row[..n], weight, stride);
    vec3_add_weighted(
        arena.vector_mut(slot),
        n,
        &design_row[..n],
        q_color.scale(weight),
        stride,
    );
}

/// Solve a fully-accumulated slot and write the denoised color exactly once.
///
/// The normal equations are solved in place (the slot is consumed); the
/// denoised color is the fitted intercept scaled by the pixel's sample count
/// (colors are stored as sums, not means), plus the undenoised base pass
/// when the output is configured with one. A degenerate Gramian writes the
/// base pass alone -- black when none is configured -- never NaN.
pub fn finalize<F: LwrFloat, L: AccumLayout>(
    arena: &mut GramianArena<F, L>,
    slot: usize,
    storage: &PixelStorage<F>,
    x: usize,
    y: usize,
    sample: F,
    out: &mut OutputBuffer<F>,
) {
    let n = storage.rank + 1;
    let stride = arena.stride();
    let (xtwx, xtwy) = arena.system_mut(slot);
    trimatrix_vec3_solve(xtwx, xtwy, n, stride);

    let final_color = xtwy[0].scale(sample) + out.base(x, y);
    out.write(x, y, final_color);
}
