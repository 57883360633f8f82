//! Pass-major render tiles and output buffer addressing.
//!
//! A render tile stores each channel as a full `(h, w)` plane ("pass-major"
//! layout): plane index selects a pass, not an interleaved struct. A color
//! pass occupies six consecutive planes: three color channels followed by
//! their three per-channel variances.
//!
//! Output buffers are pixel-interleaved and addressed by an [`OutputSpec`]
//! (offset, row stride, per-pixel channel stride), matching the renderer's
//! combined buffer convention. The direct-write path overwrites; the scatter
//! path accumulates atomically and carries an extra weight-sum channel.

use ndarray::ArrayView3;

use crate::color::Rgb;
use crate::float_trait::LwrFloat;

/// Number of planes occupied by one color pass group (RGB + RGB variance).
pub const COLOR_PASS_PLANES: usize = 6;

/// Read-only view of a pass-major render tile, shaped `(passes, h, w)`.
#[derive(Clone, Copy)]
pub struct TileBuffer<'a, F> {
    planes: ArrayView3<'a, F>,
}

impl<'a, F: LwrFloat> TileBuffer<'a, F> {
    pub fn new(planes: ArrayView3<'a, F>) -> Self {
        Self { planes }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.planes.dim().2
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.planes.dim().1
    }

    #[inline]
    pub fn passes(&self) -> usize {
        self.planes.dim().0
    }

    /// Single channel value of one plane.
    #[inline]
    pub fn plane_value(&self, pass: usize, x: usize, y: usize) -> F {
        self.planes[[pass, y, x]]
    }

    /// Three-channel color of the pass group starting at `color_pass`.
    #[inline]
    pub fn color(&self, x: usize, y: usize, color_pass: usize) -> Rgb<F> {
        Rgb::new(
            self.planes[[color_pass, y, x]],
            self.planes[[color_pass + 1, y, x]],
            self.planes[[color_pass + 2, y, x]],
        )
    }

    /// Mean of the three per-channel variances of the pass group, clamped to
    /// be non-negative (negative values can appear from filtered variance
    /// estimates upstream).
    #[inline]
    pub fn variance(&self, x: usize, y: usize, color_pass: usize) -> F {
        let third = F::one() / F::usize_as(3);
        let sum = self.planes[[color_pass + 3, y, x]]
            + self.planes[[color_pass + 4, y, x]]
            + self.planes[[color_pass + 5, y, x]];
        (sum * third).max(F::zero())
    }
}

/// Addressing of a pixel-interleaved output buffer.
///
/// A pixel's channels start at `(offset + y*row_stride + x) * pixel_stride`.
/// When `base_pass` is set, it is the channel offset (within the pixel) of an
/// undenoised pass that finalize adds to the solved color before writing.
#[derive(Debug, Clone, Copy)]
pub struct OutputSpec {
    pub offset: usize,
    pub row_stride: usize,
    pub pixel_stride: usize,
    pub base_pass: Option<usize>,
}

impl OutputSpec {
    #[inline]
    pub fn pixel_index(&self, x: usize, y: usize) -> usize {
        (self.offset + y * self.row_stride + x) * self.pixel_stride
    }
}

/// Direct-write destination. Exactly one writer per pixel; writes overwrite.
pub struct OutputBuffer<'a, F> {
    data: &'a mut [F],
    spec: OutputSpec,
}

impl<'a, F: LwrFloat> OutputBuffer<'a, F> {
    pub fn new(data: &'a mut [F], spec: OutputSpec) -> Self {
        assert!(spec.pixel_stride >= 3, "output pixels need three channels");
        if let Some(base) = spec.base_pass {
            assert!(
                base + 3 <= spec.pixel_stride,
                "base pass must fit within the pixel stride"
            );
        }
        Self { data, spec }
    }

    /// Overwrite the three color channels of one pixel.
    #[inline]
    pub fn write(&mut self, x: usize, y: usize, color: Rgb<F>) {
        let idx = self.spec.pixel_index(x, y);
        self.data[idx] = color.r;
        self.data[idx + 1] = color.g;
        self.data[idx + 2] = color.b;
    }

    /// Read back the three color channels of one pixel.
    #[inline]
    pub fn read(&self, x: usize, y: usize) -> Rgb<F> {
        let idx = self.spec.pixel_index(x, y);
        Rgb::new(self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    /// Value of the undenoised base pass, or zero when none is configured.
    #[inline]
    pub fn base(&self, x: usize, y: usize) -> Rgb<F> {
        match self.spec.base_pass {
            Some(base) => {
                let idx = self.spec.pixel_index(x, y) + base;
                Rgb::new(self.data[idx], self.data[idx + 1], self.data[idx + 2])
            }
            None => Rgb::zero(),
        }
    }
}

/// Shared scatter destination with atomic accumulation.
///
/// Channels 0..3 accumulate `weight * color`; channel 3 accumulates the
/// weight itself for the trailing normalization step. This is the only
/// buffer with genuine write contention, so all adds are atomic.
pub struct ScatterBuffer<'a, F: LwrFloat> {
    cells: &'a [F::Atomic],
    spec: OutputSpec,
}

impl<'a, F: LwrFloat> ScatterBuffer<'a, F> {
    pub fn new(cells: &'a [F::Atomic], spec: OutputSpec) -> Self {
        assert!(
            spec.pixel_stride >= 4,
            "scatter pixels need three color channels plus a weight channel"
        );
        Self { cells, spec }
    }

    /// Atomically add a weighted contribution to one pixel.
    #[inline]
    pub fn add(&self, x: usize, y: usize, weighted_color: Rgb<F>, weight: F) {
        let idx = self.spec.pixel_index(x, y);
        F::atomic_add(&self.cells[idx], weighted_color.r);
        F::atomic_add(&self.cells[idx + 1], weighted_color.g);
        F::atomic_add(&self.cells[idx + 2], weighted_color.b);
        F::atomic_add(&self.cells[idx + 3], weight);
    }

    /// Read back the accumulated `(weighted color, weight sum)` of one pixel.
    #[inline]
    pub fn read(&self, x: usize, y: usize) -> (Rgb<F>, F) {
        let idx = self.spec.pixel_index(x, y);
        let color = Rgb::new(
            F::atomic_load(&self.cells[idx]),
            F::atomic_load(&self.cells[idx + 1]),
            F::atomic_load(&self.cells[idx + 2]),
        );
        (color, F::atomic_load(&self.cells[idx + 3]))
    }

    /// Resolve one pixel: the weighted accumulation divided by its weight
    /// sum, or `fallback` when the weight sum is below `min_weight`.
    #[inline]
    pub fn resolve(&self, x: usize, y: usize, min_weight: F, fallback: Rgb<F>) -> Rgb<F> {
        let (color, weight) = self.read(x, y);
        if weight < min_weight {
            fallback
        } else {
            color.scale(F::one() / weight)
        }
    }
}

/// Allocate a zeroed slab of atomic cells for a scatter buffer.
pub fn scatter_cells<F: LwrFloat>(len: usize) -> Vec<F::Atomic> {
    (0..len).map(|_| F::atomic_zero()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn test_tile() -> Array3<f32> {
        // 2 passes worth of planes over a 2x2 tile
        Array3::from_shape_fn((COLOR_PASS_PLANES, 2, 2), |(p, y, x)| {
            (p * 4 + y * 2 + x) as f32
        })
    }

    #[test]
    fn test_tile_color_and_variance() {
        let planes = test_tile();
        let tile = TileBuffer::new(planes.view());
        assert_eq!(tile.width(), 2);
        assert_eq!(tile.height(), 2);

        let c = tile.color(1, 0, 0);
        assert_eq!(c, Rgb::new(1.0, 5.0, 9.0));

        // variance planes 3..6 at (1, 0): 13, 17, 21
        let v = tile.variance(1, 0, 0);
        assert!((v - (13.0 + 17.0 + 21.0) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_variance_clamped_non_negative() {
        let mut planes = test_tile();
        planes[[3, 0, 0]] = -100.0;
        planes[[4, 0, 0]] = -100.0;
        planes[[5, 0, 0]] = -100.0;
        let tile = TileBuffer::new(planes.view());
        assert_eq!(tile.variance(0, 0, 0), 0.0);
    }

    #[test]
    fn test_output_write_overwrites() {
        let mut data = vec![0.0f32; 2 * 2 * 3];
        let spec = OutputSpec {
            offset: 0,
            row_stride: 2,
            pixel_stride: 3,
            base_pass: None,
        };
        let mut out = OutputBuffer::new(&mut data, spec);
        out.write(1, 1, Rgb::new(1.0, 2.0, 3.0));
        out.write(1, 1, Rgb::new(4.0, 5.0, 6.0));
        assert_eq!(out.read(1, 1), Rgb::new(4.0, 5.0, 6.0));
        assert_eq!(out.read(0, 0), Rgb::zero());
    }

    #[test]
    fn test_output_base_pass() {
        let mut data = vec![0.0f32; 6];
        data[3] = 0.5;
        data[4] = 0.25;
        data[5] = 0.125;
        let spec = OutputSpec {
            offset: 0,
            row_stride: 1,
            pixel_stride: 6,
            base_pass: Some(3),
        };
        let out = OutputBuffer::new(&mut data, spec);
        assert_eq!(out.base(0, 0), Rgb::new(0.5, 0.25, 0.125));
    }

    #[test]
    fn test_scatter_accumulates() {
        let cells = scatter_cells::<f32>(4);
        let spec = OutputSpec {
            offset: 0,
            row_stride: 1,
            pixel_stride: 4,
            base_pass: None,
        };
        let scatter = ScatterBuffer::<f32>::new(&cells, spec);
        scatter.add(0, 0, Rgb::new(1.0, 2.0, 3.0), 0.5);
        scatter.add(0, 0, Rgb::new(1.0, 2.0, 3.0), 0.25);
        let (color, weight) = scatter.read(0, 0);
        assert_eq!(color, Rgb::new(2.0, 4.0, 6.0));
        assert_eq!(weight, 0.75);
    }

    #[test]
    fn test_scatter_resolve_normalizes_or_falls_back() {
        let cells = scatter_cells::<f32>(8);
        let spec = OutputSpec {
            offset: 0,
            row_stride: 2,
            pixel_stride: 4,
            base_pass: None,
        };
        let scatter = ScatterBuffer::<f32>::new(&cells, spec);
        scatter.add(0, 0, Rgb::new(1.0, 2.0, 3.0), 0.5);

        let fallback = Rgb::new(9.0, 9.0, 9.0);
        assert_eq!(
            scatter.resolve(0, 0, 1e-6, fallback),
            Rgb::new(2.0, 4.0, 6.0)
        );
        // Untouched pixel resolves to the fallback
        assert_eq!(scatter.resolve(1, 0, 1e-6, fallback), fallback);
    }
}
