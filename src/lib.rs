//! LWR Core Denoising Library
//!
//! Pure Rust implementation of a locally weighted regression (LWR) denoiser
//! for Monte Carlo rendered images. For each pixel a small linear model
//! predicts color from per-pixel feature buffers (normals, depth, albedo)
//! over a spatial neighborhood, with neighbors weighted by patch similarity;
//! the fitted intercept is the denoised color.
//!
//! The engine has two execution shapes over the same math:
//! - a decomposed path ([`construct_gramian`] per neighbor, [`finalize`] per
//!   pixel) suited to fine-grained parallel dispatch, with accumulator
//!   memory in either a contiguous or an element-interleaved layout, and
//! - a monolithic per-pixel path ([`reconstruct_pixel`]) that also offers a
//!   gradient-domain scatter mode blending overlapping window predictions
//!   through atomic accumulation.

pub mod buffer;
pub mod color;
pub mod features;
pub mod float_trait;
pub mod gramian;
pub mod matrix;
pub mod nlm;
pub mod pipeline;
pub mod reconstruct;
pub mod transform;

// Re-export commonly used types at the crate root
pub use buffer::{OutputBuffer, OutputSpec, ScatterBuffer, TileBuffer};
pub use color::Rgb;
pub use features::{DENOISE_FEATURES, MATRIX_SIZE};
pub use float_trait::LwrFloat;
pub use gramian::{construct_gramian, finalize, Contiguous, GramianArena, Interleaved};
pub use pipeline::{run_denoise_tile, run_scatter_tile, DenoiseConfig};
pub use reconstruct::{reconstruct_pixel, ReconstructConfig, ReconstructTarget};
pub use transform::{estimate_storage, PixelStorage};
