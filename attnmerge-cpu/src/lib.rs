//! CPU backends for attnmerge.
//!
//! Two backends share [`CpuTensor`]:
//!
//! - [`CpuBackend`] is the parallel engine. It runs on the rayon pool and
//!   computes weights through [`attnmerge::MergeWeights`].
//! - [`ReferenceBackend`] is a straightforward sequential formulation over
//!   whole tensors, used as ground truth when verifying other backends.
//!
//! All arithmetic is done in f32; f16/bf16 tensors are widened on read and
//! rounded on write.

#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ops;
pub mod tensor;

use attnmerge::backend::Backend;

pub use ops::transpose::transpose_2d;
pub use tensor::CpuTensor;

/// Marker type for the parallel CPU backend.
pub struct CpuBackend;

impl Backend for CpuBackend {
    type Tensor = CpuTensor;

    fn name() -> &'static str {
        "cpu"
    }
}

/// Marker type for the sequential reference backend.
pub struct ReferenceBackend;

impl Backend for ReferenceBackend {
    type Tensor = CpuTensor;

    fn name() -> &'static str {
        "reference"
    }
}
