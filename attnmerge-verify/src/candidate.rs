//! Merge implementations under verification.
//!
//! A candidate takes the shared host inputs, runs one merge, and hands the
//! results back as host f32 data. Each call builds fresh backend tensors,
//! so nothing one candidate does to its buffers is visible to another.

use std::marker::PhantomData;

use attnmerge::backend::{Backend, MergeOps, TensorDataOps, TensorFactory};
use attnmerge::dtype::DType;
use attnmerge::shape::LseLayout;
use attnmerge::Result;
use attnmerge_cpu::{transpose_2d, CpuBackend, CpuTensor};

use crate::inputs::MergeInputs;

/// Host copy of a merge result.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// `[tokens, heads, head_size]`, widened to f32.
    pub output: Vec<f32>,
    /// `[heads, tokens]`, present iff the merge was asked for it.
    pub output_lse: Option<Vec<f32>>,
}

/// A named merge implementation.
pub trait MergeCandidate {
    fn name(&self) -> &str;

    /// Run one merge over `inputs`.
    ///
    /// # Errors
    /// Propagates the implementation's error.
    fn merge(&self, inputs: &MergeInputs, want_lse: bool) -> Result<MergeResult>;
}

/// Any backend implementing the merge op traits.
pub struct BackendCandidate<B> {
    name: String,
    _backend: PhantomData<fn() -> B>,
}

impl<B: Backend> BackendCandidate<B> {
    /// Candidate named after the backend.
    #[must_use]
    pub fn new() -> Self {
        Self::named(B::name())
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> Default for BackendCandidate<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: MergeOps + TensorDataOps> MergeCandidate for BackendCandidate<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn merge(&self, inputs: &MergeInputs, want_lse: bool) -> Result<MergeResult> {
        let out_shape = inputs.output_shape();
        let lse_shape = inputs.lse_shape();
        let prefix_output = B::from_f32_slice(&out_shape, inputs.dtype, &inputs.prefix_output)?;
        let prefix_lse = B::from_f32_slice(&lse_shape, DType::F32, &inputs.prefix_lse)?;
        let suffix_output = B::from_f32_slice(&out_shape, inputs.dtype, &inputs.suffix_output)?;
        let suffix_lse = B::from_f32_slice(&lse_shape, DType::F32, &inputs.suffix_lse)?;

        let (output, output_lse) = B::merge_attn_states(
            &prefix_output,
            &prefix_lse,
            &suffix_output,
            &suffix_lse,
            want_lse,
        )?;

        Ok(MergeResult {
            output: B::to_f32_vec(&output)?,
            output_lse: output_lse.map(|lse| B::to_f32_vec(&lse)).transpose()?,
        })
    }
}

/// The CPU engine driven through its token-major LSE layout.
///
/// LSE inputs are transposed to `[tokens, heads]` before the merge and the
/// merged LSE is transposed back, so results compare directly against
/// head-major candidates.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenMajorCandidate;

impl MergeCandidate for TokenMajorCandidate {
    fn name(&self) -> &str {
        "cpu-token-major"
    }

    fn merge(&self, inputs: &MergeInputs, want_lse: bool) -> Result<MergeResult> {
        let out_shape = inputs.output_shape();
        let lse_shape = inputs.lse_shape();
        let dtype = inputs.dtype;
        let prefix_output = CpuBackend::from_f32_slice(&out_shape, dtype, &inputs.prefix_output)?;
        let suffix_output = CpuBackend::from_f32_slice(&out_shape, dtype, &inputs.suffix_output)?;
        let prefix_lse = CpuBackend::from_f32_slice(&lse_shape, DType::F32, &inputs.prefix_lse)?;
        let suffix_lse = CpuBackend::from_f32_slice(&lse_shape, DType::F32, &inputs.suffix_lse)?;
        let prefix_lse = transpose_2d(&prefix_lse)?;
        let suffix_lse = transpose_2d(&suffix_lse)?;

        let mut output = CpuTensor::zeros(&out_shape, dtype);
        let mut output_lse =
            want_lse.then(|| CpuTensor::zeros(&[inputs.num_tokens, inputs.num_heads], DType::F32));

        CpuBackend::merge_attn_states_with_layout(
            &prefix_output,
            &prefix_lse,
            &suffix_output,
            &suffix_lse,
            &mut output,
            output_lse.as_mut(),
            LseLayout::TokenMajor,
        )?;

        Ok(MergeResult {
            output: output.to_f32_vec(),
            output_lse: output_lse
                .map(|lse| transpose_2d(&lse).map(|t| t.to_f32_vec()))
                .transpose()?,
        })
    }
}
