//! MergeOps implementation for CpuBackend.
//!
//! Two data-parallel phases over the rayon pool:
//!
//! 1. one task per LSE element computes the [`MergeWeights`] of its
//!    (head, token) pair and, when requested, stores the merged LSE;
//! 2. one task per (token, head) pair blends its `head_size` features.
//!
//! Every output element is written by exactly one task.

use attnmerge::backend::MergeOps;
use attnmerge::dtype::{DType, TensorDType};
use attnmerge::shape::{LseLayout, MergeShape};
use attnmerge::{MergeWeights, Result};
use rayon::prelude::*;

use crate::tensor::CpuTensor;
use crate::CpuBackend;

impl CpuBackend {
    /// Merge with an explicit LSE layout.
    ///
    /// `prefix_lse`, `suffix_lse` and `output_lse` all use `layout`.
    ///
    /// # Errors
    /// Returns an error if shapes or dtypes are inconsistent. Nothing is
    /// written in that case.
    pub fn merge_attn_states_with_layout(
        prefix_output: &CpuTensor,
        prefix_lse: &CpuTensor,
        suffix_output: &CpuTensor,
        suffix_lse: &CpuTensor,
        output: &mut CpuTensor,
        output_lse: Option<&mut CpuTensor>,
        layout: LseLayout,
    ) -> Result<()> {
        let shape =
            MergeShape::validate(prefix_output, prefix_lse, suffix_output, suffix_lse, layout)?;
        shape.check_output(output)?;
        if let Some(lse) = output_lse.as_deref() {
            shape.check_lse(lse)?;
        }

        tracing::debug!(
            tokens = shape.num_tokens,
            heads = shape.num_heads,
            head_size = shape.head_size,
            pairs = shape.num_pairs(),
            padded_head_size = shape.padded_head_size(),
            dtype = %shape.dtype,
            layout = ?shape.layout,
            want_lse = output_lse.is_some(),
            "cpu merge_attn_states"
        );

        let weights = pair_weights(
            prefix_lse.as_f32_slice(),
            suffix_lse.as_f32_slice(),
            output_lse.map(CpuTensor::as_f32_slice_mut),
        );

        let (p, s) = (prefix_output, suffix_output);
        match shape.dtype {
            DType::F32 => blend::<f32>(&shape, &weights, p, s, output),
            DType::F16 => blend::<half::f16>(&shape, &weights, p, s, output),
            DType::BF16 => blend::<half::bf16>(&shape, &weights, p, s, output),
        }
        Ok(())
    }
}

/// Phase 1: weights per LSE element, in the LSE tensors' own layout.
fn pair_weights(
    prefix_lse: &[f32],
    suffix_lse: &[f32],
    output_lse: Option<&mut [f32]>,
) -> Vec<MergeWeights> {
    let weights: Vec<MergeWeights> = prefix_lse
        .par_iter()
        .zip(suffix_lse.par_iter())
        .map(|(&p, &s)| MergeWeights::from_raw(p, s))
        .collect();

    if let Some(out) = output_lse {
        out.par_iter_mut()
            .zip(weights.par_iter())
            .for_each(|(dst, w)| *dst = w.lse.to_raw());
    }
    weights
}

/// Phase 2: blend features for every (token, head) pair.
fn blend<T: TensorDType + bytemuck::Pod>(
    shape: &MergeShape,
    weights: &[MergeWeights],
    prefix_output: &CpuTensor,
    suffix_output: &CpuTensor,
    output: &mut CpuTensor,
) {
    let head_size = shape.head_size;
    let num_heads = shape.num_heads;
    let prefix = prefix_output.as_slice::<T>();
    let suffix = suffix_output.as_slice::<T>();

    output
        .as_mut_slice::<T>()
        .par_chunks_mut(head_size)
        .zip(prefix.par_chunks(head_size))
        .zip(suffix.par_chunks(head_size))
        .enumerate()
        .for_each(|(pair, ((dst, p), s))| {
            let token = pair / num_heads;
            let head = pair % num_heads;
            let w = weights[shape.lse_index(head, token)];
            for ((d, &pv), &sv) in dst.iter_mut().zip(p).zip(s) {
                *d = T::from_f32(w.blend(pv.to_f32(), sv.to_f32()));
            }
        });
}

impl MergeOps for CpuBackend {
    fn merge_attn_states_into(
        prefix_output: &CpuTensor,
        prefix_lse: &CpuTensor,
        suffix_output: &CpuTensor,
        suffix_lse: &CpuTensor,
        output: &mut CpuTensor,
        output_lse: Option<&mut CpuTensor>,
    ) -> Result<()> {
        Self::merge_attn_states_with_layout(
            prefix_output,
            prefix_lse,
            suffix_output,
            suffix_lse,
            output,
            output_lse,
            LseLayout::HeadMajor,
        )
    }
}
