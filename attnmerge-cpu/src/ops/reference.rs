//! MergeOps implementation for ReferenceBackend.
//!
//! Whole-tensor formulation, one sequential pass per step:
//!
//! ```text
//! p_lse, s_lse       [H, T]   (+inf replaced by -inf)
//! max_lse            [H, T]
//! p_exp, s_exp       [H, T]   exp(lse - max_lse)
//! out_se             [H, T]   p_exp + s_exp
//! output_lse         [H, T]   ln(out_se) + max_lse
//! p_scale, s_scale   [H, T] -> transposed to [T, H] -> broadcast over D
//! ```
//!
//! Works on raw IEEE values, unlike the tagged arithmetic in
//! [`MergeWeights`](attnmerge::MergeWeights), which makes it an independent
//! check of the CPU engine.
//!
//! A zero-weight side is still multiplied by its scale of 0 here, whereas
//! [`MergeWeights::blend`](attnmerge::MergeWeights::blend) skips it. A
//! non-finite value in a partial output that carries no weight therefore
//! yields NaN from this backend and a finite value from the engine.

use attnmerge::backend::MergeOps;
use attnmerge::dtype::DType;
use attnmerge::shape::{LseLayout, MergeShape};
use attnmerge::tensor::Tensor;
use attnmerge::Result;

use crate::ops::transpose::transpose_slice;
use crate::tensor::CpuTensor;
use crate::ReferenceBackend;

/// Merged LSE and per-pair scales, all `[heads, tokens]`.
struct Scales {
    output_lse: Vec<f32>,
    prefix: Vec<f32>,
    suffix: Vec<f32>,
}

#[allow(clippy::float_cmp)]
fn scales(prefix_lse: &[f32], suffix_lse: &[f32]) -> Scales {
    // Sentinel replacement happens on copies; the caller's tensors are
    // left untouched.
    let no_contribution = |v: f32| if v == f32::INFINITY { f32::NEG_INFINITY } else { v };
    let p_lse: Vec<f32> = prefix_lse.iter().map(|&v| no_contribution(v)).collect();
    let s_lse: Vec<f32> = suffix_lse.iter().map(|&v| no_contribution(v)).collect();

    let max_lse: Vec<f32> = p_lse.iter().zip(&s_lse).map(|(&p, &s)| p.max(s)).collect();

    // When neither side contributed both shifted values would be
    // `-inf - -inf`. Clamp them to zero instead so the two scales come out
    // equal and finite.
    let shifted = |lse: &[f32]| -> Vec<f32> {
        lse.iter()
            .zip(&max_lse)
            .map(|(&v, &m)| if m == f32::NEG_INFINITY { 0.0 } else { v - m })
            .collect()
    };
    let p_exp: Vec<f32> = shifted(&p_lse).into_iter().map(f32::exp).collect();
    let s_exp: Vec<f32> = shifted(&s_lse).into_iter().map(f32::exp).collect();
    let out_se: Vec<f32> = p_exp.iter().zip(&s_exp).map(|(a, b)| a + b).collect();

    // With no contribution on either side the result is the sentinel, unless
    // both inputs were a genuine `-inf`.
    let output_lse = out_se
        .iter()
        .zip(&max_lse)
        .zip(prefix_lse.iter().zip(suffix_lse))
        .map(|((&se, &m), (&p, &s))| {
            if m != f32::NEG_INFINITY {
                se.ln() + m
            } else if p == f32::INFINITY || s == f32::INFINITY {
                f32::INFINITY
            } else {
                f32::NEG_INFINITY
            }
        })
        .collect();

    Scales {
        output_lse,
        prefix: p_exp.iter().zip(&out_se).map(|(e, se)| e / se).collect(),
        suffix: s_exp.iter().zip(&out_se).map(|(e, se)| e / se).collect(),
    }
}

impl MergeOps for ReferenceBackend {
    fn merge_attn_states_into(
        prefix_output: &CpuTensor,
        prefix_lse: &CpuTensor,
        suffix_output: &CpuTensor,
        suffix_lse: &CpuTensor,
        output: &mut CpuTensor,
        output_lse: Option<&mut CpuTensor>,
    ) -> Result<()> {
        let shape = MergeShape::validate(
            prefix_output,
            prefix_lse,
            suffix_output,
            suffix_lse,
            LseLayout::HeadMajor,
        )?;
        shape.check_output(output)?;
        if let Some(lse) = output_lse.as_deref() {
            shape.check_lse(lse)?;
        }
        tracing::debug!(
            tokens = shape.num_tokens,
            heads = shape.num_heads,
            head_size = shape.head_size,
            dtype = %shape.dtype,
            "reference merge_attn_states"
        );

        let scales = scales(prefix_lse.as_f32_slice(), suffix_lse.as_f32_slice());
        if let Some(out_lse) = output_lse {
            out_lse.as_f32_slice_mut().copy_from_slice(&scales.output_lse);
        }

        // [H, T] -> [T, H] so the scales line up with the output's leading axes.
        let (heads, tokens, d) = (shape.num_heads, shape.num_tokens, shape.head_size);
        let p_scale = transpose_slice(&scales.prefix, heads, tokens);
        let s_scale = transpose_slice(&scales.suffix, heads, tokens);

        let p = prefix_output.to_f32_vec();
        let s = suffix_output.to_f32_vec();
        let merged: Vec<f32> = (0..p.len())
            .map(|i| {
                let pair = i / d;
                p[i] * p_scale[pair] + s[i] * s_scale[pair]
            })
            .collect();

        store(output, &merged);
        Ok(())
    }
}

/// Round `merged` into the output buffer's dtype in place.
fn store(output: &mut CpuTensor, merged: &[f32]) {
    match output.dtype() {
        DType::F32 => output.as_f32_slice_mut().copy_from_slice(merged),
        DType::F16 => {
            for (dst, &v) in output.as_mut_slice::<half::f16>().iter_mut().zip(merged) {
                *dst = half::f16::from_f32(v);
            }
        }
        DType::BF16 => {
            for (dst, &v) in output.as_mut_slice::<half::bf16>().iter_mut().zip(merged) {
                *dst = half::bf16::from_f32(v);
            }
        }
    }
}
