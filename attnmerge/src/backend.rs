//! Backend trait and op trait definitions.
//!
//! Callers are generic over `B: Backend` and use op traits to express what
//! they need. Each backend implements these traits with its own tensor type.
//!
//! # Design notes
//!
//! - **Op traits extend `Backend`** and name tensors as `Self::Tensor`.
//! - **Ops are associated functions**, not methods: a backend is a marker
//!   type and holds no state between calls.
//! - **Host transfer is its own trait** (`TensorFactory` / `TensorDataOps`)
//!   so the verifier can move identical host data into any backend.

use crate::dtype::DType;
use crate::tensor::Tensor;
use crate::Result;

// ---- Core backend trait ----

/// A compute backend.
pub trait Backend: 'static {
    /// The tensor type for this backend (e.g., `CpuTensor`).
    type Tensor: Tensor + Clone;

    /// Short human-readable backend name used in logs and reports.
    fn name() -> &'static str;
}

// ---- Op traits ----

/// Host data → backend tensor.
pub trait TensorFactory: Backend {
    /// Build a tensor of `dtype` from f32 host data, rounding as needed.
    fn from_f32_slice(shape: &[usize], dtype: DType, data: &[f32]) -> Result<Self::Tensor>;

    /// Zero-filled tensor.
    fn zeros(shape: &[usize], dtype: DType) -> Result<Self::Tensor>;
}

/// Backend tensor → host data.
pub trait TensorDataOps: Backend {
    /// Copy a tensor to host, widening to f32.
    fn to_f32_vec(tensor: &Self::Tensor) -> Result<Vec<f32>>;
}

/// Merge of two split-KV partial attention states.
///
/// Shapes: `prefix_output`, `suffix_output` and `output` are
/// `[tokens, heads, head_size]`; `prefix_lse`, `suffix_lse` and `output_lse`
/// are `[heads, tokens]` F32. An LSE of `+inf` marks a chunk that saw no
/// keys for that (head, token) pair.
pub trait MergeOps: TensorFactory {
    /// Merge into caller-provided buffers.
    ///
    /// `output_lse` is only written when provided. Inputs are never
    /// modified.
    fn merge_attn_states_into(
        prefix_output: &Self::Tensor,
        prefix_lse: &Self::Tensor,
        suffix_output: &Self::Tensor,
        suffix_lse: &Self::Tensor,
        output: &mut Self::Tensor,
        output_lse: Option<&mut Self::Tensor>,
    ) -> Result<()>;

    /// Merge into freshly allocated buffers.
    ///
    /// Returns `(output, output_lse)`; `output_lse` is `Some` iff `want_lse`.
    /// `want_lse` never changes `output`.
    fn merge_attn_states(
        prefix_output: &Self::Tensor,
        prefix_lse: &Self::Tensor,
        suffix_output: &Self::Tensor,
        suffix_lse: &Self::Tensor,
        want_lse: bool,
    ) -> Result<(Self::Tensor, Option<Self::Tensor>)> {
        let mut output = Self::zeros(prefix_output.shape(), prefix_output.dtype())?;
        let mut output_lse = if want_lse {
            Some(Self::zeros(prefix_lse.shape(), DType::F32)?)
        } else {
            None
        };
        Self::merge_attn_states_into(
            prefix_output,
            prefix_lse,
            suffix_output,
            suffix_lse,
            &mut output,
            output_lse.as_mut(),
        )?;
        Ok((output, output_lse))
    }
}
