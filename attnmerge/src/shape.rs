//! Shape and layout validation for merge calls.
//!
//! Attention-output tensors are `[tokens, heads, head_size]`. LSE tensors
//! are `[heads, tokens]` by default, i.e. transposed relative to the
//! outputs. [`LseLayout::TokenMajor`] exists for callers that keep LSEs as
//! `[tokens, heads]`.

use crate::dtype::DType;
use crate::tensor::Tensor;
use crate::{Error, Result};

/// Memory layout of an LSE tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LseLayout {
    /// `[heads, tokens]`
    #[default]
    HeadMajor,
    /// `[tokens, heads]`
    TokenMajor,
}

impl LseLayout {
    /// Flat index of `(head, token)` in an LSE tensor of this layout.
    #[inline]
    #[must_use]
    pub fn index(self, head: usize, token: usize, num_heads: usize, num_tokens: usize) -> usize {
        match self {
            Self::HeadMajor => head * num_tokens + token,
            Self::TokenMajor => token * num_heads + head,
        }
    }
}

/// Validated dimensions of one merge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeShape {
    pub num_tokens: usize,
    pub num_heads: usize,
    pub head_size: usize,
    pub dtype: DType,
    pub layout: LseLayout,
}

impl MergeShape {
    /// Check the four inputs of a merge and derive its dimensions.
    ///
    /// # Errors
    /// Returns an error if ranks, shapes or dtypes are inconsistent, or if
    /// `head_size` is zero.
    pub fn validate<T: Tensor>(
        prefix_output: &T,
        prefix_lse: &T,
        suffix_output: &T,
        suffix_lse: &T,
        layout: LseLayout,
    ) -> Result<Self> {
        let out_shape = prefix_output.shape();
        if out_shape.len() != 3 {
            return Err(Error::InvalidShape(format!(
                "prefix_output must be [tokens, heads, head_size], got {out_shape:?}"
            )));
        }
        if suffix_output.shape() != out_shape {
            return Err(Error::ShapeMismatch {
                expected: out_shape.to_vec(),
                got: suffix_output.shape().to_vec(),
            });
        }

        let shape = Self {
            num_tokens: out_shape[0],
            num_heads: out_shape[1],
            head_size: out_shape[2],
            dtype: prefix_output.dtype(),
            layout,
        };
        if shape.head_size == 0 {
            return Err(Error::InvalidShape("head_size must be non-zero".into()));
        }

        if suffix_output.dtype() != shape.dtype {
            return Err(Error::DtypeMismatch {
                expected: shape.dtype.to_string(),
                got: suffix_output.dtype().to_string(),
            });
        }

        shape.check_lse(prefix_lse)?;
        shape.check_lse(suffix_lse)?;
        Ok(shape)
    }

    /// Shape of the output tensor.
    #[must_use]
    pub fn output_shape(&self) -> [usize; 3] {
        [self.num_tokens, self.num_heads, self.head_size]
    }

    /// Shape of an LSE tensor in this call's layout.
    #[must_use]
    pub fn lse_shape(&self) -> [usize; 2] {
        match self.layout {
            LseLayout::HeadMajor => [self.num_heads, self.num_tokens],
            LseLayout::TokenMajor => [self.num_tokens, self.num_heads],
        }
    }

    /// Number of independent (token, head) pairs.
    #[must_use]
    pub fn num_pairs(&self) -> usize {
        self.num_tokens * self.num_heads
    }

    /// Lane width a vectorised kernel would process per pair.
    ///
    /// Lanes in `head_size..padded_head_size` are masked off.
    #[must_use]
    pub fn padded_head_size(&self) -> usize {
        self.head_size.next_power_of_two()
    }

    /// Flat LSE index of `(head, token)`.
    #[inline]
    #[must_use]
    pub fn lse_index(&self, head: usize, token: usize) -> usize {
        self.layout.index(head, token, self.num_heads, self.num_tokens)
    }

    /// Check an LSE tensor (input or output) against this call.
    ///
    /// # Errors
    /// Returns an error on a shape or dtype mismatch.
    pub fn check_lse<T: Tensor>(&self, lse: &T) -> Result<()> {
        let expected = self.lse_shape();
        if lse.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                got: lse.shape().to_vec(),
            });
        }
        if lse.dtype() != DType::F32 {
            return Err(Error::DtypeMismatch {
                expected: DType::F32.to_string(),
                got: lse.dtype().to_string(),
            });
        }
        Ok(())
    }

    /// Check a caller-provided output tensor.
    ///
    /// # Errors
    /// Returns an error on a shape or dtype mismatch.
    pub fn check_output<T: Tensor>(&self, output: &T) -> Result<()> {
        let expected = self.output_shape();
        if output.shape() != expected {
            return Err(Error::ShapeMismatch {
                expected: expected.to_vec(),
                got: output.shape().to_vec(),
            });
        }
        if output.dtype() != self.dtype {
            return Err(Error::DtypeMismatch {
                expected: self.dtype.to_string(),
                got: output.dtype().to_string(),
            });
        }
        Ok(())
    }
}
