//! 2D transpose, used to move LSE tensors between `[heads, tokens]` and
//! `[tokens, heads]`.

use attnmerge::dtype::DType;
use attnmerge::tensor::Tensor;
use attnmerge::{Error, Result};

use crate::tensor::CpuTensor;

/// Transpose a row-major `[rows, cols]` slice into a new `[cols, rows]` Vec.
#[must_use]
pub fn transpose_slice<T: Copy>(data: &[T], rows: usize, cols: usize) -> Vec<T> {
    debug_assert_eq!(data.len(), rows * cols);
    let mut out = Vec::with_capacity(data.len());
    for c in 0..cols {
        out.extend((0..rows).map(|r| data[r * cols + c]));
    }
    out
}

/// Transpose a 2D tensor.
///
/// # Errors
/// Returns an error if the tensor is not rank 2.
pub fn transpose_2d(input: &CpuTensor) -> Result<CpuTensor> {
    let &[rows, cols] = input.shape() else {
        return Err(Error::InvalidShape(format!(
            "transpose_2d expects a 2D tensor, got {:?}",
            input.shape()
        )));
    };
    let shape = [cols, rows];
    Ok(match input.dtype() {
        DType::F32 => {
            CpuTensor::from_slice(&shape, &transpose_slice(input.as_f32_slice(), rows, cols))
        }
        DType::F16 => CpuTensor::from_slice(
            &shape,
            &transpose_slice(input.as_slice::<half::f16>(), rows, cols),
        ),
        DType::BF16 => CpuTensor::from_slice(
            &shape,
            &transpose_slice(input.as_slice::<half::bf16>(), rows, cols),
        ),
    })
}
