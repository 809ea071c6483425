//! CPU tensor implementation.

use std::sync::Arc;

use attnmerge::dtype::{DType, TensorDType};
use attnmerge::tensor::Tensor;

/// A CPU-resident tensor backed by shared byte storage.
///
/// Uses `Arc<Vec<u8>>` so clones are cheap (shared backing). Mutable access
/// copies on write when the storage is shared.
#[derive(Clone)]
pub struct CpuTensor {
    data: Arc<Vec<u8>>,
    shape: Vec<usize>,
    dtype: DType,
}

impl CpuTensor {
    /// Create an F32 tensor from an f32 slice.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    #[must_use]
    pub fn from_f32(shape: &[usize], data: &[f32]) -> Self {
        Self::from_slice(shape, data)
    }

    /// Create a tensor of `dtype` from f32 data, rounding to the target type.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    #[must_use]
    pub fn from_f32_as(shape: &[usize], dtype: DType, data: &[f32]) -> Self {
        match dtype {
            DType::F32 => Self::from_f32(shape, data),
            DType::F16 => {
                let f16_data: Vec<half::f16> =
                    data.iter().map(|&v| half::f16::from_f32(v)).collect();
                Self::from_slice(shape, &f16_data)
            }
            DType::BF16 => {
                let bf16_data: Vec<half::bf16> =
                    data.iter().map(|&v| half::bf16::from_f32(v)).collect();
                Self::from_slice(shape, &bf16_data)
            }
        }
    }

    /// Create a tensor from a typed slice.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    #[must_use]
    pub fn from_slice<T: TensorDType + bytemuck::Pod>(shape: &[usize], data: &[T]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data len {} != shape product {numel}",
            data.len()
        );
        Self {
            data: Arc::new(bytemuck::cast_slice(data).to_vec()),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
        }
    }

    /// Create a zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            data: Arc::new(vec![0u8; numel * dtype.size_in_bytes()]),
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// View the data as a typed slice.
    ///
    /// # Panics
    /// Panics if `T` does not match the tensor dtype.
    #[must_use]
    pub fn as_slice<T: TensorDType + bytemuck::Pod>(&self) -> &[T] {
        assert_eq!(self.dtype, T::DTYPE, "expected {} tensor", T::DTYPE);
        if self.data.is_empty() {
            return &[];
        }
        bytemuck::cast_slice(&self.data[..])
    }

    /// Mutable typed view of the data.
    ///
    /// # Panics
    /// Panics if `T` does not match the tensor dtype.
    pub fn as_mut_slice<T: TensorDType + bytemuck::Pod>(&mut self) -> &mut [T] {
        assert_eq!(self.dtype, T::DTYPE, "expected {} tensor", T::DTYPE);
        if self.data.is_empty() {
            return &mut [];
        }
        let data = Arc::make_mut(&mut self.data);
        bytemuck::cast_slice_mut(data.as_mut_slice())
    }

    /// Get the data as an f32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not F32.
    #[must_use]
    pub fn as_f32_slice(&self) -> &[f32] {
        self.as_slice()
    }

    /// Get the data as a mutable f32 slice.
    ///
    /// # Panics
    /// Panics if dtype is not F32.
    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        self.as_mut_slice()
    }

    /// Get the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert to an f32 Vec, widening from bf16/f16 if necessary.
    #[must_use]
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self.dtype {
            DType::F32 => self.as_f32_slice().to_vec(),
            DType::BF16 => self
                .as_slice::<half::bf16>()
                .iter()
                .map(|v| v.to_f32())
                .collect(),
            DType::F16 => self
                .as_slice::<half::f16>()
                .iter()
                .map(|v| v.to_f32())
                .collect(),
        }
    }
}

impl Tensor for CpuTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}

impl std::fmt::Debug for CpuTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuTensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}
