//! Tensor trait definition

use crate::dtype::DType;

/// Core tensor trait shared by all backends.
///
/// The merge kernels only need shape and dtype metadata through this trait;
/// data access goes through backend-specific tensor types.
pub trait Tensor: Sized {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTensor {
        shape: Vec<usize>,
        dtype: DType,
    }

    impl Tensor for FakeTensor {
        fn shape(&self) -> &[usize] {
            &self.shape
        }

        fn dtype(&self) -> DType {
            self.dtype
        }
    }

    fn fake(shape: &[usize], dtype: DType) -> FakeTensor {
        FakeTensor {
            shape: shape.to_vec(),
            dtype,
        }
    }

    #[test]
    fn test_numel() {
        assert_eq!(fake(&[2, 3, 4], DType::F32).numel(), 24);
        assert_eq!(fake(&[], DType::F32).numel(), 1);
        assert_eq!(fake(&[0, 8, 128], DType::F16).numel(), 0);
    }

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(fake(&[2, 3], DType::F32).size_in_bytes(), 24);
        assert_eq!(fake(&[2, 3], DType::F16).size_in_bytes(), 12);
        assert_eq!(fake(&[4], DType::BF16).size_in_bytes(), 8);
    }
}
