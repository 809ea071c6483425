//! TensorFactory and TensorDataOps implementations.
//!
//! Both CPU backends hold host memory, so transfers are plain copies.

use attnmerge::backend::{TensorDataOps, TensorFactory};
use attnmerge::dtype::DType;
use attnmerge::{Error, Result};

use crate::tensor::CpuTensor;
use crate::{CpuBackend, ReferenceBackend};

fn checked_numel(shape: &[usize], len: usize) -> Result<()> {
    let numel: usize = shape.iter().product();
    if numel == len {
        Ok(())
    } else {
        Err(Error::InvalidShape(format!(
            "{len} values do not fill shape {shape:?} ({numel} elements)"
        )))
    }
}

macro_rules! impl_host_transfer {
    ($backend:ty) => {
        impl TensorFactory for $backend {
            fn from_f32_slice(shape: &[usize], dtype: DType, data: &[f32]) -> Result<CpuTensor> {
                checked_numel(shape, data.len())?;
                Ok(CpuTensor::from_f32_as(shape, dtype, data))
            }

            fn zeros(shape: &[usize], dtype: DType) -> Result<CpuTensor> {
                Ok(CpuTensor::zeros(shape, dtype))
            }
        }

        impl TensorDataOps for $backend {
            fn to_f32_vec(tensor: &CpuTensor) -> Result<Vec<f32>> {
                Ok(tensor.to_f32_vec())
            }
        }
    };
}

impl_host_transfer!(CpuBackend);
impl_host_transfer!(ReferenceBackend);

#[cfg(test)]
mod tests {
    use super::*;
    use attnmerge::tensor::Tensor;

    #[test]
    fn test_from_f32_slice_rounds_to_dtype() {
        let t = CpuBackend::from_f32_slice(&[2], DType::F16, &[1.0, 0.1]).unwrap();
        assert_eq!(t.dtype(), DType::F16);
        let back = CpuBackend::to_f32_vec(&t).unwrap();
        assert_eq!(back[0], 1.0);
        assert_eq!(back[1], half::f16::from_f32(0.1).to_f32());
    }

    #[test]
    fn test_from_f32_slice_rejects_wrong_len() {
        let err = ReferenceBackend::from_f32_slice(&[2, 2], DType::F32, &[1.0; 3]).unwrap_err();
        assert!(matches!(err, Error::InvalidShape(_)));
    }

    #[test]
    fn test_zeros() {
        let t = ReferenceBackend::zeros(&[3, 1], DType::BF16).unwrap();
        assert_eq!(t.shape(), &[3, 1]);
        assert_eq!(ReferenceBackend::to_f32_vec(&t).unwrap(), vec![0.0; 3]);
    }
}
