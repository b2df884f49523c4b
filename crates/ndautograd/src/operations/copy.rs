//! Tensor copy kernel.

use super::{broadcast_positions, ensure_strided};
use crate::error::TensorError;
use crate::tensor::RawTensor;

/// Copy `src` into `dst` in place.
///
/// `src` is broadcast to `dst`'s shape and cast to `dst`'s scalar kind.
/// The write goes through `dst`'s strides and offset, so every payload
/// aliasing `dst`'s storage observes it.
///
/// # Errors
///
/// Returns `TensorError::BroadcastMismatch` if `src` cannot be broadcast to
/// `dst`, and `TensorError::UnsupportedLayout` for sparse payloads.
///
/// # Example
///
/// ```
/// use ndautograd::RawTensor;
/// use ndautograd::operations::copy_;
///
/// let src = RawTensor::from_vec(vec![1i64, 2], &[2]).unwrap();
/// let dst = RawTensor::zeros(&[2, 2], ndautograd::ScalarType::F64);
/// copy_(&dst, &src).unwrap();
/// // column-major: src broadcasts along the trailing dimension
/// assert_eq!(dst.to_vec::<f64>(), vec![1.0, 1.0, 2.0, 2.0]);
/// ```
pub fn copy_(dst: &RawTensor, src: &RawTensor) -> Result<(), TensorError> {
    ensure_strided(dst, "copy_")?;
    ensure_strided(src, "copy_")?;

    let src_positions = broadcast_positions(src, dst.shape())?;
    dispatch_scalar!(dst.scalar_type(), T => {
        // Read fully before writing: src and dst may alias.
        let values: Vec<T> = src.storage().read().gather(src_positions.into_iter());
        dst.storage().write().scatter(dst.positions(), &values);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::ScalarType;

    #[test]
    fn test_copy_same_shape() {
        let src = RawTensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let dst = RawTensor::zeros(&[2, 2], ScalarType::F64);
        copy_(&dst, &src).unwrap();
        assert_eq!(dst.to_vec::<f64>(), src.to_vec::<f64>());
    }

    #[test]
    fn test_copy_casts_to_destination_kind() {
        let src = RawTensor::from_vec(vec![1.9f64, -2.2], &[2]).unwrap();
        let dst = RawTensor::zeros(&[2], ScalarType::I32);
        copy_(&dst, &src).unwrap();
        assert_eq!(dst.to_vec::<i32>(), vec![1, -2]);
        assert_eq!(dst.scalar_type(), ScalarType::I32);
    }

    #[test]
    fn test_copy_broadcasts_scalar() {
        let src = RawTensor::scalar(7.0f32);
        let dst = RawTensor::zeros(&[3], ScalarType::F32);
        copy_(&dst, &src).unwrap();
        assert_eq!(dst.to_vec::<f32>(), vec![7.0; 3]);
    }

    #[test]
    fn test_copy_shape_mismatch() {
        let src = RawTensor::from_vec(vec![1.0f64, 2.0, 3.0], &[3]).unwrap();
        let dst = RawTensor::zeros(&[2], ScalarType::F64);
        assert!(matches!(
            copy_(&dst, &src),
            Err(TensorError::BroadcastMismatch { .. })
        ));
    }

    #[test]
    fn test_copy_into_window_writes_through() {
        let base = RawTensor::zeros(&[3, 2], ScalarType::F64);
        let window = base.as_strided(&[2], &[3], 1).unwrap();
        let src = RawTensor::from_vec(vec![5.0f64, 6.0], &[2]).unwrap();
        copy_(&window, &src).unwrap();
        assert_eq!(base.to_vec::<f64>(), vec![0.0, 5.0, 0.0, 0.0, 6.0, 0.0]);
    }

    #[test]
    fn test_copy_rejects_sparse() {
        let src = RawTensor::ones(&[2], ScalarType::F64);
        let dst = RawTensor::sparse(&[2], ScalarType::F64);
        assert!(matches!(
            copy_(&dst, &src),
            Err(TensorError::UnsupportedLayout { .. })
        ));
    }
}
