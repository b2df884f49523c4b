//! Stride computation utilities.
//!
//! Payloads use column-major (Fortran) order: the first dimension is the
//! fastest-varying one.

use crate::error::TensorError;
use smallvec::SmallVec;

/// Inline dimension vector used for shapes and strides.
pub type DimVec = SmallVec<[usize; 4]>;

/// Compute column-major strides from shape.
///
/// For shape [d0, d1, d2, ...], returns strides [1, d0, d0*d1, ...].
///
/// # Examples
///
/// ```
/// use ndautograd::strides::compute_strides;
///
/// assert_eq!(compute_strides(&[3, 4, 5]).as_slice(), &[1, 3, 12]);
/// assert!(compute_strides(&[]).is_empty());
/// ```
pub fn compute_strides(shape: &[usize]) -> DimVec {
    let mut strides = DimVec::with_capacity(shape.len());
    let mut stride = 1;
    for &dim in shape {
        strides.push(stride);
        stride *= dim.max(1);
    }
    strides
}

/// Number of elements described by a shape (1 for a 0-dimensional shape).
#[inline]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Whether `strides` are the contiguous column-major strides of `shape`.
pub fn is_contiguous(shape: &[usize], strides: &[usize]) -> bool {
    let mut expected = 1;
    for (&dim, &stride) in shape.iter().zip(strides) {
        if dim != 1 && stride != expected {
            return false;
        }
        expected *= dim.max(1);
    }
    true
}

/// Convert a column-major linear index into a storage position.
#[inline]
pub fn storage_index(mut linear: usize, shape: &[usize], strides: &[usize], offset: usize) -> usize {
    let mut pos = offset;
    for (&dim, &stride) in shape.iter().zip(strides) {
        pos += (linear % dim) * stride;
        linear /= dim;
    }
    pos
}

/// Strides that read a `src_shape` tensor as if it had `dst_shape`.
///
/// Dimensions are aligned from the trailing end; size-1 and missing
/// dimensions get stride 0.
pub fn broadcast_strides(
    src_shape: &[usize],
    src_strides: &[usize],
    dst_shape: &[usize],
) -> Result<DimVec, TensorError> {
    let mismatch = || TensorError::BroadcastMismatch {
        src: src_shape.to_vec(),
        dst: dst_shape.to_vec(),
    };
    if src_shape.len() > dst_shape.len() {
        return Err(mismatch());
    }
    let lead = dst_shape.len() - src_shape.len();
    let mut strides = DimVec::with_capacity(dst_shape.len());
    for (i, &dim) in dst_shape.iter().enumerate() {
        if i < lead {
            strides.push(0);
            continue;
        }
        let src_dim = src_shape[i - lead];
        if src_dim == dim {
            strides.push(src_strides[i - lead]);
        } else if src_dim == 1 {
            strides.push(0);
        } else {
            return Err(mismatch());
        }
    }
    Ok(strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_strides_3d() {
        assert_eq!(compute_strides(&[3, 4, 5]).as_slice(), &[1, 3, 12]);
    }

    #[test]
    fn test_compute_strides_zero_dim() {
        assert_eq!(compute_strides(&[0, 3]).as_slice(), &[1, 1]);
    }

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3]), 6);
        assert_eq!(numel(&[]), 1);
        assert_eq!(numel(&[4, 0]), 0);
    }

    #[test]
    fn test_is_contiguous() {
        assert!(is_contiguous(&[2, 3], &[1, 2]));
        assert!(!is_contiguous(&[2, 3], &[3, 1]));
        assert!(is_contiguous(&[1, 3], &[7, 1]));
    }

    #[test]
    fn test_storage_index_with_offset() {
        // 2x2 window starting at row 1 of a 3x2 matrix
        let strides = [1, 3];
        assert_eq!(storage_index(0, &[2, 2], &strides, 1), 1);
        assert_eq!(storage_index(1, &[2, 2], &strides, 1), 2);
        assert_eq!(storage_index(2, &[2, 2], &strides, 1), 4);
    }

    #[test]
    fn test_broadcast_strides() {
        let err = broadcast_strides(&[2], &[1], &[2, 3]).unwrap_err();
        assert!(matches!(err, TensorError::BroadcastMismatch { .. }));

        let s = broadcast_strides(&[3], &[1], &[2, 3]).unwrap();
        assert_eq!(s.as_slice(), &[0, 1]);

        let s = broadcast_strides(&[1, 3], &[1, 1], &[2, 3]).unwrap();
        assert_eq!(s.as_slice(), &[0, 1]);

        let s = broadcast_strides(&[], &[], &[2, 2]).unwrap();
        assert_eq!(s.as_slice(), &[0, 0]);
    }
}
