//! Resize kernels.

use super::ensure_strided;
use crate::error::TensorError;
use crate::tensor::RawTensor;

/// Give `t` a contiguous layout of `shape`, growing its storage if needed.
///
/// Existing elements keep their storage positions; new positions are
/// zero-filled. Every payload aliasing the storage sees the growth.
///
/// # Errors
///
/// Returns `TensorError::MetadataChangeNotAllowed` if `t` was created by a
/// detaching operation.
pub fn resize_(t: &mut RawTensor, shape: &[usize]) -> Result<(), TensorError> {
    ensure_strided(t, "resize_")?;
    t.set_sizes_contiguous(shape)
}

/// Resize `t` to the shape of `template`.
pub fn resize_as_(t: &mut RawTensor, template: &RawTensor) -> Result<(), TensorError> {
    let shape = template.shape().to_vec();
    resize_(t, &shape)
}
