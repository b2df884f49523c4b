//! Reductions.

use super::ensure_strided;
use crate::error::TensorError;
use crate::strides::{broadcast_strides, compute_strides, numel, storage_index};
use crate::tensor::RawTensor;

/// Sum of all elements as a 0-dimensional payload of the same kind.
pub fn sum(t: &RawTensor) -> Result<RawTensor, TensorError> {
    sum_to(t, &[])
}

/// Reduce `t` to `shape` by summing over broadcast dimensions.
///
/// This is the adjoint of broadcasting a `shape` tensor to `t`'s shape.
///
/// # Errors
///
/// Returns `TensorError::BroadcastMismatch` if `shape` does not broadcast
/// to `t`'s shape.
///
/// # Example
///
/// ```
/// use ndautograd::RawTensor;
/// use ndautograd::operations::sum_to;
///
/// let t = RawTensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
/// let s = sum_to(&t, &[2]).unwrap();
/// assert_eq!(s.to_vec::<f64>(), vec![3.0, 7.0]);
/// ```
pub fn sum_to(t: &RawTensor, shape: &[usize]) -> Result<RawTensor, TensorError> {
    ensure_strided(t, "sum_to")?;
    let out_strides = broadcast_strides(shape, &compute_strides(shape), t.shape())?;
    let out = dispatch_scalar!(t.scalar_type(), T => {
        let values: Vec<T> = t.to_vec();
        let mut acc = vec![<T as num_traits::Zero>::zero(); numel(shape)];
        for (i, v) in values.into_iter().enumerate() {
            let slot = storage_index(i, t.shape(), &out_strides, 0);
            acc[slot] = acc[slot] + v;
        }
        RawTensor::from_vec(acc, shape)?
    });
    Ok(out.on_device(t.device()))
}
