//! Element-wise tensor operations.

use super::{broadcast_positions, broadcast_shape, ensure_strided};
use crate::error::TensorError;
use crate::scalar::{Element, ScalarType};
use crate::tensor::RawTensor;

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Mul,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Mul => "mul",
        }
    }

    #[inline]
    fn apply<T: Element>(self, x: T, y: T) -> T {
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Mul => x * y,
        }
    }
}

fn binary(a: &RawTensor, b: &RawTensor, op: BinaryOp) -> Result<RawTensor, TensorError> {
    ensure_strided(a, op.name())?;
    ensure_strided(b, op.name())?;
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let out_type = a.scalar_type().promote(b.scalar_type());
    let pa = broadcast_positions(a, &shape)?;
    let pb = broadcast_positions(b, &shape)?;

    let out = dispatch_scalar!(out_type, T => {
        let xs: Vec<T> = a.storage().read().gather(pa.into_iter());
        let ys: Vec<T> = b.storage().read().gather(pb.into_iter());
        let data: Vec<T> = xs.into_iter().zip(ys).map(|(x, y)| op.apply(x, y)).collect();
        RawTensor::from_vec(data, &shape)?
    });
    Ok(out.on_device(a.device()))
}

/// Element-wise sum with broadcasting.
///
/// # Example
///
/// ```
/// use ndautograd::RawTensor;
/// use ndautograd::operations::add;
///
/// let a = RawTensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap();
/// let b = RawTensor::scalar(10.0f64);
/// assert_eq!(add(&a, &b).unwrap().to_vec::<f64>(), vec![11.0, 12.0]);
/// ```
pub fn add(a: &RawTensor, b: &RawTensor) -> Result<RawTensor, TensorError> {
    binary(a, b, BinaryOp::Add)
}

/// Element-wise product with broadcasting.
pub fn mul(a: &RawTensor, b: &RawTensor) -> Result<RawTensor, TensorError> {
    binary(a, b, BinaryOp::Mul)
}

/// Overwrite every element with `value`.
pub fn fill_(t: &RawTensor, value: f64) -> Result<(), TensorError> {
    ensure_strided(t, "fill_")?;
    let values = vec![value; t.numel()];
    t.storage().write().scatter(t.positions(), &values);
    Ok(())
}

/// Zero payload with the shape, kind and device of `t`.
pub fn zeros_like(t: &RawTensor) -> RawTensor {
    RawTensor::zeros(t.shape(), t.scalar_type()).on_device(t.device())
}

/// One-filled payload with the shape, kind and device of `t`.
pub fn ones_like(t: &RawTensor) -> RawTensor {
    RawTensor::ones(t.shape(), t.scalar_type()).on_device(t.device())
}

/// Contiguous copy of `t` converted to `scalar_type`.
pub fn cast(t: &RawTensor, scalar_type: ScalarType) -> Result<RawTensor, TensorError> {
    ensure_strided(t, "cast")?;
    let out = dispatch_scalar!(scalar_type, T => {
        let values: Vec<T> = t.to_vec();
        RawTensor::from_vec(values, t.shape())?
    });
    Ok(out.on_device(t.device()))
}
