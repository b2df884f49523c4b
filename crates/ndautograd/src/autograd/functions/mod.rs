//! Backward functions recorded in the computation graph.

mod accumulate_grad;
mod basic_ops;
mod copy_slices;

pub use accumulate_grad::AccumulateGrad;
pub use basic_ops::{
    AddBackward, CopyBackwards, Error, MulBackward, NarrowBackward, SumBackward, ViewBackward,
};
pub use copy_slices::{AsStridedBackward, CopySlices, StridedGeometry};

use crate::device::Device;
use crate::error::Result;
use crate::operations;
use crate::scalar::ScalarType;
use crate::strides::DimVec;
use crate::tensor::RawTensor;

/// Shape, kind and device a gradient must be conformed to before it flows
/// into an input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputInfo {
    pub shape: DimVec,
    pub scalar_type: ScalarType,
    pub device: Device,
}

impl InputInfo {
    pub fn of(t: &RawTensor) -> Self {
        Self {
            shape: t.shape().iter().copied().collect(),
            scalar_type: t.scalar_type(),
            device: t.device(),
        }
    }

    /// Reduce broadcast dimensions, cast and retag `grad` to match.
    pub fn conform(&self, grad: RawTensor) -> Result<RawTensor> {
        let mut grad = grad;
        if grad.shape() != self.shape.as_slice() {
            grad = operations::sum_to(&grad, &self.shape)?;
        }
        if grad.scalar_type() != self.scalar_type {
            grad = operations::cast(&grad, self.scalar_type)?;
        }
        Ok(grad.on_device(self.device))
    }
}
