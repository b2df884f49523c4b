//! Backward functions of the differentiable operations.

use super::InputInfo;
use crate::autograd::graph::GradFn;
use crate::autograd::saved_variable::SavedVariable;
use crate::error::{AutogradError, Result};
use crate::operations;
use crate::strides::compute_strides;
use crate::tensor::RawTensor;

fn first(grads: Vec<Option<RawTensor>>) -> Option<RawTensor> {
    grads.into_iter().next().flatten()
}

/// Reverses an in-place overwrite of `self` by `src`.
///
/// The overwritten values of `self` no longer influence the output, so its
/// prior history receives a zero gradient; `src` receives the incoming
/// gradient reduced to its own shape, kind and device.
#[derive(Debug)]
pub struct CopyBackwards {
    src: InputInfo,
}

impl CopyBackwards {
    pub fn new(src: InputInfo) -> Self {
        Self { src }
    }

    pub fn src(&self) -> &InputInfo {
        &self.src
    }
}

impl GradFn for CopyBackwards {
    fn name(&self) -> &'static str {
        "CopyBackwards"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = first(grads) else {
            return Ok(vec![None, None]);
        };
        let self_grad = operations::zeros_like(&grad);
        let src_grad = self.src.conform(grad)?;
        Ok(vec![Some(self_grad), Some(src_grad)])
    }
}

#[derive(Debug)]
pub struct AddBackward {
    inputs: [InputInfo; 2],
}

impl AddBackward {
    pub fn new(self_: InputInfo, other: InputInfo) -> Self {
        Self {
            inputs: [self_, other],
        }
    }
}

impl GradFn for AddBackward {
    fn name(&self) -> &'static str {
        "AddBackward"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = first(grads) else {
            return Ok(vec![None, None]);
        };
        self.inputs
            .iter()
            .map(|input| input.conform(grad.clone()).map(Some))
            .collect()
    }
}

#[derive(Debug)]
pub struct MulBackward {
    self_: SavedVariable,
    other: SavedVariable,
    inputs: [InputInfo; 2],
}

impl MulBackward {
    pub fn new(self_: SavedVariable, other: SavedVariable, inputs: [InputInfo; 2]) -> Self {
        Self {
            self_,
            other,
            inputs,
        }
    }
}

impl GradFn for MulBackward {
    fn name(&self) -> &'static str {
        "MulBackward"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = first(grads) else {
            return Ok(vec![None, None]);
        };
        let self_ = self.self_.unpack()?;
        let other = self.other.unpack()?;
        let grad_self = self.inputs[0].conform(operations::mul(&grad, &other)?)?;
        let grad_other = self.inputs[1].conform(operations::mul(&grad, &self_)?)?;
        Ok(vec![Some(grad_self), Some(grad_other)])
    }

    fn release_variables(&self) {
        self.self_.reset_data();
        self.other.reset_data();
    }
}

/// Broadcasts the gradient of a full reduction back to the input shape.
#[derive(Debug)]
pub struct SumBackward {
    input: InputInfo,
}

impl SumBackward {
    pub fn new(input: InputInfo) -> Self {
        Self { input }
    }
}

impl GradFn for SumBackward {
    fn name(&self) -> &'static str {
        "SumBackward"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = first(grads) else {
            return Ok(vec![None]);
        };
        let expanded = RawTensor::zeros(&self.input.shape, grad.scalar_type());
        operations::copy_(&expanded, &grad)?;
        Ok(vec![Some(self.input.conform(expanded)?)])
    }
}

/// Reshapes the gradient of a view back to the shape of its input.
#[derive(Debug)]
pub struct ViewBackward {
    input: InputInfo,
}

impl ViewBackward {
    pub fn new(input: InputInfo) -> Self {
        Self { input }
    }
}

impl GradFn for ViewBackward {
    fn name(&self) -> &'static str {
        "ViewBackward"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = first(grads) else {
            return Ok(vec![None]);
        };
        let shape = &self.input.shape;
        let reshaped = grad
            .deep_clone()
            .as_strided(shape, &compute_strides(shape), 0)?;
        Ok(vec![Some(self.input.conform(reshaped)?)])
    }
}

/// Scatters the gradient of a narrowed window into a zero input gradient.
#[derive(Debug)]
pub struct NarrowBackward {
    input: InputInfo,
    dim: usize,
    start: usize,
}

impl NarrowBackward {
    pub fn new(input: InputInfo, dim: usize, start: usize) -> Self {
        Self { input, dim, start }
    }
}

impl GradFn for NarrowBackward {
    fn name(&self) -> &'static str {
        "NarrowBackward"
    }

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        let Some(grad) = first(grads) else {
            return Ok(vec![None]);
        };
        let full = RawTensor::zeros(&self.input.shape, grad.scalar_type());
        let strides = full.strides().to_vec();
        let window = full.as_strided(grad.shape(), &strides, self.start * strides[self.dim])?;
        operations::copy_(&window, &grad)?;
        Ok(vec![Some(self.input.conform(full)?)])
    }
}

/// Placeholder for a gradient that cannot be computed; fails when reached.
#[derive(Debug)]
pub struct Error {
    message: String,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl GradFn for Error {
    fn name(&self) -> &'static str {
        "Error"
    }

    fn apply(&self, _grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        Err(AutogradError::InvalidOperation(self.message.clone()))
    }
}
