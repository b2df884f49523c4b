//! Differentiable operations used to build graphs.

use super::functions::{AddBackward, InputInfo, MulBackward, NarrowBackward, SumBackward, ViewBackward};
use super::graph::{Edge, GradFn, InputMetadata, Node, NodeRef};
use super::saved_variable::SavedVariable;
use super::validate::unpack;
use super::variable::{Tensor, Variable, make_variable_view};
use crate::error::{Result, TensorError};
use crate::mode::{NonVariableTypeGuard, is_recording};
use crate::operations;
use crate::strides::{compute_strides, numel};
use crate::tensor::RawTensor;

/// Record a node producing `output` from `inputs`, if any input requires
/// grad and recording is active. Returns the edge to the new node.
fn record<F>(make: F, inputs: &[&Variable], output: &RawTensor) -> Option<Edge>
where
    F: FnOnce() -> Box<dyn GradFn>,
{
    if !is_recording() || !inputs.iter().any(|v| v.requires_grad()) {
        return None;
    }
    let next_edges = inputs.iter().map(|v| v.gradient_edge()).collect();
    let node = NodeRef::new(Node::new(make(), next_edges, vec![InputMetadata::of(output)]));
    Some(Edge::new(node, 0))
}

fn output(raw: RawTensor, edge: Option<Edge>) -> Tensor {
    Tensor::Variable(Variable::with_edge(raw, edge.unwrap_or_default()))
}

/// Element-wise sum with broadcasting.
///
/// # Example
///
/// ```
/// use ndautograd::{RawTensor, Tensor, Variable};
/// use ndautograd::autograd::add;
///
/// let a = Variable::new(RawTensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap(), true).unwrap();
/// let b = Variable::new(RawTensor::scalar(1.0f64), false).unwrap();
/// let c = add(&Tensor::from(a), &Tensor::from(b)).unwrap();
/// let c = c.as_variable().unwrap();
/// assert_eq!(c.to_vec::<f64>(), vec![2.0, 3.0]);
/// assert_eq!(c.grad_fn().unwrap().name(), "AddBackward");
/// ```
pub fn add(self_: &Tensor, other: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("add").entered();
    let a = unpack(self_, "self", 0)?;
    let b = unpack(other, "other", 1)?;
    let (ra, rb) = (a.tensor(), b.tensor());
    let raw = {
        let _guard = NonVariableTypeGuard::new();
        operations::add(&ra, &rb)?
    };
    let edge = record(
        || Box::new(AddBackward::new(InputInfo::of(&ra), InputInfo::of(&rb))),
        &[a, b],
        &raw,
    );
    Ok(output(raw, edge))
}

/// Element-wise product with broadcasting.
pub fn mul(self_: &Tensor, other: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("mul").entered();
    let a = unpack(self_, "self", 0)?;
    let b = unpack(other, "other", 1)?;
    let (ra, rb) = (a.tensor(), b.tensor());
    let raw = {
        let _guard = NonVariableTypeGuard::new();
        operations::mul(&ra, &rb)?
    };
    let edge = record(
        || {
            Box::new(MulBackward::new(
                SavedVariable::new(a),
                SavedVariable::new(b),
                [InputInfo::of(&ra), InputInfo::of(&rb)],
            ))
        },
        &[a, b],
        &raw,
    );
    Ok(output(raw, edge))
}

/// Sum of all elements as a 0-dimensional handle.
pub fn sum(self_: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("sum").entered();
    let a = unpack(self_, "self", 0)?;
    let ra = a.tensor();
    let raw = {
        let _guard = NonVariableTypeGuard::new();
        operations::sum(&ra)?
    };
    let edge = record(|| Box::new(SumBackward::new(InputInfo::of(&ra))), &[a], &raw);
    Ok(output(raw, edge))
}

/// Reinterpret a contiguous handle with a new shape.
///
/// The result is a view: it shares storage and the version counter with
/// `self_`.
///
/// # Errors
///
/// Returns `TensorError::InvalidView` if `self_` is not contiguous or the
/// element counts differ.
pub fn view(self_: &Tensor, shape: &[usize]) -> Result<Tensor> {
    let _span = tracing::trace_span!("view").entered();
    let a = unpack(self_, "self", 0)?;
    let ra = a.tensor();
    if !ra.is_contiguous() {
        return Err(TensorError::InvalidView {
            message: "view size is not compatible with input tensor's size and stride".into(),
        }
        .into());
    }
    if numel(shape) != ra.numel() {
        return Err(TensorError::InvalidView {
            message: format!(
                "shape {shape:?} is invalid for input of size {}",
                ra.numel()
            ),
        }
        .into());
    }
    let raw = ra.as_strided(shape, &compute_strides(shape), ra.storage_offset())?;
    let edge = record(|| Box::new(ViewBackward::new(InputInfo::of(&ra))), &[a], &raw);
    Ok(Tensor::Variable(make_variable_view(a, raw, true, true, edge)))
}

/// The window `start..start + length` of dimension `dim`, as a view.
///
/// # Errors
///
/// Returns `TensorError::IndexOutOfBounds` if `dim` or the window is out of
/// range.
pub fn narrow(self_: &Tensor, dim: usize, start: usize, length: usize) -> Result<Tensor> {
    let _span = tracing::trace_span!("narrow").entered();
    let a = unpack(self_, "self", 0)?;
    let ra = a.tensor();
    let Some(&dim_size) = ra.shape().get(dim) else {
        return Err(TensorError::IndexOutOfBounds {
            index: dim,
            dim_size: ra.ndim(),
        }
        .into());
    };
    if start + length > dim_size {
        return Err(TensorError::IndexOutOfBounds {
            index: start + length,
            dim_size,
        }
        .into());
    }
    let mut shape = ra.shape().to_vec();
    shape[dim] = length;
    let offset = ra.storage_offset() + start * ra.strides()[dim];
    let raw = ra.as_strided(&shape, ra.strides(), offset)?;
    let edge = record(
        || Box::new(NarrowBackward::new(InputInfo::of(&ra), dim, start)),
        &[a],
        &raw,
    );
    Ok(Tensor::Variable(make_variable_view(a, raw, true, true, edge)))
}

/// A non-differentiable alias of the payload of `self_`.
///
/// Shares storage but has its own version counter, does not require grad
/// and forbids metadata changes.
pub fn data(self_: &Tensor) -> Result<Tensor> {
    let var = unpack(self_, "self", 0)?;
    Ok(Tensor::Variable(make_variable_view(
        var,
        var.tensor(),
        false,
        false,
        None,
    )))
}

pub fn is_leaf(self_: &Tensor) -> Result<bool> {
    Ok(unpack(self_, "self", 0)?.is_leaf())
}

pub fn output_nr(self_: &Tensor) -> Result<u32> {
    Ok(unpack(self_, "self", 0)?.output_nr())
}

/// Current value of the version counter of `self_`.
pub fn version(self_: &Tensor) -> Result<u32> {
    Ok(unpack(self_, "self", 0)?.version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutogradError;
    use crate::mode::NoGradGuard;
    use crate::scalar::ScalarType;

    fn leaf(values: Vec<f64>, shape: &[usize], requires_grad: bool) -> Tensor {
        let raw = RawTensor::from_vec(values, shape).unwrap();
        Tensor::from(Variable::new(raw, requires_grad).unwrap())
    }

    fn var(t: &Tensor) -> &Variable {
        t.as_variable().unwrap()
    }

    #[test]
    fn test_ops_record_only_when_needed() {
        let a = leaf(vec![1.0, 2.0], &[2], false);
        let b = leaf(vec![3.0, 4.0], &[2], false);
        let c = mul(&a, &b).unwrap();
        assert!(var(&c).is_leaf());
        assert!(!var(&c).requires_grad());
        assert_eq!(var(&c).to_vec::<f64>(), vec![3.0, 8.0]);

        let x = leaf(vec![1.0, 2.0], &[2], true);
        let y = add(&x, &b).unwrap();
        assert!(!var(&y).is_leaf());
        let node = var(&y).grad_fn().unwrap().node();
        assert_eq!(node.next_edges().len(), 2);
        assert!(node.next_edges()[0].is_valid());
        assert!(!node.next_edges()[1].is_valid());
    }

    #[test]
    fn test_no_grad_suppresses_recording() {
        let x = leaf(vec![1.0], &[1], true);
        let _guard = NoGradGuard::new();
        let y = sum(&x).unwrap();
        assert!(var(&y).is_leaf());
    }

    #[test]
    fn test_non_variable_guard_suppresses_recording() {
        let x = leaf(vec![1.0], &[1], true);
        let _guard = NonVariableTypeGuard::new();
        let y = sum(&x).unwrap();
        assert!(!var(&y).requires_grad());
    }

    #[test]
    fn test_view_shares_version_counter() {
        let x = leaf(vec![1.0, 2.0, 3.0, 4.0], &[4], false);
        let v = view(&x, &[2, 2]).unwrap();
        assert!(var(&v).is_view());
        assert!(var(&v).shares_storage_with(var(&x)));
        assert!(var(&v).version_counter().ptr_eq(var(&x).version_counter()));
        assert!(matches!(
            view(&x, &[3]),
            Err(AutogradError::Tensor(TensorError::InvalidView { .. }))
        ));
    }

    #[test]
    fn test_view_of_non_contiguous_fails() {
        let x = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], false);
        let n = narrow(&x, 0, 1, 2).unwrap();
        assert!(view(&n, &[4]).is_err());
    }

    #[test]
    fn test_narrow() {
        let x = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], true);
        let n = narrow(&x, 0, 1, 2).unwrap();
        assert_eq!(var(&n).shape(), vec![2, 2]);
        assert_eq!(var(&n).to_vec::<f64>(), vec![2.0, 3.0, 5.0, 6.0]);
        assert_eq!(var(&n).grad_fn().unwrap().name(), "NarrowBackward");
        assert!(var(&n).base().unwrap().ptr_eq(var(&x)));

        assert!(matches!(
            narrow(&x, 2, 0, 1),
            Err(AutogradError::Tensor(TensorError::IndexOutOfBounds { .. }))
        ));
        assert!(narrow(&x, 1, 1, 2).is_err());
    }

    #[test]
    fn test_data_alias() {
        let x = leaf(vec![1.0, 2.0], &[2], true);
        let d = data(&x).unwrap();
        assert!(!var(&d).requires_grad());
        assert!(var(&d).shares_storage_with(var(&x)));
        assert!(!var(&d).version_counter().ptr_eq(var(&x).version_counter()));
        assert!(!var(&d).tensor().allow_metadata_change());
    }

    #[test]
    fn test_accessors_validate() {
        let plain = Tensor::Plain(RawTensor::zeros(&[1], ScalarType::F64));
        assert!(matches!(is_leaf(&plain), Err(AutogradError::WrongKind { .. })));
        assert!(matches!(
            version(&Tensor::Undefined),
            Err(AutogradError::UndefinedArgument { .. })
        ));

        let x = leaf(vec![1.0], &[1], true);
        assert!(is_leaf(&x).unwrap());
        assert_eq!(output_nr(&x).unwrap(), 0);
        assert_eq!(version(&x).unwrap(), 0);
        let y = sum(&x).unwrap();
        assert!(!is_leaf(&y).unwrap());
    }
}
