//! In-place overwrite and resize of differentiable handles.

use super::functions::{AsStridedBackward, CopyBackwards, CopySlices, InputInfo, StridedGeometry};
use super::graph::{Edge, InputMetadata, Node, NodeRef};
use super::trace;
use super::validate::{check_inplace, unpack};
use super::variable::Tensor;
use crate::error::{AutogradError, Result};
use crate::mode::{NonVariableTypeGuard, is_recording};
use crate::operations;

/// Overwrite the payload of `self_` with `src`, broadcasting and casting.
///
/// The version counter of `self_` (shared with its aliases) advances by
/// one. When either argument requires grad and `self_` is floating point,
/// a `CopyBackwards` node becomes the sole producer of `self_`, with the
/// prior histories of `self_` and `src` as its next edges. Otherwise the
/// history of `self_` is left as it was.
///
/// When `self_` is a view, its base gets a `CopySlices` producer that sends
/// the gradient of the written window through `CopyBackwards` and the rest
/// to the base's prior history; the view is re-derived from it.
///
/// # Errors
///
/// Fails if either argument is not a defined differentiable handle, if
/// `self_` may not be mutated in place, or if `src` does not broadcast.
///
/// # Example
///
/// ```
/// use ndautograd::{RawTensor, Tensor, Variable};
/// use ndautograd::autograd::copy_;
///
/// let dst = Variable::new(RawTensor::zeros(&[2], ndautograd::ScalarType::F64), false).unwrap();
/// let src = Variable::new(RawTensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap(), true).unwrap();
/// copy_(&Tensor::from(dst.clone()), &Tensor::from(src)).unwrap();
///
/// assert_eq!(dst.to_vec::<f64>(), vec![1.0, 2.0]);
/// assert_eq!(dst.version(), 1);
/// assert!(dst.requires_grad());
/// assert!(!dst.is_leaf());
/// ```
pub fn copy_(self_: &Tensor, src: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("copy_").entered();
    let dst = unpack(self_, "self", 0)?;
    let source = unpack(src, "src", 1)?;
    check_inplace(dst, "self", 0)?;
    trace::begin_op("copy_", &[dst, source]);

    let requires_grad = is_recording()
        && (dst.requires_grad() || source.requires_grad())
        && dst.scalar_type().is_floating_point();
    let src_raw = source.tensor();
    let pending = requires_grad.then(|| {
        // Through a view, the overwritten history is the base's
        let self_edge = match dst.base() {
            Some(base) => base.gradient_edge(),
            None => dst.gradient_edge(),
        };
        (
            CopyBackwards::new(InputInfo::of(&src_raw)),
            vec![self_edge, source.gradient_edge()],
        )
    });

    let written = {
        let _guard = NonVariableTypeGuard::new();
        operations::copy_(&dst.data_read(), &src_raw)
    };
    if let Err(e) = written {
        trace::end_op("copy_", &[dst]);
        return Err(e.into());
    }

    match (pending, dst.base()) {
        (Some((function, next_edges)), Some(base)) => {
            let base_raw = base.tensor();
            let view_raw = dst.tensor();
            let geometry = StridedGeometry::of(&view_raw);
            let base_fn = NodeRef::new(Node::new(
                Box::new(CopySlices::new(&base_raw, geometry.clone(), Box::new(function))),
                next_edges,
                vec![InputMetadata::of(&base_raw)],
            ));
            let view_fn = NodeRef::new(Node::new(
                Box::new(AsStridedBackward::new(&base_raw, geometry)),
                vec![Edge::new(base_fn.clone(), 0)],
                vec![InputMetadata::of(&view_raw)],
            ));
            dst.commit_inplace_on_view(base_fn, view_fn);
        }
        (Some((function, next_edges)), None) => {
            let metadata = InputMetadata::of(&dst.data_read());
            let node = NodeRef::new(Node::new(Box::new(function), next_edges, vec![metadata]));
            dst.commit_inplace(Some(node));
        }
        (None, _) => dst.commit_inplace(None),
    }

    trace::end_op("copy_", &[dst]);
    Ok(self_.clone())
}

fn check_resizable(op: &str, self_: &Tensor) -> Result<()> {
    let var = unpack(self_, "self", 0)?;
    if var.requires_grad() {
        return Err(AutogradError::InvalidMutation(
            "cannot resize variables that require grad".into(),
        ));
    }
    if trace::is_tracing() {
        tracing::warn!(op, "resize is not captured by the active trace");
    }
    trace::warn(op, "the result's size is baked into the captured graph");
    Ok(())
}

/// Resize the payload of `self_` to `shape`.
///
/// # Errors
///
/// Returns `AutogradError::InvalidMutation` if `self_` requires grad, in
/// which case nothing is resized.
pub fn resize_(self_: &Tensor, shape: &[usize]) -> Result<Tensor> {
    let _span = tracing::trace_span!("resize_").entered();
    check_resizable("resize_", self_)?;
    let var = unpack(self_, "self", 0)?;
    {
        let _guard = NonVariableTypeGuard::new();
        operations::resize_(&mut var.data_write(), shape)?;
    }
    Ok(self_.clone())
}

/// Resize the payload of `self_` to the shape of `the_template`.
pub fn resize_as_(self_: &Tensor, the_template: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("resize_as_").entered();
    let var = unpack(self_, "self", 0)?;
    let template = unpack(the_template, "the_template", 1)?;
    check_resizable("resize_as_", self_)?;
    let template_raw = template.tensor();
    {
        let _guard = NonVariableTypeGuard::new();
        operations::resize_as_(&mut var.data_write(), &template_raw)?;
    }
    Ok(self_.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::ops::{mul, narrow};
    use crate::autograd::variable::Variable;
    use crate::mode::NoGradGuard;
    use crate::scalar::ScalarType;
    use crate::tensor::RawTensor;

    fn var(values: Vec<f64>, requires_grad: bool) -> Variable {
        let n = values.len();
        Variable::new(RawTensor::from_vec(values, &[n]).unwrap(), requires_grad).unwrap()
    }

    #[test]
    fn test_copy_without_grad_keeps_leaf() {
        let dst = var(vec![0.0, 0.0], false);
        let src = var(vec![3.0, 4.0], false);
        copy_(&dst.clone().into(), &src.into()).unwrap();
        assert_eq!(dst.to_vec::<f64>(), vec![3.0, 4.0]);
        assert_eq!(dst.version(), 1);
        assert!(dst.is_leaf());
        assert!(!dst.requires_grad());
    }

    #[test]
    fn test_copy_records_history() {
        let dst = var(vec![0.0, 0.0], false);
        let src = var(vec![3.0, 4.0], true);
        copy_(&dst.clone().into(), &src.clone().into()).unwrap();

        let grad_fn = dst.grad_fn().unwrap();
        assert_eq!(grad_fn.name(), "CopyBackwards");
        assert_eq!(dst.output_nr(), 0);
        let node = grad_fn.node();
        let edges = node.next_edges();
        assert_eq!(edges.len(), 2);
        assert!(!edges[0].is_valid());
        let acc = src.grad_accumulator().unwrap().unwrap();
        assert!(edges[1].function.as_ref().unwrap().ptr_eq(&acc));
    }

    #[test]
    fn test_copy_into_view_rebases_base() {
        let x = var(vec![1.0, 1.0], true);
        let ones = var(vec![1.0, 1.0], false);
        let y = mul(&x.into(), &ones.into()).unwrap();
        let base = y.as_variable().unwrap();
        let prior = base.grad_fn().unwrap();
        let v = narrow(&y, 0, 0, 1).unwrap();

        copy_(&v, &var(vec![5.0], true).into()).unwrap();
        assert_eq!(base.to_vec::<f64>(), vec![5.0, 1.0]);
        assert_eq!(base.version(), 1);

        let base_fn = base.grad_fn().unwrap();
        assert_eq!(base_fn.name(), "CopySlices");
        let node = base_fn.node();
        assert!(node.next_edges()[0].function.as_ref().unwrap().ptr_eq(&prior));

        let view_fn = v.as_variable().unwrap().grad_fn().unwrap();
        assert_eq!(view_fn.name(), "AsStridedBackward");
        let node = view_fn.node();
        assert!(node.next_edges()[0].function.as_ref().unwrap().ptr_eq(&base_fn));
    }

    #[test]
    fn test_copy_into_view_without_grad_keeps_history() {
        let base = var(vec![0.0, 0.0, 0.0], false);
        let v = narrow(&base.clone().into(), 0, 1, 2).unwrap();
        copy_(&v, &var(vec![1.0, 2.0], false).into()).unwrap();
        assert!(base.is_leaf());
        assert!(v.as_variable().unwrap().grad_fn().is_none());
        assert_eq!(base.version(), 1);
    }

    #[test]
    fn test_copy_into_integral_never_requires_grad() {
        let dst = Variable::new(RawTensor::zeros(&[2], ScalarType::I64), false).unwrap();
        let src = var(vec![1.5, 2.5], true);
        copy_(&dst.clone().into(), &src.into()).unwrap();
        assert_eq!(dst.to_vec::<i64>(), vec![1, 2]);
        assert!(!dst.requires_grad());
        assert_eq!(dst.version(), 1);
    }

    #[test]
    fn test_copy_into_leaf_requiring_grad_fails() {
        let dst = var(vec![0.0], true);
        let src = var(vec![1.0], false);
        let err = copy_(&dst.clone().into(), &src.into()).unwrap_err();
        assert!(matches!(err, AutogradError::InvalidMutation(_)));
        assert_eq!(dst.version(), 0);
        assert_eq!(dst.to_vec::<f64>(), vec![0.0]);
    }

    #[test]
    fn test_copy_under_no_grad() {
        let dst = var(vec![0.0], true);
        let src = var(vec![1.0], true);
        let _guard = NoGradGuard::new();
        copy_(&dst.clone().into(), &src.into()).unwrap();
        assert!(dst.is_leaf());
        assert_eq!(dst.to_vec::<f64>(), vec![1.0]);
    }

    #[test]
    fn test_copy_rejects_plain_src() {
        let dst = var(vec![0.0], false);
        let src = Tensor::Plain(RawTensor::ones(&[1], ScalarType::F64));
        let err = copy_(&dst.into(), &src).unwrap_err();
        assert_eq!(err.location().unwrap().pos, 1);
    }

    #[test]
    fn test_resize_requires_grad_fails() {
        let v = var(vec![1.0, 2.0], true);
        let err = resize_(&v.clone().into(), &[4]).unwrap_err();
        assert_eq!(
            err,
            AutogradError::InvalidMutation("cannot resize variables that require grad".into())
        );
        assert_eq!(v.shape(), vec![2]);
    }

    #[test]
    fn test_resize_and_resize_as() {
        let v = var(vec![1.0, 2.0], false);
        resize_(&v.clone().into(), &[2, 2]).unwrap();
        assert_eq!(v.shape(), vec![2, 2]);
        assert_eq!(v.to_vec::<f64>(), vec![1.0, 2.0, 0.0, 0.0]);

        let template = Variable::new(RawTensor::zeros(&[3], ScalarType::I32), false).unwrap();
        resize_as_(&v.clone().into(), &template.into()).unwrap();
        assert_eq!(v.shape(), vec![3]);
        assert_eq!(v.scalar_type(), ScalarType::F64);
    }
}
