//! Entry point of the backward pass.

use super::engine::{Engine, default_engine};
use super::validate::unpack;
use super::variable::Tensor;
use crate::error::{AutogradError, Result};
use crate::operations;

/// Compute gradients of `self_` with respect to the leaves of its graph.
///
/// `gradient` seeds the pass; when undefined it defaults to ones, which is
/// only allowed for one-element outputs. The gradients are summed into the
/// `grad` of every reachable leaf that requires grad. With `keep_graph`
/// false the saved payloads of the traversed nodes are freed, so a second
/// pass over them fails.
///
/// `create_graph` only keeps grad mode enabled while the pass runs. The
/// built-in backward functions compute on raw payloads, so the gradients
/// they produce have no `grad_fn` and cannot be differentiated again.
///
/// # Errors
///
/// Returns `AutogradError::InvalidOperation` if `self_` does not require
/// grad, if the seed must be implicit for a multi-element output, or if
/// the seed's shape differs from the output's.
///
/// # Example
///
/// ```
/// use ndautograd::{RawTensor, Tensor, Variable};
/// use ndautograd::autograd::{backward, mul, sum};
///
/// let x = Variable::new(RawTensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap(), true).unwrap();
/// let t = Tensor::from(x.clone());
/// let loss = sum(&mul(&t, &t).unwrap()).unwrap();
/// backward(&loss, &Tensor::Undefined, false, false).unwrap();
/// assert_eq!(x.grad().unwrap().to_vec::<f64>(), vec![2.0, 4.0]);
/// ```
pub fn backward(
    self_: &Tensor,
    gradient: &Tensor,
    keep_graph: bool,
    create_graph: bool,
) -> Result<()> {
    backward_with_engine(default_engine(), self_, gradient, keep_graph, create_graph)
}

/// [`backward`] executed by `engine`.
pub fn backward_with_engine(
    engine: &dyn Engine,
    self_: &Tensor,
    gradient: &Tensor,
    keep_graph: bool,
    create_graph: bool,
) -> Result<()> {
    let _span = tracing::trace_span!("backward").entered();
    let root = unpack(self_, "self", 0)?;
    if !root.requires_grad() {
        return Err(AutogradError::InvalidOperation(
            "element 0 of tensors does not require grad and does not have a grad_fn".into(),
        ));
    }
    let output = root.tensor();
    let seed = match gradient {
        Tensor::Undefined if output.numel() == 1 => operations::ones_like(&output),
        Tensor::Undefined => {
            return Err(AutogradError::InvalidOperation(
                "grad can be implicitly created only for scalar outputs".into(),
            ));
        }
        Tensor::Plain(raw) => raw.clone(),
        Tensor::Variable(var) => var.tensor(),
    };
    if seed.shape() != output.shape() {
        return Err(AutogradError::InvalidOperation(format!(
            "mismatch in shape: seed gradient has a shape of {:?} and the output has a shape of {:?}",
            seed.shape(),
            output.shape()
        )));
    }
    engine.execute(vec![root.gradient_edge()], vec![seed], keep_graph, create_graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::graph::Edge;
    use crate::autograd::ops::sum;
    use crate::autograd::variable::Variable;
    use crate::scalar::ScalarType;
    use crate::tensor::RawTensor;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<(usize, Vec<usize>, bool, bool)>>,
    }

    impl Engine for RecordingEngine {
        fn execute(
            &self,
            roots: Vec<Edge>,
            grads: Vec<RawTensor>,
            keep_graph: bool,
            create_graph: bool,
        ) -> Result<()> {
            self.calls.lock().push((
                roots.len(),
                grads[0].shape().to_vec(),
                keep_graph,
                create_graph,
            ));
            Ok(())
        }
    }

    fn leaf(shape: &[usize]) -> Tensor {
        Tensor::from(Variable::new(RawTensor::ones(shape, ScalarType::F64), true).unwrap())
    }

    #[test]
    fn test_forwards_flags_to_engine() {
        let engine = RecordingEngine::default();
        let x = sum(&leaf(&[3])).unwrap();
        backward_with_engine(&engine, &x, &Tensor::Undefined, true, true).unwrap();
        assert_eq!(*engine.calls.lock(), vec![(1, vec![], true, true)]);
    }

    #[test]
    fn test_implicit_seed_needs_one_element() {
        let err = backward(&leaf(&[2]), &Tensor::Undefined, false, false).unwrap_err();
        assert_eq!(
            err,
            AutogradError::InvalidOperation(
                "grad can be implicitly created only for scalar outputs".into()
            )
        );
    }

    #[test]
    fn test_explicit_seed() {
        let x = leaf(&[2]);
        let seed = Tensor::Plain(RawTensor::from_vec(vec![0.5f64, 1.5], &[2]).unwrap());
        backward(&x, &seed, false, false).unwrap();
        let grad = x.as_variable().unwrap().grad().unwrap();
        assert_eq!(grad.to_vec::<f64>(), vec![0.5, 1.5]);
    }

    #[test]
    fn test_seed_shape_mismatch() {
        let seed = Tensor::Plain(RawTensor::ones(&[3], ScalarType::F64));
        let err = backward(&leaf(&[2]), &seed, false, false).unwrap_err();
        assert!(err.to_string().contains("mismatch in shape"));
    }

    #[test]
    fn test_root_without_grad() {
        let x = Tensor::from(Variable::new(RawTensor::scalar(1.0f64), false).unwrap());
        assert!(matches!(
            backward(&x, &Tensor::Undefined, false, false),
            Err(AutogradError::InvalidOperation(_))
        ));
    }
}
