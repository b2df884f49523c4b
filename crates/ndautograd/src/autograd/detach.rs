//! Severing handles from the computation graph.

use super::trace;
use super::validate::unpack;
use super::variable::{Tensor, make_variable_view};
use crate::error::{AutogradError, Result};

/// A new handle aliasing the storage of `self_` with no graph history.
///
/// The result does not require grad, forbids metadata changes and gets
/// its own version counter. Dimension names are carried over.
///
/// # Example
///
/// ```
/// use ndautograd::{RawTensor, ScalarType, Tensor, Variable};
/// use ndautograd::autograd::detach;
///
/// let x = Variable::new(RawTensor::ones(&[2], ScalarType::F64), true).unwrap();
/// let d = detach(&Tensor::from(x.clone())).unwrap();
/// let d = d.as_variable().unwrap();
/// assert!(!d.requires_grad());
/// assert!(d.is_leaf());
/// assert!(d.shares_storage_with(&x));
/// ```
pub fn detach(self_: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("detach").entered();
    let var = unpack(self_, "self", 0)?;
    trace::begin_op("detach", &[var]);

    let raw = var.tensor();
    let result = make_variable_view(var, raw, false, false, None);
    {
        let source = var.data_read();
        result.data_write().propagate_names_from(&source);
    }

    trace::end_op("detach", &[&result]);
    Ok(Tensor::Variable(result))
}

/// Remove the graph history of `self_` in place.
///
/// # Errors
///
/// Returns `AutogradError::InvalidOperation` if `self_` is a view; its
/// metadata is left untouched.
pub fn detach_(self_: &Tensor) -> Result<Tensor> {
    let _span = tracing::trace_span!("detach_").entered();
    let var = unpack(self_, "self", 0)?;
    if var.is_view() {
        return Err(AutogradError::InvalidOperation(
            "Can't detach views in-place. Use detach() instead".into(),
        ));
    }
    trace::begin_op("detach_", &[var]);
    var.clear_history();
    trace::end_op("detach_", &[var]);
    Ok(self_.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::mutation::copy_;
    use crate::autograd::variable::Variable;
    use crate::scalar::ScalarType;
    use crate::tensor::RawTensor;

    fn leaf(requires_grad: bool) -> Variable {
        Variable::new(RawTensor::ones(&[2], ScalarType::F64), requires_grad).unwrap()
    }

    fn computed() -> Variable {
        let dst = leaf(false);
        copy_(&dst.clone().into(), &leaf(true).into()).unwrap();
        dst
    }

    #[test]
    fn test_detach_shares_storage() {
        let x = computed();
        let d = detach(&x.clone().into()).unwrap();
        let d = d.as_variable().unwrap();
        assert!(d.grad_fn().is_none());
        assert!(!d.requires_grad());
        assert!(d.shares_storage_with(&x));
        assert!(!d.tensor().allow_metadata_change());
        assert_eq!(d.version(), 0);
        assert_eq!(x.version(), 1);
    }

    #[test]
    fn test_detach_propagates_names() {
        let mut raw = RawTensor::zeros(&[2], ScalarType::F64);
        raw.set_names(vec![Some("batch".into())]).unwrap();
        let x = Variable::new(raw, false).unwrap();
        let d = detach(&x.into()).unwrap();
        let names = d.as_variable().unwrap().tensor().names().unwrap().to_vec();
        assert_eq!(names, vec![Some("batch".to_string())]);
    }

    #[test]
    fn test_detach_in_place() {
        let x = computed();
        assert!(!x.is_leaf());
        detach_(&x.clone().into()).unwrap();
        assert!(x.is_leaf());
        assert!(!x.requires_grad());
        assert_eq!(x.output_nr(), 0);
        assert_eq!(x.version(), 1);
    }

    #[test]
    fn test_detach_in_place_on_leaf_requiring_grad() {
        let x = leaf(true);
        detach_(&x.clone().into()).unwrap();
        assert!(!x.requires_grad());
    }

    #[test]
    fn test_detached_handle_detaches_in_place() {
        let x = leaf(true);
        let d = detach(&x.into()).unwrap();
        assert!(detach_(&d).is_ok());
    }
}
