//! Wholesale replacement of a handle's payload.

use super::validate::unpack;
use super::variable::Tensor;
use crate::error::{ArgLocation, AutogradError, Result};

/// Make `self_` use the payload of `new_data`.
///
/// Shape, strides, kind, device and storage are taken from `new_data`,
/// ignoring whether `self_` allows metadata changes. The handle keeps its
/// identity, graph history and version counter; the version is not
/// advanced. A cached gradient accumulator is dropped when `new_data` lives
/// on another device or has different type properties, so the next access
/// creates a fresh one.
///
/// # Errors
///
/// Returns `AutogradError::IncompatibleType` if the two payloads have
/// different layouts; nothing is changed in that case.
pub fn set_data(self_: &Tensor, new_data: &Tensor) -> Result<()> {
    let _span = tracing::trace_span!("set_data").entered();
    let var = unpack(self_, "self", 0)?;
    let replacement = unpack(new_data, "new_data", 1)?.tensor();

    let current_layout = var.data_read().layout();
    if current_layout != replacement.layout() {
        return Err(AutogradError::IncompatibleType {
            target: self_.type_name(),
            target_location: ArgLocation::new("self", 0),
            source_kind: new_data.type_name(),
            source_location: ArgLocation::new("new_data", 1),
        });
    }

    var.replace_data(&replacement);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::variable::Variable;
    use crate::device::Device;
    use crate::scalar::ScalarType;
    use crate::tensor::RawTensor;

    fn var(raw: RawTensor, requires_grad: bool) -> Variable {
        Variable::new(raw, requires_grad).unwrap()
    }

    #[test]
    fn test_set_data_swaps_payload() {
        let a = var(RawTensor::zeros(&[2], ScalarType::F64), false);
        let b = var(RawTensor::ones(&[3, 1], ScalarType::F64), false);
        set_data(&a.clone().into(), &b.clone().into()).unwrap();
        assert_eq!(a.shape(), vec![3, 1]);
        assert!(a.shares_storage_with(&b));
        assert_eq!(a.version(), 0);
        assert!(!a.version_counter().ptr_eq(b.version_counter()));
    }

    #[test]
    fn test_incompatible_layout() {
        let a = var(RawTensor::zeros(&[2], ScalarType::F64), false);
        let b = var(RawTensor::sparse(&[2], ScalarType::F64), false);
        let err = set_data(&a.clone().into(), &b.into()).unwrap_err();
        assert!(matches!(err, AutogradError::IncompatibleType { .. }));
        assert!(err.to_string().contains("SparseCPUDoubleType"));
        assert!(err.to_string().contains("argument #0 'self'"));
        assert!(err.to_string().contains("argument #1 'new_data'"));
        assert_eq!(err.location(), Some(&ArgLocation::new("new_data", 1)));
    }

    #[test]
    fn test_same_device_keeps_accumulator() {
        let a = var(RawTensor::zeros(&[2], ScalarType::F64), true);
        let acc = a.grad_accumulator().unwrap().unwrap();
        let b = var(RawTensor::ones(&[2], ScalarType::F64), false);
        set_data(&a.clone().into(), &b.into()).unwrap();
        assert!(a.grad_accumulator().unwrap().unwrap().ptr_eq(&acc));
    }

    #[test]
    fn test_device_change_resets_accumulator() {
        let a = var(RawTensor::zeros(&[2], ScalarType::F64), true);
        let acc = a.grad_accumulator().unwrap().unwrap();
        let b = var(RawTensor::ones(&[2], ScalarType::F64).on_device(Device::Cuda(0)), false);
        set_data(&a.clone().into(), &b.into()).unwrap();
        assert!(a.cached_grad_accumulator().id().is_none());

        let fresh = a.grad_accumulator().unwrap().unwrap();
        assert!(!fresh.ptr_eq(&acc));
        assert_eq!(fresh.node().input_metadata(0).unwrap().device, Device::Cuda(0));
    }

    #[test]
    fn test_kind_change_resets_accumulator() {
        let a = var(RawTensor::zeros(&[2], ScalarType::F64), true);
        let _acc = a.grad_accumulator().unwrap().unwrap();
        let b = var(RawTensor::ones(&[2], ScalarType::F32), false);
        set_data(&a.clone().into(), &b.into()).unwrap();
        assert!(a.cached_grad_accumulator().id().is_none());
    }

    #[test]
    fn test_ignores_metadata_lock() {
        let mut locked = RawTensor::zeros(&[2], ScalarType::F64);
        locked.set_allow_metadata_change(false);
        let a = var(locked, false);
        let b = var(RawTensor::ones(&[5], ScalarType::F64), false);
        set_data(&a.clone().into(), &b.into()).unwrap();
        assert_eq!(a.shape(), vec![5]);
        assert!(!a.tensor().allow_metadata_change());
    }
}
