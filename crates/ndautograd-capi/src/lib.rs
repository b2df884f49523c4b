//! C API for ndautograd
//!
//! This crate provides a C-compatible interface to the differentiable
//! handles of ndautograd, for f64 payloads.
//!
//! All extern "C" functions are inherently unsafe as they work with raw pointers
//! from foreign code. The `#[unsafe(no_mangle)]` attribute marks the entire
//! function signature as unsafe at the FFI boundary.

#![allow(clippy::not_unsafe_ptr_arg_deref)]

use libc::{c_double, c_int, c_long, size_t};
use ndautograd::autograd::{self, Tensor, Variable};
use ndautograd::{AutogradError, RawTensor, TensorError};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

// Status codes
pub type StatusCode = c_int;

pub const NDA_SUCCESS: StatusCode = 0;
pub const NDA_INVALID_ARGUMENT: StatusCode = -1;
pub const NDA_SHAPE_MISMATCH: StatusCode = -2;
pub const NDA_INDEX_OUT_OF_BOUNDS: StatusCode = -3;
pub const NDA_INTERNAL_ERROR: StatusCode = -4;
pub const NDA_INVALID_MUTATION: StatusCode = -5;
pub const NDA_INVALID_OPERATION: StatusCode = -6;
pub const NDA_INCOMPATIBLE_TYPE: StatusCode = -7;
pub const NDA_NO_GRAD: StatusCode = -8;

fn status_of(err: &AutogradError) -> StatusCode {
    match err {
        AutogradError::UndefinedArgument { .. } | AutogradError::WrongKind { .. } => {
            NDA_INVALID_ARGUMENT
        }
        AutogradError::IncompatibleType { .. } => NDA_INCOMPATIBLE_TYPE,
        AutogradError::InvalidMutation(_) => NDA_INVALID_MUTATION,
        AutogradError::InvalidOperation(_) => NDA_INVALID_OPERATION,
        AutogradError::Tensor(TensorError::IndexOutOfBounds { .. }) => NDA_INDEX_OUT_OF_BOUNDS,
        AutogradError::Tensor(
            TensorError::ShapeMismatch { .. } | TensorError::BroadcastMismatch { .. },
        ) => NDA_SHAPE_MISMATCH,
        AutogradError::Tensor(_) => NDA_INTERNAL_ERROR,
    }
}

fn status_from(result: Result<(), AutogradError>) -> StatusCode {
    match result {
        Ok(()) => NDA_SUCCESS,
        Err(e) => status_of(&e),
    }
}

/// Opaque differentiable handle over f64 data
#[repr(C)]
pub struct nda_variable {
    _private: *mut std::ffi::c_void,
}

impl nda_variable {
    fn from_tensor(tensor: Tensor) -> Self {
        let boxed = Box::new(tensor);
        Self {
            _private: Box::into_raw(boxed) as *mut std::ffi::c_void,
        }
    }

    fn inner(&self) -> &Tensor {
        unsafe { &*(self._private as *const Tensor) }
    }

    fn variable(&self) -> Option<&Variable> {
        self.inner().as_variable()
    }
}

impl Drop for nda_variable {
    fn drop(&mut self) {
        if !self._private.is_null() {
            unsafe {
                let _ = Box::from_raw(self._private as *mut Tensor);
            }
        }
    }
}

fn into_raw(tensor: Tensor) -> *mut nda_variable {
    Box::into_raw(Box::new(nda_variable::from_tensor(tensor)))
}

fn write_values(values: &[f64], out: *mut c_double, len: size_t) -> StatusCode {
    if values.len() > len {
        return NDA_SHAPE_MISMATCH;
    }
    unsafe {
        ptr::copy_nonoverlapping(values.as_ptr(), out, values.len());
    }
    NDA_SUCCESS
}

// ============================================================================
// Handle lifecycle
// ============================================================================

/// Create a leaf handle from data.
///
/// # Arguments
/// * `data` - Pointer to data array (column-major order)
/// * `len` - Length of data array
/// * `shape` - Pointer to array of dimensions
/// * `ndim` - Number of dimensions
/// * `requires_grad` - Nonzero to collect gradients for this leaf
/// * `status` - Pointer to receive status code
///
/// # Returns
/// Pointer to new handle, or null on error
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_from_data(
    data: *const c_double,
    len: size_t,
    shape: *const size_t,
    ndim: size_t,
    requires_grad: c_int,
    status: *mut StatusCode,
) -> *mut nda_variable {
    if status.is_null() {
        return ptr::null_mut();
    }

    if data.is_null() || (shape.is_null() && ndim > 0) {
        unsafe {
            *status = NDA_INVALID_ARGUMENT;
        }
        return ptr::null_mut();
    }

    let result = catch_unwind(|| {
        let data_slice = unsafe { std::slice::from_raw_parts(data, len) };
        let shape_slice: &[usize] = if ndim == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(shape, ndim) }
        };

        let raw = match RawTensor::from_vec(data_slice.to_vec(), shape_slice) {
            Ok(raw) => raw,
            Err(_) => return (ptr::null_mut(), NDA_SHAPE_MISMATCH),
        };
        match Variable::new(raw, requires_grad != 0) {
            Ok(var) => (into_raw(Tensor::Variable(var)), NDA_SUCCESS),
            Err(e) => (ptr::null_mut(), status_of(&e)),
        }
    });

    match result {
        Ok((ptr, code)) => {
            unsafe {
                *status = code;
            }
            ptr
        }
        Err(_) => {
            unsafe {
                *status = NDA_INTERNAL_ERROR;
            }
            ptr::null_mut()
        }
    }
}

/// Release (free) a handle.
///
/// Other handles sharing its storage or graph are unaffected.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_release(var: *mut nda_variable) {
    if !var.is_null() {
        unsafe {
            let _ = Box::from_raw(var);
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Number of elements.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_numel(var: *const nda_variable) -> size_t {
    if var.is_null() {
        return 0;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        (*var).variable().map_or(0, |v| v.numel())
    }));

    result.unwrap_or(0)
}

/// 1 if the handle requires grad, 0 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_requires_grad(var: *const nda_variable) -> c_int {
    if var.is_null() {
        return 0;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        (*var).variable().is_some_and(|v| v.requires_grad()) as c_int
    }));

    result.unwrap_or(0)
}

/// 1 if the handle has no producing node, 0 otherwise, -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_is_leaf(var: *const nda_variable) -> c_int {
    if var.is_null() {
        return -1;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        match autograd::is_leaf((*var).inner()) {
            Ok(leaf) => leaf as c_int,
            Err(_) => -1,
        }
    }));

    result.unwrap_or(-1)
}

/// Current version counter value.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_version(var: *const nda_variable, out: *mut c_long) -> StatusCode {
    if var.is_null() || out.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        match autograd::version((*var).inner()) {
            Ok(v) => {
                *out = v as c_long;
                NDA_SUCCESS
            }
            Err(e) => status_of(&e),
        }
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}

/// Copy the elements (column-major) into `out`, which holds `len` values.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_data(
    var: *const nda_variable,
    out: *mut c_double,
    len: size_t,
) -> StatusCode {
    if var.is_null() || out.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        match (*var).variable() {
            Some(v) => write_values(&v.to_vec::<f64>(), out, len),
            None => NDA_INVALID_ARGUMENT,
        }
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}

/// Copy the accumulated gradient into `out`.
///
/// Returns `NDA_NO_GRAD` if no gradient has been accumulated.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_grad(
    var: *const nda_variable,
    out: *mut c_double,
    len: size_t,
) -> StatusCode {
    if var.is_null() || out.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        match (*var).variable().map(|v| v.grad()) {
            Some(Some(grad)) => write_values(&grad.to_vec::<f64>(), out, len),
            Some(None) => NDA_NO_GRAD,
            None => NDA_INVALID_ARGUMENT,
        }
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}

// ============================================================================
// Mutation and detachment
// ============================================================================

/// Overwrite `dst` with `src` in place.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_copy_(
    dst: *mut nda_variable,
    src: *const nda_variable,
) -> StatusCode {
    if dst.is_null() || src.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        status_from(autograd::copy_((*dst).inner(), (*src).inner()).map(|_| ()))
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}

/// Replace the payload of `var` with that of `new_data`.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_set_data(
    var: *mut nda_variable,
    new_data: *const nda_variable,
) -> StatusCode {
    if var.is_null() || new_data.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        status_from(autograd::set_data((*var).inner(), (*new_data).inner()))
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}

/// New handle sharing storage with `var` but cut from the graph.
///
/// # Returns
/// Pointer to new handle, or null on error
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_detach(
    var: *const nda_variable,
    status: *mut StatusCode,
) -> *mut nda_variable {
    if status.is_null() {
        return ptr::null_mut();
    }

    if var.is_null() {
        unsafe {
            *status = NDA_INVALID_ARGUMENT;
        }
        return ptr::null_mut();
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        match autograd::detach((*var).inner()) {
            Ok(detached) => (into_raw(detached), NDA_SUCCESS),
            Err(e) => (ptr::null_mut(), status_of(&e)),
        }
    }));

    match result {
        Ok((ptr, code)) => {
            unsafe {
                *status = code;
            }
            ptr
        }
        Err(_) => {
            unsafe {
                *status = NDA_INTERNAL_ERROR;
            }
            ptr::null_mut()
        }
    }
}

/// Cut `var` from the graph in place.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_detach_(var: *mut nda_variable) -> StatusCode {
    if var.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        status_from(autograd::detach_((*var).inner()).map(|_| ()))
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}

// ============================================================================
// Backward
// ============================================================================

/// Run the backward pass from a one-element `var` with an implicit seed.
#[unsafe(no_mangle)]
pub extern "C" fn nda_variable_backward(var: *const nda_variable, keep_graph: c_int) -> StatusCode {
    if var.is_null() {
        return NDA_INVALID_ARGUMENT;
    }

    let result = catch_unwind(AssertUnwindSafe(|| unsafe {
        status_from(autograd::backward(
            (*var).inner(),
            &Tensor::Undefined,
            keep_graph != 0,
            false,
        ))
    }));

    result.unwrap_or(NDA_INTERNAL_ERROR)
}
