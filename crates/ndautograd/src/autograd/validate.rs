//! Argument validation for differentiable operations.

use super::variable::{Tensor, Variable};
use crate::error::{ArgLocation, AutogradError, Result};
use crate::mode::GradMode;

/// The differentiable handle behind argument `name` at position `pos`.
///
/// # Errors
///
/// Returns `AutogradError::UndefinedArgument` for an undefined argument and
/// `AutogradError::WrongKind` for a raw payload.
pub fn unpack<'a>(t: &'a Tensor, name: &str, pos: usize) -> Result<&'a Variable> {
    match t {
        Tensor::Variable(var) => Ok(var),
        Tensor::Undefined => Err(AutogradError::UndefinedArgument {
            location: ArgLocation::new(name, pos),
        }),
        Tensor::Plain(_) => Err(AutogradError::WrongKind {
            location: ArgLocation::new(name, pos),
            found: t.type_name(),
        }),
    }
}

/// Like [`unpack`], but an undefined argument yields `None`.
pub fn unpack_opt<'a>(t: &'a Tensor, name: &str, pos: usize) -> Result<Option<&'a Variable>> {
    if !t.is_defined() {
        return Ok(None);
    }
    unpack(t, name, pos).map(Some)
}

/// Validate every element of a sequence argument.
///
/// Undefined elements map to `None`; a raw payload at index `i` fails with
/// `AutogradError::WrongKind` naming both `i` and the argument position.
///
/// # Example
///
/// ```
/// use ndautograd::{AutogradError, RawTensor, ScalarType, Tensor};
/// use ndautograd::autograd::unpack_list;
///
/// let raw = RawTensor::zeros(&[1], ScalarType::F64);
/// let err = unpack_list(&[Tensor::Undefined, Tensor::Plain(raw)], "tensors", 2).unwrap_err();
/// let location = err.location().unwrap();
/// assert_eq!((location.pos, location.index), (2, Some(1)));
/// ```
pub fn unpack_list(tensors: &[Tensor], name: &str, pos: usize) -> Result<Vec<Option<Variable>>> {
    tensors
        .iter()
        .enumerate()
        .map(|(i, t)| match t {
            Tensor::Undefined => Ok(None),
            Tensor::Variable(var) => Ok(Some(var.clone())),
            Tensor::Plain(_) => Err(AutogradError::WrongKind {
                location: ArgLocation::in_sequence(name, pos, i),
                found: t.type_name(),
            }),
        })
        .collect()
}

/// Reject in-place mutation of handles whose values the graph relies on.
///
/// Only applies while grad mode is enabled. `name` and `pos` locate `var`
/// in the calling operation's arguments.
pub fn check_inplace(var: &Variable, name: &str, pos: usize) -> Result<()> {
    if !GradMode::is_enabled() {
        return Ok(());
    }
    let location = ArgLocation::new(name, pos);
    if var.requires_grad() && var.is_leaf() {
        return Err(AutogradError::InvalidMutation(format!(
            "a leaf Variable that requires grad ({location}) has been used in an in-place operation"
        )));
    }
    match var.base() {
        Some(base) if base.requires_grad() && base.is_leaf() => {
            Err(AutogradError::InvalidMutation(format!(
                "a view of a leaf Variable that requires grad ({location}) is being used in an in-place operation"
            )))
        }
        _ => Ok(()),
    }
}
