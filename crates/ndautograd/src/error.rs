//! Error types for ndautograd.

use crate::device::Layout;
use crate::scalar::ScalarType;
use std::fmt;
use thiserror::Error;

/// Errors raised by the numeric payload layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// Shape mismatch between data length and expected size.
    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Source cannot be broadcast to the destination shape.
    #[error("source of shape {src:?} cannot be broadcast to shape {dst:?}")]
    BroadcastMismatch { src: Vec<usize>, dst: Vec<usize> },

    /// Kernel called on a payload with a layout it does not support.
    #[error("operation `{op}` is not supported for {layout:?} layout")]
    UnsupportedLayout { op: &'static str, layout: Layout },

    /// Kernel called on a payload of a kind it does not support.
    #[error("operation `{op}` is not supported for scalar type {scalar_type}")]
    UnsupportedScalarType {
        op: &'static str,
        scalar_type: ScalarType,
    },

    /// View requested on a payload whose strides do not allow it.
    #[error("invalid view: {message}")]
    InvalidView { message: String },

    /// Shape/stride change on a payload that forbids it.
    #[error("`{op}` is not allowed on a tensor whose metadata changes are locked (created by detach or data)")]
    MetadataChangeNotAllowed { op: &'static str },

    /// Index out of bounds.
    #[error("index out of bounds: index {index} is out of range for dimension {dim_size}")]
    IndexOutOfBounds { index: usize, dim_size: usize },
}

/// Where an offending argument sits in an operation's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgLocation {
    /// Logical argument name.
    pub name: String,
    /// Argument position.
    pub pos: usize,
    /// Position within a sequence argument, if any.
    pub index: Option<usize>,
}

impl ArgLocation {
    pub fn new(name: &str, pos: usize) -> Self {
        Self {
            name: name.to_string(),
            pos,
            index: None,
        }
    }

    pub fn in_sequence(name: &str, pos: usize, index: usize) -> Self {
        Self {
            name: name.to_string(),
            pos,
            index: Some(index),
        }
    }
}

impl fmt::Display for ArgLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(
                f,
                "position #{} for iterable argument #{} '{}'",
                index, self.pos, self.name
            ),
            None => write!(f, "argument #{} '{}'", self.pos, self.name),
        }
    }
}

/// Errors raised by the autograd layer.
///
/// All of these are programming errors surfaced at the call site; none of
/// them leave partially applied state behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutogradError {
    /// A handle argument was undefined.
    #[error("expected a Tensor of type Variable but found an undefined Tensor for {location}")]
    UndefinedArgument { location: ArgLocation },

    /// A handle argument was defined but not a differentiable handle.
    #[error("expected object of type Variable but found type {found} for {location}")]
    WrongKind { location: ArgLocation, found: String },

    /// `set_data` across incompatible raw representations.
    #[error(
        "attempted to call `set_data`, but the variable ({target}, {target_location}) and the new data ({source_kind}, {source_location}) have incompatible tensor type"
    )]
    IncompatibleType {
        target: String,
        target_location: ArgLocation,
        source_kind: String,
        source_location: ArgLocation,
    },

    /// In-place mutation attempted on an ineligible handle.
    #[error("invalid in-place mutation: {0}")]
    InvalidMutation(String),

    /// Operation not allowed on this handle.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Error from the numeric kernels.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl AutogradError {
    /// Location of the offending argument, for positional failures.
    pub fn location(&self) -> Option<&ArgLocation> {
        match self {
            Self::UndefinedArgument { location } | Self::WrongKind { location, .. } => {
                Some(location)
            }
            Self::IncompatibleType {
                source_location, ..
            } => Some(source_location),
            _ => None,
        }
    }
}

pub type Result<T, E = AutogradError> = std::result::Result<T, E>;
