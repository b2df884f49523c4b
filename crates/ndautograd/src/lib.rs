//! ndautograd - differentiable handles over n-dimensional tensors
//!
//! This crate keeps the reverse-mode autograd bookkeeping of a tensor
//! handle consistent across in-place mutation, aliasing, data replacement
//! and graph detachment.
//!
//! # Architecture
//!
//! ```text
//! Level 1: Differentiable handles (autograd module)
//!     → Variable, copy_, set_data, detach, detach_, backward
//!
//! Level 2: Computation graph (autograd::graph)
//!     → global node arena, NodeRef / WeakNodeRef, GradFn
//!
//! Level 3: Numeric payloads and kernels (tensor, operations modules)
//!     → RawTensor, copy_, resize_, add, mul, sum_to
//! ```
//!
//! # Example
//!
//! ```
//! use ndautograd::{RawTensor, ScalarType, Tensor, Variable};
//! use ndautograd::autograd::{detach, detach_, copy_};
//!
//! let x = Variable::new(RawTensor::ones(&[2, 2], ScalarType::F64), true).unwrap();
//! let y = Variable::new(RawTensor::zeros(&[2, 2], ScalarType::F64), false).unwrap();
//!
//! // y now depends on x
//! copy_(&Tensor::from(y.clone()), &Tensor::from(x.clone())).unwrap();
//! assert!(!y.is_leaf());
//!
//! // A detached alias shares storage but not history
//! let d = detach(&Tensor::from(y.clone())).unwrap();
//! assert!(d.as_variable().unwrap().is_leaf());
//!
//! // Or cut the history in place
//! detach_(&Tensor::from(y.clone())).unwrap();
//! assert!(y.is_leaf());
//! ```

pub mod autograd;
pub mod device;
pub mod error;
pub mod logging;
pub mod mode;
pub mod operations;
pub mod scalar;
pub mod storage;
pub mod strides;
pub mod tensor;

pub use autograd::{Tensor, Variable};
pub use device::{Backend, Device, Layout, TypeProperties, all_cpu_types, all_cuda_types};
pub use error::{ArgLocation, AutogradError, TensorError};
pub use mode::{GradMode, NoGradGuard, NonVariableTypeGuard};
pub use scalar::{Element, ScalarType};
pub use tensor::RawTensor;
