//! Reverse-mode automatic differentiation over [`RawTensor`](crate::RawTensor) payloads.
//!
//! Every differentiable value is a [`Variable`]: a payload plus the
//! metadata needed to replay the computation backward (producing node,
//! leaf gradient accumulator, version counter, view linkage).
//!
//! # Architecture
//!
//! ```text
//! Tensor ──unpack──► Variable ──grad_fn──► NodeRef ──► ComputationGraph (global arena)
//!                       │                                  │
//!                       │ weak                             ▼
//!                       └─────────► AccumulateGrad    Node { GradFn, next_edges }
//!                                                          │
//!                                                     SavedVariable (version checked)
//! ```
//!
//! Mutating operations ([`copy_`], [`resize_`], [`set_data`], [`detach_`])
//! keep this metadata consistent: the version counter advances once per
//! in-place write and is shared by every view of the payload, stale
//! accumulators are dropped when the payload changes device or type, and
//! detached handles start a fresh version lineage.
//!
//! # Example
//!
//! ```
//! use ndautograd::{RawTensor, ScalarType, Tensor, Variable};
//! use ndautograd::autograd::{backward, copy_, sum};
//!
//! let w = Variable::new(RawTensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap(), true).unwrap();
//! let buf = Variable::new(RawTensor::zeros(&[2], ScalarType::F64), false).unwrap();
//!
//! copy_(&Tensor::from(buf.clone()), &Tensor::from(w.clone())).unwrap();
//! assert_eq!(buf.version(), 1);
//!
//! let loss = sum(&Tensor::from(buf)).unwrap();
//! backward(&loss, &Tensor::Undefined, false, false).unwrap();
//! assert_eq!(w.grad().unwrap().to_vec::<f64>(), vec![1.0, 1.0]);
//! ```

mod backward;
mod detach;
mod engine;
pub mod functions;
pub mod graph;
mod mutation;
mod ops;
mod saved_variable;
mod set_data;
mod trace;
mod validate;
mod variable;

pub use backward::{backward, backward_with_engine};
pub use detach::{detach, detach_};
pub use engine::{Engine, GraphTaskEngine, default_engine};
pub use graph::{ComputationGraph, Edge, GradFn, InputMetadata, Node, NodeId, NodeRef, WeakNodeRef, graph};
pub use mutation::{copy_, resize_, resize_as_};
pub use ops::{add, data, is_leaf, mul, narrow, output_nr, sum, version, view};
pub use saved_variable::SavedVariable;
pub use set_data::set_data;
pub use trace::{TraceObserver, clear_trace_observer, is_tracing, set_trace_observer};
pub use validate::{check_inplace, unpack, unpack_list, unpack_opt};
pub use variable::{Tensor, Variable, VersionCounter, make_variable_view};
