//! Differentiable handles and their autograd metadata.

use super::functions::AccumulateGrad;
use super::graph::{Edge, InputMetadata, Node, NodeRef, WeakNodeRef};
use crate::device::Device;
use crate::error::{AutogradError, Result};
use crate::operations;
use crate::scalar::ScalarType;
use crate::tensor::RawTensor;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Mutation counter shared by every alias of one payload.
///
/// Cloning yields another reference to the same counter.
#[derive(Debug, Clone, Default)]
pub struct VersionCounter {
    version: Arc<AtomicU32>,
}

impl VersionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Advance by one and return the new value.
    pub fn bump(&self) -> u32 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether both counters are the same shared counter.
    pub fn ptr_eq(&self, other: &VersionCounter) -> bool {
        Arc::ptr_eq(&self.version, &other.version)
    }
}

/// Fields guarded by the metadata mutex.
#[derive(Debug, Default)]
struct AutogradState {
    grad_fn: Option<NodeRef>,
    output_nr: u32,
    grad_accumulator: WeakNodeRef,
    requires_grad: bool,
    grad: Option<RawTensor>,
}

#[derive(Debug)]
struct AutogradMeta {
    state: Mutex<AutogradState>,
    version_counter: VersionCounter,
    /// Set for differentiable views only.
    base: Option<Variable>,
}

#[derive(Debug)]
struct VariableImpl {
    data: RwLock<RawTensor>,
    meta: AutogradMeta,
}

/// A differentiable handle: a payload plus its autograd metadata.
///
/// `Variable` is a shared handle; cloning yields another reference to the
/// same handle, and in-place operations through any clone are visible to
/// all of them.
///
/// Lock order is metadata before payload.
#[derive(Clone)]
pub struct Variable {
    inner: Arc<VariableImpl>,
}

impl Variable {
    fn from_parts(
        data: RawTensor,
        state: AutogradState,
        version_counter: VersionCounter,
        base: Option<Variable>,
    ) -> Self {
        Self {
            inner: Arc::new(VariableImpl {
                data: RwLock::new(data),
                meta: AutogradMeta {
                    state: Mutex::new(state),
                    version_counter,
                    base,
                },
            }),
        }
    }

    /// Admit a payload as a leaf handle.
    ///
    /// # Errors
    ///
    /// Returns `AutogradError::InvalidOperation` if `requires_grad` is set
    /// for a non floating-point payload.
    ///
    /// # Example
    ///
    /// ```
    /// use ndautograd::{RawTensor, Variable};
    ///
    /// let x = Variable::new(RawTensor::ones(&[2], ndautograd::ScalarType::F64), true).unwrap();
    /// assert!(x.is_leaf());
    /// assert!(x.requires_grad());
    /// assert_eq!(x.version(), 0);
    /// ```
    pub fn new(data: RawTensor, requires_grad: bool) -> Result<Self> {
        let var = Self::from_parts(data, AutogradState::default(), VersionCounter::new(), None);
        if requires_grad {
            var.set_requires_grad(true)?;
        }
        Ok(var)
    }

    /// Handle for an operation output produced by `edge`'s function.
    pub(crate) fn with_edge(data: RawTensor, edge: Edge) -> Self {
        let state = AutogradState {
            output_nr: edge.input_nr,
            grad_fn: edge.function,
            ..AutogradState::default()
        };
        Self::from_parts(data, state, VersionCounter::new(), None)
    }

    /// Shallow clone of the payload.
    pub fn tensor(&self) -> RawTensor {
        self.inner.data.read().clone()
    }

    pub(crate) fn data_read(&self) -> RwLockReadGuard<'_, RawTensor> {
        self.inner.data.read()
    }

    pub(crate) fn data_write(&self) -> RwLockWriteGuard<'_, RawTensor> {
        self.inner.data.write()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.inner.data.read().shape().to_vec()
    }

    pub fn numel(&self) -> usize {
        self.inner.data.read().numel()
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.inner.data.read().scalar_type()
    }

    pub fn device(&self) -> Device {
        self.inner.data.read().device()
    }

    /// Elements cast to `T`, in column-major order.
    pub fn to_vec<T: crate::scalar::Element>(&self) -> Vec<T> {
        self.inner.data.read().to_vec()
    }

    pub fn requires_grad(&self) -> bool {
        let state = self.inner.meta.state.lock();
        state.requires_grad || state.grad_fn.is_some()
    }

    /// Change whether a leaf collects gradients.
    ///
    /// # Errors
    ///
    /// Returns `AutogradError::InvalidOperation` when turning the flag off
    /// on a non-leaf, or on for a non floating-point payload.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<()> {
        if requires_grad && !self.scalar_type().is_floating_point() {
            return Err(AutogradError::InvalidOperation(
                "only Tensors of floating point dtype can require gradients".into(),
            ));
        }
        let mut state = self.inner.meta.state.lock();
        if !requires_grad && state.grad_fn.is_some() {
            return Err(AutogradError::InvalidOperation(
                "you can only change requires_grad flags of leaf variables; use detach() for a non-differentiable copy".into(),
            ));
        }
        state.requires_grad = requires_grad;
        Ok(())
    }

    /// The node that produced this handle, `None` for leaves.
    pub fn grad_fn(&self) -> Option<NodeRef> {
        self.inner.meta.state.lock().grad_fn.clone()
    }

    pub fn is_leaf(&self) -> bool {
        self.inner.meta.state.lock().grad_fn.is_none()
    }

    /// Output slot of `grad_fn` this handle corresponds to.
    pub fn output_nr(&self) -> u32 {
        self.inner.meta.state.lock().output_nr
    }

    pub fn version(&self) -> u32 {
        self.inner.meta.version_counter.current()
    }

    pub fn version_counter(&self) -> &VersionCounter {
        &self.inner.meta.version_counter
    }

    /// Accumulated gradient of a leaf.
    pub fn grad(&self) -> Option<RawTensor> {
        self.inner.meta.state.lock().grad.clone()
    }

    /// Drop the accumulated gradient.
    pub fn clear_grad(&self) {
        let old = self.inner.meta.state.lock().grad.take();
        drop(old);
    }

    /// Add `incoming` into the accumulated gradient.
    pub(crate) fn accumulate_grad(&self, incoming: RawTensor) -> Result<()> {
        let (shape, scalar_type) = {
            let data = self.inner.data.read();
            (data.shape().to_vec(), data.scalar_type())
        };
        let mut incoming = incoming;
        if incoming.shape() != shape.as_slice() {
            incoming = operations::sum_to(&incoming, &shape)?;
        }
        if incoming.scalar_type() != scalar_type {
            incoming = operations::cast(&incoming, scalar_type)?;
        }

        let mut state = self.inner.meta.state.lock();
        let updated = match state.grad.take() {
            None => incoming.deep_clone(),
            Some(existing) => operations::add(&existing, &incoming)?,
        };
        state.grad = Some(updated);
        Ok(())
    }

    /// The leaf's gradient accumulator, created on first use.
    ///
    /// Returns `None` when the handle does not require grad.
    ///
    /// # Errors
    ///
    /// Returns `AutogradError::InvalidOperation` for non-leaf handles.
    pub fn grad_accumulator(&self) -> Result<Option<NodeRef>> {
        let mut state = self.inner.meta.state.lock();
        if state.grad_fn.is_some() {
            return Err(AutogradError::InvalidOperation(
                "grad_accumulator() should be only called on leaf Variables".into(),
            ));
        }
        Ok(self.accumulator_locked(&mut state))
    }

    fn accumulator_locked(&self, state: &mut AutogradState) -> Option<NodeRef> {
        if !state.requires_grad {
            return None;
        }
        if let Some(existing) = state.grad_accumulator.upgrade() {
            return Some(existing);
        }
        let metadata = InputMetadata::of(&self.inner.data.read());
        let node = NodeRef::new(Node::new(
            Box::new(AccumulateGrad::new(self.clone())),
            Vec::new(),
            vec![metadata],
        ));
        tracing::debug!(node = %node.id(), "created gradient accumulator");
        state.grad_accumulator = node.downgrade();
        Some(node)
    }

    /// Weak reference to the current accumulator, without creating one.
    pub fn cached_grad_accumulator(&self) -> WeakNodeRef {
        self.inner.meta.state.lock().grad_accumulator.clone()
    }

    /// Edge along which gradients for this handle flow.
    ///
    /// Non-leaves point at their producer; leaves requiring grad at their
    /// accumulator. Otherwise the edge is invalid.
    pub fn gradient_edge(&self) -> Edge {
        let mut state = self.inner.meta.state.lock();
        match &state.grad_fn {
            Some(grad_fn) => Edge::new(grad_fn.clone(), state.output_nr),
            None => match self.accumulator_locked(&mut state) {
                Some(acc) => Edge::new(acc, 0),
                None => Edge::default(),
            },
        }
    }

    /// Record an in-place write: advance the version and, when given, make
    /// `grad_fn` the sole producer, under one metadata lock.
    pub(crate) fn commit_inplace(&self, grad_fn: Option<NodeRef>) {
        let old = {
            let mut state = self.inner.meta.state.lock();
            self.inner.meta.version_counter.bump();
            match grad_fn {
                Some(grad_fn) => {
                    state.output_nr = 0;
                    state.grad_fn.replace(grad_fn)
                }
                None => None,
            }
        };
        drop(old);
    }

    /// Record an in-place write through this view: the base gets
    /// `base_fn` and the view `view_fn` as producers, together with the
    /// version bump.
    ///
    /// The base's metadata is locked before the view's.
    pub(crate) fn commit_inplace_on_view(&self, base_fn: NodeRef, view_fn: NodeRef) {
        let Some(base) = self.base() else {
            self.commit_inplace(Some(view_fn));
            return;
        };
        let (old_base, old_view) = {
            let mut base_state = base.inner.meta.state.lock();
            let mut state = self.inner.meta.state.lock();
            self.inner.meta.version_counter.bump();
            base_state.output_nr = 0;
            state.output_nr = 0;
            (
                base_state.grad_fn.replace(base_fn),
                state.grad_fn.replace(view_fn),
            )
        };
        drop(old_base);
        drop(old_view);
    }

    /// Remove all graph linkage, leaving a leaf that does not require grad.
    pub(crate) fn clear_history(&self) {
        let old = {
            let mut state = self.inner.meta.state.lock();
            state.requires_grad = false;
            state.output_nr = 0;
            state.grad_fn.take()
        };
        drop(old);
    }

    /// Replace the payload, keeping identity, history and version.
    ///
    /// The accumulator is reset when `new_data` moves to another device or
    /// changes type properties.
    pub(crate) fn replace_data(&self, new_data: &RawTensor) {
        let mut state = self.inner.meta.state.lock();
        let prior = state.grad_accumulator.upgrade();
        if let Some(prior) = &prior {
            let stale = prior.node().input_metadata(0).is_none_or(|meta| {
                meta.device != new_data.device()
                    || meta.type_properties != new_data.type_properties()
            });
            if stale {
                tracing::debug!(node = %prior.id(), "reset gradient accumulator after data swap");
                state.grad_accumulator.reset();
            }
        }
        self.inner.data.write().shallow_copy_from(new_data);
        drop(state);
        drop(prior);
    }

    /// Whether this handle is a differentiable view of another handle.
    pub fn is_view(&self) -> bool {
        self.inner.meta.base.is_some()
    }

    /// The handle this view aliases.
    pub fn base(&self) -> Option<&Variable> {
        self.inner.meta.base.as_ref()
    }

    pub fn shares_storage_with(&self, other: &Variable) -> bool {
        self.inner
            .data
            .read()
            .shares_storage_with(&other.inner.data.read())
    }

    /// Whether both are references to the same handle.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.meta.state.lock();
        let data = self.inner.data.read();
        f.debug_struct("Variable")
            .field("shape", &data.shape())
            .field("scalar_type", &data.scalar_type())
            .field("device", &data.device())
            .field("requires_grad", &(state.requires_grad || state.grad_fn.is_some()))
            .field("grad_fn", &state.grad_fn.as_ref().map(|n| n.id()))
            .field("version", &self.inner.meta.version_counter.current())
            .field("is_view", &self.inner.meta.base.is_some())
            .finish()
    }
}

/// Create a handle aliasing `base`'s payload.
///
/// A differentiable view shares `base`'s version counter and records the
/// root base; its history comes from `edge`. A non-differentiable view is
/// a fresh leaf that does not require grad, with its own version counter.
pub fn make_variable_view(
    base: &Variable,
    data: RawTensor,
    is_differentiable: bool,
    allow_metadata_change: bool,
    edge: Option<Edge>,
) -> Variable {
    let mut data = data;
    data.set_allow_metadata_change(allow_metadata_change);
    if !is_differentiable {
        return Variable::from_parts(data, AutogradState::default(), VersionCounter::new(), None);
    }
    let root = base.base().cloned().unwrap_or_else(|| base.clone());
    let state = match edge {
        Some(edge) => AutogradState {
            output_nr: edge.input_nr,
            grad_fn: edge.function,
            ..AutogradState::default()
        },
        None => AutogradState::default(),
    };
    Variable::from_parts(data, state, root.version_counter().clone(), Some(root))
}

/// An operation argument.
///
/// Operations accept any `Tensor` and validate that the arguments they
/// differentiate through are defined differentiable handles.
#[derive(Debug, Clone, Default)]
pub enum Tensor {
    #[default]
    Undefined,
    /// A raw payload that is not part of the differentiable system.
    Plain(RawTensor),
    Variable(Variable),
}

impl Tensor {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Tensor::Undefined)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Tensor::Variable(_))
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Tensor::Variable(var) => Some(var),
            _ => None,
        }
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Tensor::Undefined => "UndefinedType".to_string(),
            Tensor::Plain(raw) => raw.type_properties().to_string(),
            Tensor::Variable(var) => format!("Variable[{}]", var.data_read().type_properties()),
        }
    }
}

impl From<Variable> for Tensor {
    fn from(var: Variable) -> Self {
        Tensor::Variable(var)
    }
}

impl From<RawTensor> for Tensor {
    fn from(raw: RawTensor) -> Self {
        Tensor::Plain(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(requires_grad: bool) -> Variable {
        Variable::new(RawTensor::ones(&[2], ScalarType::F64), requires_grad).unwrap()
    }

    #[test]
    fn test_version_counter_shared() {
        let a = VersionCounter::new();
        let b = a.clone();
        assert_eq!(a.bump(), 1);
        assert_eq!(b.current(), 1);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&VersionCounter::new()));
    }

    #[test]
    fn test_integral_leaf_cannot_require_grad() {
        let raw = RawTensor::zeros(&[2], ScalarType::I64);
        assert!(matches!(
            Variable::new(raw, true),
            Err(AutogradError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_grad_accumulator_is_cached() {
        let x = leaf(true);
        let acc = x.grad_accumulator().unwrap().unwrap();
        let again = x.grad_accumulator().unwrap().unwrap();
        assert!(acc.ptr_eq(&again));
        assert_eq!(acc.name(), "AccumulateGrad");

        drop(acc);
        drop(again);
        assert!(x.cached_grad_accumulator().is_expired());
    }

    #[test]
    fn test_grad_accumulator_absent_without_requires_grad() {
        let x = leaf(false);
        assert!(x.grad_accumulator().unwrap().is_none());
        assert!(!x.gradient_edge().is_valid());
    }

    #[test]
    fn test_commit_inplace_makes_non_leaf() {
        let x = leaf(false);
        let node = NodeRef::new(Node::new(
            Box::new(super::super::functions::Error::new("test")),
            vec![],
            vec![InputMetadata::of(&x.tensor())],
        ));
        x.commit_inplace(Some(node.clone()));
        assert_eq!(x.version(), 1);
        assert!(!x.is_leaf());
        assert!(x.requires_grad());
        assert_eq!(x.output_nr(), 0);
        assert!(x.grad_fn().unwrap().ptr_eq(&node));
        assert!(matches!(
            x.grad_accumulator(),
            Err(AutogradError::InvalidOperation(_))
        ));
        assert!(matches!(
            x.set_requires_grad(false),
            Err(AutogradError::InvalidOperation(_))
        ));

        x.clear_history();
        assert!(x.is_leaf());
        assert!(!x.requires_grad());
    }

    fn error_node(x: &Variable) -> NodeRef {
        NodeRef::new(Node::new(
            Box::new(super::super::functions::Error::new("test")),
            vec![],
            vec![InputMetadata::of(&x.tensor())],
        ))
    }

    #[test]
    fn test_commit_inplace_without_node_keeps_history() {
        let x = leaf(false);
        x.commit_inplace(None);
        assert_eq!(x.version(), 1);
        assert!(x.is_leaf());
        assert!(!x.requires_grad());
    }

    #[test]
    fn test_commit_inplace_on_view_rebases_both() {
        let base = leaf(false);
        let raw = base.tensor().as_strided(&[1], &[1], 1).unwrap();
        let view = make_variable_view(&base, raw, true, true, None);
        let base_fn = error_node(&base);
        let view_fn = error_node(&view);

        view.commit_inplace_on_view(base_fn.clone(), view_fn.clone());
        assert_eq!(base.version(), 1);
        assert_eq!(view.version(), 1);
        assert!(base.grad_fn().unwrap().ptr_eq(&base_fn));
        assert!(view.grad_fn().unwrap().ptr_eq(&view_fn));
    }

    #[test]
    fn test_differentiable_view_shares_counter() {
        let base = leaf(false);
        let raw = base.tensor().as_strided(&[1], &[1], 1).unwrap();
        let view = make_variable_view(&base, raw, true, true, None);
        assert!(view.is_view());
        assert!(view.base().unwrap().ptr_eq(&base));
        assert!(view.version_counter().ptr_eq(base.version_counter()));

        let nested_raw = view.tensor();
        let nested = make_variable_view(&view, nested_raw, true, true, None);
        assert!(nested.base().unwrap().ptr_eq(&base));
    }

    #[test]
    fn test_non_differentiable_view() {
        let base = leaf(true);
        let alias = make_variable_view(&base, base.tensor(), false, false, None);
        assert!(!alias.is_view());
        assert!(!alias.requires_grad());
        assert!(alias.shares_storage_with(&base));
        assert!(!alias.version_counter().ptr_eq(base.version_counter()));
        assert!(!alias.tensor().allow_metadata_change());
    }

    #[test]
    fn test_accumulate_grad_sums() {
        let x = leaf(true);
        x.accumulate_grad(RawTensor::ones(&[2], ScalarType::F64)).unwrap();
        x.accumulate_grad(RawTensor::full(&[2], 2.0, ScalarType::F64))
            .unwrap();
        assert_eq!(x.grad().unwrap().to_vec::<f64>(), vec![3.0, 3.0]);
        x.clear_grad();
        assert!(x.grad().is_none());
    }

    #[test]
    fn test_tensor_kinds() {
        assert!(!Tensor::default().is_defined());
        let plain = Tensor::from(RawTensor::zeros(&[1], ScalarType::F32));
        assert_eq!(plain.type_name(), "CPUFloatType");
        assert!(plain.as_variable().is_none());
        let var = Tensor::from(leaf(false));
        assert!(var.is_variable());
        assert_eq!(var.type_name(), "Variable[CPUDoubleType]");
    }
}
