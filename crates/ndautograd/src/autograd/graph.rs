//! Computation graph arena for reverse-mode automatic differentiation.
//!
//! Graph nodes live in a process-wide arena of generation-tagged slots.
//! A [`NodeRef`] is a counted strong reference to a slot; when the last one
//! is dropped the node is removed and the slot's generation advances, so any
//! [`WeakNodeRef`] to it reports itself expired.

use crate::device::{Device, TypeProperties};
use crate::error::Result;
use crate::strides::DimVec;
use crate::tensor::RawTensor;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

/// Stable identifier of an arena slot occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}v{})", self.index, self.generation)
    }
}

/// Backward function of a graph node.
///
/// Receives one gradient per node input (`None` where no gradient flowed)
/// and returns one gradient per next edge.
pub trait GradFn: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>>;

    /// Drop saved payloads once the graph will not be replayed.
    fn release_variables(&self) {}
}

/// What a node knows about one of its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct InputMetadata {
    pub type_properties: TypeProperties,
    pub shape: DimVec,
    pub device: Device,
}

impl InputMetadata {
    pub fn of(t: &RawTensor) -> Self {
        Self {
            type_properties: t.type_properties(),
            shape: t.shape().iter().copied().collect(),
            device: t.device(),
        }
    }
}

/// Link from a node to input `input_nr` of `function`.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    pub function: Option<NodeRef>,
    pub input_nr: u32,
}

impl Edge {
    pub fn new(function: NodeRef, input_nr: u32) -> Self {
        Self {
            function: Some(function),
            input_nr,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.function.is_some()
    }
}

static NEXT_SEQUENCE_NR: AtomicU64 = AtomicU64::new(0);

/// A node in the computation graph.
#[derive(Debug)]
pub struct Node {
    function: Box<dyn GradFn>,
    next_edges: Vec<Edge>,
    input_metadata: Vec<InputMetadata>,
    sequence_nr: u64,
}

impl Node {
    pub fn new(
        function: Box<dyn GradFn>,
        next_edges: Vec<Edge>,
        input_metadata: Vec<InputMetadata>,
    ) -> Self {
        Self {
            function,
            next_edges,
            input_metadata,
            sequence_nr: NEXT_SEQUENCE_NR.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn name(&self) -> &'static str {
        self.function.name()
    }

    pub fn function(&self) -> &dyn GradFn {
        self.function.as_ref()
    }

    pub fn next_edges(&self) -> &[Edge] {
        &self.next_edges
    }

    pub fn input_metadata(&self, index: usize) -> Option<&InputMetadata> {
        self.input_metadata.get(index)
    }

    pub fn num_inputs(&self) -> usize {
        self.input_metadata.len()
    }

    /// Creation order; later nodes have larger numbers.
    pub fn sequence_nr(&self) -> u64 {
        self.sequence_nr
    }

    pub fn apply(&self, grads: Vec<Option<RawTensor>>) -> Result<Vec<Option<RawTensor>>> {
        self.function.apply(grads)
    }

    pub fn release_variables(&self) {
        self.function.release_variables();
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    strong: usize,
    node: Option<Arc<Node>>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    fn slot(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation && s.node.is_some())
    }
}

/// Reference-counted node arena.
#[derive(Debug, Default)]
pub struct ComputationGraph {
    arena: Mutex<Arena>,
}

impl ComputationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, node: Node) -> NodeId {
        let mut arena = self.arena.lock();
        arena.live += 1;
        let node = Some(Arc::new(node));
        if let Some(index) = arena.free.pop() {
            let slot = &mut arena.slots[index as usize];
            slot.strong = 1;
            slot.node = node;
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = arena.slots.len() as u32;
            arena.slots.push(Slot {
                generation: 0,
                strong: 1,
                node,
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    fn retain(&self, id: NodeId) {
        if let Some(slot) = self.arena.lock().slot(id) {
            slot.strong += 1;
        }
    }

    fn release(&self, id: NodeId) {
        let removed = {
            let mut arena = self.arena.lock();
            let Some(slot) = arena.slot(id) else {
                return;
            };
            slot.strong -= 1;
            if slot.strong > 0 {
                return;
            }
            let node = slot.node.take();
            slot.generation = slot.generation.wrapping_add(1);
            arena.free.push(id.index);
            arena.live -= 1;
            node
        };
        // Dropping the node releases its next edges, which re-enters the
        // arena; the lock must not be held here.
        if let Some(node) = removed {
            tracing::trace!(node = %id, name = node.name(), "released graph node");
            drop_deferred(node);
        }
    }

    fn upgrade(&self, id: NodeId) -> Option<NodeRef> {
        let mut arena = self.arena.lock();
        let slot = arena.slot(id)?;
        slot.strong += 1;
        Some(NodeRef { id })
    }

    /// The node behind `id`, if it is still alive.
    pub fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.arena.lock().slot(id).and_then(|s| s.node.clone())
    }

    fn strong_count(&self, id: NodeId) -> usize {
        self.arena.lock().slot(id).map_or(0, |s| s.strong)
    }

    /// Number of live nodes.
    pub fn live_nodes(&self) -> usize {
        self.arena.lock().live
    }
}

thread_local! {
    // `Some` while this thread is draining released nodes.
    static DEFERRED: RefCell<Option<Vec<Arc<Node>>>> = const { RefCell::new(None) };
}

/// Drop a released node without recursing through its next edges.
///
/// Nodes released while a drain is running on this thread are queued and
/// dropped by the outermost call, so freeing a chain of any length uses
/// constant stack.
fn drop_deferred(node: Arc<Node>) {
    let mut node = Some(node);
    let queued = DEFERRED
        .try_with(|slot| match slot.borrow_mut().as_mut() {
            Some(queue) => {
                queue.extend(node.take());
                true
            }
            None => false,
        })
        .unwrap_or(false);
    if queued {
        return;
    }

    let draining = DEFERRED
        .try_with(|slot| *slot.borrow_mut() = Some(Vec::new()))
        .is_ok();
    if !draining {
        // Thread-local storage is being torn down
        drop(node);
        return;
    }
    let _drain = DrainGuard;
    drop(node);
    while let Some(next) = DEFERRED
        .try_with(|slot| slot.borrow_mut().as_mut().and_then(Vec::pop))
        .ok()
        .flatten()
    {
        drop(next);
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let rest = DEFERRED.try_with(|slot| slot.borrow_mut().take()).ok().flatten();
        drop(rest);
    }
}

static GRAPH: LazyLock<ComputationGraph> = LazyLock::new(ComputationGraph::new);

/// The process-wide graph arena.
pub fn graph() -> &'static ComputationGraph {
    &GRAPH
}

/// Strong reference to a graph node.
#[derive(PartialEq, Eq, Hash)]
pub struct NodeRef {
    id: NodeId,
}

impl NodeRef {
    /// Move `node` into the arena.
    pub fn new(node: Node) -> Self {
        Self {
            id: graph().insert(node),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node itself. Present for as long as this reference exists.
    pub fn node(&self) -> Arc<Node> {
        graph()
            .get(self.id)
            .unwrap_or_else(|| unreachable!("strong reference to a released node {}", self.id))
    }

    pub fn name(&self) -> &'static str {
        self.node().name()
    }

    pub fn downgrade(&self) -> WeakNodeRef {
        WeakNodeRef { id: Some(self.id) }
    }

    /// Number of strong references to this node.
    pub fn strong_count(&self) -> usize {
        graph().strong_count(self.id)
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        self.id == other.id
    }
}

impl Clone for NodeRef {
    fn clone(&self) -> Self {
        graph().retain(self.id);
        Self { id: self.id }
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        graph().release(self.id);
    }
}

impl Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef").field("id", &self.id).finish()
    }
}

/// Non-owning reference to a graph node.
#[derive(Debug, Clone, Default)]
pub struct WeakNodeRef {
    id: Option<NodeId>,
}

impl WeakNodeRef {
    /// A reference that was never populated.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<NodeRef> {
        self.id.and_then(|id| graph().upgrade(id))
    }

    pub fn is_expired(&self) -> bool {
        self.id.is_none_or(|id| graph().get(id).is_none())
    }

    pub fn reset(&mut self) {
        self.id = None;
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }
}
