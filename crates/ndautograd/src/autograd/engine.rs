//! Backward-pass execution.
//!
//! The [`Engine`] trait is the seam between the handle bookkeeping and the
//! traversal; [`GraphTaskEngine`] is the engine used by default.

use super::graph::{Edge, Node, NodeId, NodeRef};
use crate::error::{AutogradError, Result};
use crate::mode::GradModeGuard;
use crate::operations;
use crate::tensor::RawTensor;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Executes a backward pass.
pub trait Engine: Send + Sync {
    /// Propagate `grads[i]` into `roots[i]` and onward through the graph.
    ///
    /// With `keep_graph` false, executed nodes release their saved
    /// payloads. With `create_graph` true, grad mode stays enabled while
    /// backward functions run.
    fn execute(
        &self,
        roots: Vec<Edge>,
        grads: Vec<RawTensor>,
        keep_graph: bool,
        create_graph: bool,
    ) -> Result<()>;
}

/// Per-node input buffer; gradients arriving at the same input are summed.
#[derive(Debug, Default)]
struct InputBuffer {
    slots: Vec<Option<RawTensor>>,
}

impl InputBuffer {
    fn add(&mut self, input_nr: usize, grad: RawTensor) -> Result<()> {
        if self.slots.len() <= input_nr {
            self.slots.resize(input_nr + 1, None);
        }
        let slot = &mut self.slots[input_nr];
        *slot = Some(match slot.take() {
            None => grad,
            Some(existing) => operations::add(&existing, &grad)?,
        });
        Ok(())
    }
}

/// Default engine: single-threaded, topologically ordered execution of the
/// subgraph reachable from the roots.
#[derive(Debug, Default)]
pub struct GraphTaskEngine;

impl GraphTaskEngine {
    pub fn new() -> Self {
        Self
    }

    /// Every node reachable from `roots`, keyed by id.
    fn discover(roots: &[Edge]) -> HashMap<NodeId, (NodeRef, Arc<Node>)> {
        let mut seen: HashMap<NodeId, (NodeRef, Arc<Node>)> = HashMap::new();
        let mut stack: Vec<NodeRef> = roots.iter().filter_map(|e| e.function.clone()).collect();
        while let Some(node_ref) = stack.pop() {
            if seen.contains_key(&node_ref.id()) {
                continue;
            }
            let node = node_ref.node();
            stack.extend(
                node.next_edges()
                    .iter()
                    .filter_map(|edge| edge.function.clone())
                    .filter(|next| !seen.contains_key(&next.id())),
            );
            seen.insert(node_ref.id(), (node_ref, node));
        }
        seen
    }

    fn order(nodes: &HashMap<NodeId, (NodeRef, Arc<Node>)>) -> Result<Vec<NodeId>> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        // Sorted insertion keeps execution order deterministic
        let mut ids: Vec<NodeId> = nodes.keys().copied().collect();
        ids.sort_by_key(|id| std::cmp::Reverse(nodes[id].1.sequence_nr()));
        for id in ids {
            index.insert(id, graph.add_node(id));
        }
        for (id, (_, node)) in nodes {
            for edge in node.next_edges() {
                if let Some(next) = &edge.function {
                    graph.add_edge(index[id], index[&next.id()], ());
                }
            }
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            AutogradError::InvalidOperation(format!(
                "computation graph contains a cycle through {}",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted.into_iter().map(|i| graph[i]).collect())
    }
}

impl Engine for GraphTaskEngine {
    fn execute(
        &self,
        roots: Vec<Edge>,
        grads: Vec<RawTensor>,
        keep_graph: bool,
        create_graph: bool,
    ) -> Result<()> {
        if roots.len() != grads.len() {
            return Err(AutogradError::InvalidOperation(format!(
                "got {} roots but {} gradients",
                roots.len(),
                grads.len()
            )));
        }
        let _span = tracing::debug_span!("backward", roots = roots.len(), keep_graph).entered();
        let _mode = GradModeGuard::new(create_graph);

        let nodes = Self::discover(&roots);
        let order = Self::order(&nodes)?;
        let mut buffers: HashMap<NodeId, InputBuffer> = HashMap::new();
        for (root, grad) in roots.iter().zip(grads) {
            if let Some(function) = &root.function {
                buffers
                    .entry(function.id())
                    .or_default()
                    .add(root.input_nr as usize, grad)?;
            }
        }

        for id in order {
            let (_, node) = &nodes[&id];
            let Some(buffer) = buffers.remove(&id) else {
                continue;
            };
            tracing::trace!(node = %id, name = node.name(), "apply");
            let outputs = node.apply(buffer.slots)?;
            if !keep_graph {
                node.release_variables();
            }
            for (edge, grad) in node.next_edges().iter().zip(outputs) {
                if let (Some(next), Some(grad)) = (&edge.function, grad) {
                    buffers
                        .entry(next.id())
                        .or_default()
                        .add(edge.input_nr as usize, grad)?;
                }
            }
        }
        Ok(())
    }
}

static DEFAULT_ENGINE: LazyLock<GraphTaskEngine> = LazyLock::new(GraphTaskEngine::new);

/// The engine used by [`backward`](super::backward).
pub fn default_engine() -> &'static dyn Engine {
    &*DEFAULT_ENGINE
}
