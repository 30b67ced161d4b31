//! Backward graph nodes.
//!
//! The core only builds and wires nodes; executing them is the job of a
//! graph engine that lives outside this crate. A [`Node`] therefore
//! exposes its wiring (next edges, input metadata, pre-hooks) but no
//! `apply`.

use super::edge::Edge;
use crate::error::AutogradError;
use crate::tensor::{DType, Device, Tensor};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SEQUENCE_NR: AtomicU64 = AtomicU64::new(0);

/// Type, shape and device of one gradient a node expects to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMetadata {
    dtype: DType,
    shape: SmallVec<[usize; 8]>,
    device: Device,
}

impl InputMetadata {
    /// Create input metadata.
    pub fn new(dtype: DType, shape: &[usize], device: Device) -> Self {
        Self {
            dtype,
            shape: shape.iter().copied().collect(),
            device,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Hook run on the incoming gradients of a node before it executes.
pub trait FunctionPreHook: Send + Sync {
    /// Transform the gradients flowing into the node.
    fn call(&self, values: Vec<Tensor>) -> Result<Vec<Tensor>, AutogradError>;
}

#[derive(Default)]
struct NodeState {
    next_edges: Vec<Edge>,
    pre_hooks: Vec<Arc<dyn FunctionPreHook>>,
    input_metadata: Vec<InputMetadata>,
}

/// Wiring shared by every node implementation.
///
/// Nodes are shared through `Arc<dyn Node>`, so all mutable wiring sits
/// behind a lock owned by the node itself.
pub struct NodeCore {
    sequence_nr: u64,
    state: Mutex<NodeState>,
}

impl NodeCore {
    /// Create an unwired core with the next global sequence number.
    pub fn new() -> Self {
        Self {
            sequence_nr: NEXT_SEQUENCE_NR.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn sequence_nr(&self) -> u64 {
        self.sequence_nr
    }

    pub fn num_inputs(&self) -> usize {
        self.state.lock().input_metadata.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.state.lock().next_edges.len()
    }

    pub fn next_edges(&self) -> Vec<Edge> {
        self.state.lock().next_edges.clone()
    }

    pub fn next_edge(&self, index: usize) -> Option<Edge> {
        self.state.lock().next_edges.get(index).cloned()
    }

    pub fn set_next_edges(&self, edges: Vec<Edge>) {
        self.state.lock().next_edges = edges;
    }

    pub fn add_next_edge(&self, edge: Edge) {
        self.state.lock().next_edges.push(edge);
    }

    pub fn add_pre_hook(&self, hook: Arc<dyn FunctionPreHook>) {
        self.state.lock().pre_hooks.push(hook);
    }

    pub fn pre_hooks(&self) -> Vec<Arc<dyn FunctionPreHook>> {
        self.state.lock().pre_hooks.clone()
    }

    /// Append input metadata and return its input slot.
    pub fn add_input_metadata(&self, dtype: DType, shape: &[usize], device: Device) -> usize {
        let mut state = self.state.lock();
        state
            .input_metadata
            .push(InputMetadata::new(dtype, shape, device));
        state.input_metadata.len() - 1
    }

    pub fn input_metadata(&self, index: usize) -> Option<InputMetadata> {
        self.state.lock().input_metadata.get(index).cloned()
    }
}

impl Default for NodeCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NodeCore")
            .field("sequence_nr", &self.sequence_nr)
            .field("num_inputs", &state.input_metadata.len())
            .field("num_next_edges", &state.next_edges.len())
            .field("num_pre_hooks", &state.pre_hooks.len())
            .finish()
    }
}

/// A unit of the backward computation graph.
///
/// Implementors only provide [`Node::name`], [`Node::core`] and
/// [`Node::as_any`]; the wiring methods delegate to the [`NodeCore`].
pub trait Node: Send + Sync + Debug {
    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;

    /// Shared wiring of this node.
    fn core(&self) -> &NodeCore;

    /// Downcasting support for inspecting concrete nodes.
    fn as_any(&self) -> &dyn Any;

    fn sequence_nr(&self) -> u64 {
        self.core().sequence_nr()
    }

    /// Number of gradients this node receives.
    fn num_inputs(&self) -> usize {
        self.core().num_inputs()
    }

    /// Number of gradients this node produces.
    fn num_outputs(&self) -> usize {
        self.core().num_outputs()
    }

    fn next_edges(&self) -> Vec<Edge> {
        self.core().next_edges()
    }

    fn next_edge(&self, index: usize) -> Option<Edge> {
        self.core().next_edge(index)
    }

    fn set_next_edges(&self, edges: Vec<Edge>) {
        self.core().set_next_edges(edges);
    }

    fn add_next_edge(&self, edge: Edge) {
        self.core().add_next_edge(edge);
    }

    fn add_pre_hook(&self, hook: Arc<dyn FunctionPreHook>) {
        self.core().add_pre_hook(hook);
    }

    fn pre_hooks(&self) -> Vec<Arc<dyn FunctionPreHook>> {
        self.core().pre_hooks()
    }

    fn add_input_metadata(&self, dtype: DType, shape: &[usize], device: Device) -> usize {
        self.core().add_input_metadata(dtype, shape, device)
    }

    fn input_metadata(&self, index: usize) -> Option<InputMetadata> {
        self.core().input_metadata(index)
    }
}

/// Whether two node handles point at the same node.
#[inline]
pub fn same_node(a: &Arc<dyn Node>, b: &Arc<dyn Node>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
