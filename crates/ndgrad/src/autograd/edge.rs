//! Gradient edges.

use super::node::{Node, same_node};
use super::variable::gradient_edge;
use crate::error::AutogradError;
use crate::tensor::Tensor;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Where a value's gradient flows: input slot `input_nr` of `function`.
///
/// An edge without a function is valid to hold but carries no gradient
/// (e.g. the edge of a tensor that does not require grad).
#[derive(Clone, Default)]
pub struct Edge {
    /// Node receiving the gradient.
    pub function: Option<Arc<dyn Node>>,
    /// Input slot of `function` the gradient is fed into.
    pub input_nr: u32,
}

impl Edge {
    /// Create an edge into `function` at `input_nr`.
    pub fn new(function: Arc<dyn Node>, input_nr: u32) -> Self {
        Self {
            function: Some(function),
            input_nr,
        }
    }

    /// Edge that leads nowhere.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the edge has a function.
    pub fn is_valid(&self) -> bool {
        self.function.is_some()
    }

    /// Whether the edge leads into `node`.
    pub fn points_to(&self, node: &Arc<dyn Node>) -> bool {
        self.function
            .as_ref()
            .is_some_and(|function| same_node(function, node))
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        let same_function = match (&self.function, &other.function) {
            (Some(a), Some(b)) => same_node(a, b),
            (None, None) => true,
            _ => false,
        };
        same_function && self.input_nr == other.input_nr
    }
}

impl Eq for Edge {}

impl Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(
                f,
                "Edge({}#{}, {})",
                function.name(),
                function.sequence_nr(),
                self.input_nr
            ),
            None => write!(f, "Edge(None, {})", self.input_nr),
        }
    }
}

/// Gradient edges of `tensors`, in order.
///
/// Undefined tensors map to empty edges.
pub fn collect_next_edges(tensors: &[Tensor]) -> Result<Vec<Edge>, AutogradError> {
    tensors
        .iter()
        .map(|tensor| {
            if tensor.defined() {
                gradient_edge(tensor)
            } else {
                Ok(Edge::empty())
            }
        })
        .collect()
}
