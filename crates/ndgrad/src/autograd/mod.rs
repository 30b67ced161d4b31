//! Autograd metadata of tensors.
//!
//! Every tensor can carry an [`AutogradMeta`] record saying whether it
//! requires gradient, which [`Node`] produced it and, for views, which base
//! it aliases. This module keeps that record consistent while tensors are
//! viewed and written in place.
//!
//! # Architecture
//!
//! ```text
//! Tensor ──owns──► TensorImpl ──owns──► AutogradMeta ──► grad_fn: Arc<dyn Node>
//!                    ▲   │                  │       └──► grad_accumulator (weak)
//!                    ┆   ▼                  ▼
//!                    ┆ VersionCounter    ViewMeta ──owns──► base: Tensor
//!                    ┆ (shared by views)
//!                    └┈┈┈┈ AccumulateGrad (weak, to its leaf)
//! ```
//!
//! Every back-reference from a node to a tensor is weak, so the ownership
//! graph stays acyclic even after a base's grad_fn starts routing into
//! that base's own accumulator.
//!
//! # Example
//!
//! ```
//! use ndgrad::Tensor;
//! use ndgrad::autograd::{CopySlices, Edge, Node, bump_version, rebase_history};
//! # use ndgrad::autograd::NodeCore;
//! # use std::any::Any;
//! # use std::sync::Arc;
//! # #[derive(Debug, Default)]
//! # struct AddBackward { core: NodeCore }
//! # impl Node for AddBackward {
//! #     fn name(&self) -> &'static str { "AddBackward" }
//! #     fn core(&self) -> &NodeCore { &self.core }
//! #     fn as_any(&self) -> &dyn Any { self }
//! # }
//!
//! let a = Tensor::new(&[4, 4]);
//! a.set_requires_grad(true).unwrap();
//! let v = a.slice(&[0..2, 0..4]).unwrap();
//!
//! // v.add_(1): mutate, then record the in-place node.
//! let add = AddBackward::default();
//! add.add_input_metadata(v.dtype().unwrap(), v.sizes().unwrap(), v.device().unwrap());
//! let add: Arc<dyn Node> = Arc::new(add);
//! bump_version(&v).unwrap();
//! rebase_history(&v, Edge::new(add, 0)).unwrap();
//!
//! let base_fn = a.grad_fn().unwrap().unwrap();
//! assert!(base_fn.as_any().downcast_ref::<CopySlices>().is_some());
//! let view_fn = v.grad_fn().unwrap().unwrap();
//! assert!(view_fn.next_edge(0).unwrap().points_to(&base_fn));
//! ```

mod edge;
mod functions;
mod graph;
mod hooks;
pub(crate) mod meta;
mod node;
pub(crate) mod variable;

pub use edge::{Edge, collect_next_edges};
pub use functions::{AccumulateGrad, AsStridedBackward, CopySlices};
pub use graph::{GraphSnapshot, NodeInfo};
pub use hooks::{CppFunctionPreHook, HookFn, HooksMap};
pub use meta::{AutogradMeta, ViewMeta};
pub use node::{FunctionPreHook, InputMetadata, Node, NodeCore, same_node};
pub use variable::{
    add_hook, bump_version, clear_hooks, external_object, get_autograd_meta, grad_accumulator,
    grad_fn_unsafe, gradient_edge, hooks, make_variable_view, materialize_autograd_meta,
    rebase_history, set_external_object, set_grad_accumulator, set_gradient_edge, set_name,
    set_version_counter, try_get_grad_accumulator, version_counter,
};
