//! ndgrad - autograd metadata for n-dimensional tensors
//!
//! This crate implements the layer that turns a plain tensor handle into a
//! participant in a reverse-mode differentiation graph: whether it requires
//! gradient, which node produced it, whether it is a view of another
//! tensor's storage, and how a view's history is repaired after the storage
//! it shares is written in place.
//!
//! # Architecture
//!
//! ```text
//! Level 1: Tensor handles (tensor module)
//!     → Tensor, Storage, views, detached copies
//!
//! Level 2: Autograd metadata (autograd module)
//!     → AutogradMeta / ViewMeta, accessors, rebase_history, hooks
//!
//! Level 3: Graph wiring (autograd::Node, autograd::Edge)
//!     → AccumulateGrad, AsStridedBackward, CopySlices
//! ```
//!
//! Executing the backward graph is left to an engine outside this crate;
//! here nodes are only built and wired.
//!
//! # Example
//!
//! ```
//! use ndgrad::Tensor;
//! use ndgrad::autograd::{Node, gradient_edge};
//!
//! let w = Tensor::new(&[3, 2]);
//! w.set_requires_grad(true).unwrap();
//!
//! // Leaves feed their gradient into an accumulator.
//! let edge = gradient_edge(&w).unwrap();
//! assert_eq!(edge.function.as_ref().unwrap().name(), "AccumulateGrad");
//! assert!(w.is_leaf().unwrap());
//! ```

pub mod autograd;
pub mod error;
pub mod geometry;
pub mod strides;
pub mod tensor;
pub mod version;

pub use error::{AutogradError, ErrorKind};
pub use geometry::Geometry;
pub use tensor::{DType, Device, Storage, Tensor, Variable, WeakTensor};
pub use version::VersionCounter;
