//! Backward of a strided view of a base's storage.

use crate::autograd::node::{Node, NodeCore};
use crate::error::AutogradError;
use crate::geometry::Geometry;
use crate::tensor::Tensor;
use std::any::Any;

/// Routes the gradient of a strided view back into its input.
///
/// Recorded when a view is taken of a tensor that requires grad, and
/// rebuilt whenever a view's grad_fn is found stale. The caller wires the
/// single next edge to the input's gradient edge.
#[derive(Debug)]
pub struct AsStridedBackward {
    core: NodeCore,
    self_geometry: Geometry,
    view: Geometry,
}

impl AsStridedBackward {
    /// Backward of viewing `input` with `view`.
    ///
    /// The incoming gradient has the view's sizes with the input's type and
    /// device.
    pub fn new(input: &Tensor, view: Geometry) -> Result<Self, AutogradError> {
        let core = NodeCore::new();
        core.add_input_metadata(input.dtype()?, view.sizes(), input.device()?);
        Ok(Self {
            core,
            self_geometry: input.geometry()?.clone(),
            view,
        })
    }

    /// Geometry of the input at construction time.
    pub fn self_geometry(&self) -> &Geometry {
        &self.self_geometry
    }

    pub fn size(&self) -> &[usize] {
        self.view.sizes()
    }

    pub fn stride(&self) -> &[usize] {
        self.view.strides()
    }

    pub fn storage_offset(&self) -> usize {
        self.view.storage_offset()
    }
}

impl Node for AsStridedBackward {
    fn name(&self) -> &'static str {
        "AsStridedBackward"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
