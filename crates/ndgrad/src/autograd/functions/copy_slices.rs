//! Backward of an in-place operation applied through a view.

use crate::autograd::node::{Node, NodeCore};
use crate::autograd::variable::gradient_edge;
use crate::error::AutogradError;
use crate::geometry::Geometry;
use crate::tensor::Tensor;
use std::any::Any;
use std::sync::Arc;

/// Producer of a base after one of its views was written in place.
///
/// On the backward pass the region covered by `view` goes through the
/// wrapped in-place function and is spliced back into the base's gradient;
/// the rest of the base's gradient passes through untouched.
///
/// Next edges: slot 0 is the base's edge from *before* the rebase, slots
/// 1.. are the wrapped function's own next edges 1.. . Only the base's
/// geometry is kept, never the base handle, since this node becomes the
/// base's own grad_fn.
#[derive(Debug)]
pub struct CopySlices {
    core: NodeCore,
    base: Geometry,
    view: Geometry,
    function: Arc<dyn Node>,
}

impl CopySlices {
    /// Wrap `function`, an in-place op applied to `view` of `base_var`.
    pub fn new(
        base_var: &Tensor,
        view: Geometry,
        function: Arc<dyn Node>,
    ) -> Result<Self, AutogradError> {
        let core = NodeCore::new();
        core.add_input_metadata(base_var.dtype()?, base_var.sizes()?, base_var.device()?);

        let mut next_edges = vec![gradient_edge(base_var)?];
        next_edges.extend(function.next_edges().into_iter().skip(1));
        core.set_next_edges(next_edges);

        Ok(Self {
            core,
            base: base_var.geometry()?.clone(),
            view,
            function,
        })
    }

    /// Geometry of the base at rebase time.
    pub fn base(&self) -> &Geometry {
        &self.base
    }

    /// Geometry of the written view at rebase time.
    pub fn view(&self) -> &Geometry {
        &self.view
    }

    /// Wrapped in-place function.
    pub fn function(&self) -> &Arc<dyn Node> {
        &self.function
    }
}

impl Node for CopySlices {
    fn name(&self) -> &'static str {
        "CopySlices"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::AsStridedBackward;

    #[test]
    fn test_next_edges_skip_function_slot_zero() {
        let base = Tensor::new(&[4]);
        base.set_requires_grad(true).unwrap();
        let other = Tensor::new(&[2]);
        other.set_requires_grad(true).unwrap();

        let view = Geometry::new(&[2], &[1], 1).unwrap();
        let function = AsStridedBackward::new(&base, view.clone()).unwrap();
        function.set_next_edges(vec![
            gradient_edge(&base).unwrap(),
            gradient_edge(&other).unwrap(),
        ]);
        let function: Arc<dyn Node> = Arc::new(function);

        let node = CopySlices::new(&base, view, function).unwrap();
        let next = node.next_edges();
        assert_eq!(next.len(), 2);
        assert_eq!(next[0], gradient_edge(&base).unwrap());
        assert_eq!(next[1], gradient_edge(&other).unwrap());
        assert_eq!(node.input_metadata(0).unwrap().shape(), &[4]);
        assert_eq!(node.base().storage_offset(), 0);
    }
}
