//! Terminal node of a leaf tensor.

use crate::autograd::node::{Node, NodeCore};
use crate::error::AutogradError;
use crate::tensor::{Tensor, WeakTensor};
use std::any::Any;

/// Collects the gradient of a leaf tensor.
///
/// Refers to the leaf weakly, as the leaf does to it (see
/// [`grad_accumulator`](crate::autograd::grad_accumulator)). After an
/// in-place write through a view, the leaf's own grad_fn reaches this node,
/// so an owning handle here would keep the leaf alive forever.
#[derive(Debug)]
pub struct AccumulateGrad {
    core: NodeCore,
    variable: WeakTensor,
}

impl AccumulateGrad {
    /// Create the accumulator of `variable`.
    pub fn new(variable: &Tensor) -> Result<Self, AutogradError> {
        let core = NodeCore::new();
        core.add_input_metadata(
            variable.dtype()?,
            variable.sizes()?,
            variable.device()?,
        );
        Ok(Self {
            core,
            variable: variable.downgrade(),
        })
    }

    /// Leaf this accumulator belongs to, if it is still alive.
    pub fn variable(&self) -> Option<Tensor> {
        self.variable.upgrade()
    }
}

impl Node for AccumulateGrad {
    fn name(&self) -> &'static str {
        "AccumulateGrad"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
