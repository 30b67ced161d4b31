//! Per-tensor autograd metadata.

use super::hooks::HooksMap;
use super::node::{FunctionPreHook, Node};
use crate::error::AutogradError;
use crate::geometry::Geometry;
use crate::tensor::Tensor;
use parking_lot::{Mutex, MutexGuard};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Fields guarded by the metadata lock.
#[derive(Default)]
pub(crate) struct MetaState {
    /// Producing node; `None` for leaves.
    pub(crate) grad_fn: Option<Arc<dyn Node>>,
    /// Lazily created accumulator of a leaf. Never owning.
    pub(crate) grad_accumulator: Option<Weak<dyn Node>>,
    /// Output slot of `grad_fn` this tensor corresponds to.
    pub(crate) output_nr: u32,
    pub(crate) name: String,
    pub(crate) hooks: Vec<Arc<dyn FunctionPreHook>>,
    pub(crate) cpp_hooks_map: Option<Arc<HooksMap>>,
    /// Views only: base version at which `grad_fn` was last validated.
    pub(crate) attr_version: u32,
}

/// View half of the metadata: what a view aliases and how.
#[derive(Debug)]
pub struct ViewMeta {
    base: Tensor,
    geometry: Geometry,
}

impl ViewMeta {
    /// Record a view of `base` with `geometry`.
    ///
    /// If `base` is itself a view, its root is recorded instead, so views
    /// never form chains.
    pub(crate) fn new(base: &Tensor, geometry: Geometry) -> Result<Self, AutogradError> {
        if !base.defined() {
            return Err(AutogradError::UndefinedTensor { op: "make_variable_view" });
        }
        let root = if base.is_view() {
            base.base()?
        } else {
            base.clone()
        };
        Ok(Self {
            base: root,
            geometry,
        })
    }

    /// Root tensor this view aliases.
    pub fn base(&self) -> &Tensor {
        &self.base
    }

    /// Geometry of the view at creation time.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// Autograd record of one tensor.
///
/// Allocated lazily on first autograd-relevant access and owned by the
/// tensor's implementation block. Views get theirs eagerly, with the view
/// half filled in.
pub struct AutogradMeta {
    requires_grad: AtomicBool,
    state: Mutex<MetaState>,
    view: Option<ViewMeta>,
}

impl AutogradMeta {
    pub(crate) fn new(requires_grad: bool) -> Self {
        Self {
            requires_grad: AtomicBool::new(requires_grad),
            state: Mutex::new(MetaState::default()),
            view: None,
        }
    }

    /// Metadata of a view whose grad_fn is valid as of `version`.
    pub(crate) fn new_view(view: ViewMeta, version: u32) -> Self {
        Self {
            requires_grad: AtomicBool::new(false),
            state: Mutex::new(MetaState {
                attr_version: version,
                ..MetaState::default()
            }),
            view: Some(view),
        }
    }

    /// The stored requires_grad flag, ignoring any producing node.
    pub fn requires_grad_flag(&self) -> bool {
        self.requires_grad.load(Ordering::Acquire)
    }

    pub(crate) fn set_requires_grad_flag(&self, requires_grad: bool) {
        self.requires_grad.store(requires_grad, Ordering::Release);
    }

    pub fn is_view(&self) -> bool {
        self.view.is_some()
    }

    pub fn view(&self) -> Option<&ViewMeta> {
        self.view.as_ref()
    }

    /// Stored producing node, without view materialization.
    pub fn grad_fn(&self) -> Option<Arc<dyn Node>> {
        self.state.lock().grad_fn.clone()
    }

    pub fn output_nr(&self) -> u32 {
        self.state.lock().output_nr
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Base version at which a view's grad_fn was last validated.
    pub fn attr_version(&self) -> u32 {
        self.state.lock().attr_version
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MetaState> {
        self.state.lock()
    }
}

impl Debug for AutogradMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AutogradMeta")
            .field("requires_grad", &self.requires_grad_flag())
            .field("grad_fn", &state.grad_fn.as_ref().map(|n| n.name()))
            .field("output_nr", &state.output_nr)
            .field("name", &state.name)
            .field("num_hooks", &state.hooks.len())
            .field("is_view", &self.view.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::variable::get_autograd_meta;

    #[test]
    fn test_default_meta() {
        let meta = AutogradMeta::new(false);
        assert!(!meta.requires_grad_flag());
        assert!(meta.grad_fn().is_none());
        assert_eq!(meta.output_nr(), 0);
        assert!(meta.name().is_empty());
        assert!(!meta.is_view());
    }

    #[test]
    fn test_view_meta_collapses_to_root() {
        let root = Tensor::new(&[4, 4]);
        let v1 = root.slice(&[0..3, 0..3]).unwrap();
        let v2 = v1.slice(&[1..2, 0..3]).unwrap();

        let meta = get_autograd_meta(&v2).unwrap().unwrap();
        let view = meta.view().unwrap();
        assert!(view.base().is_same(&root));
        assert_eq!(view.geometry(), v2.geometry().unwrap());
    }

    #[test]
    fn test_view_meta_undefined_base() {
        let err = ViewMeta::new(&Tensor::undefined(), Geometry::contiguous(&[1])).unwrap_err();
        assert!(matches!(err, AutogradError::UndefinedTensor { .. }));
    }
}
