//! Removable gradient hooks.
//!
//! Callbacks registered on a tensor live in a [`HooksMap`] addressed by
//! small integer handles. A single [`CppFunctionPreHook`] installed on the
//! tensor (and on its producing node, if any) dispatches to the map, so
//! callbacks can be added and removed without touching node pre-hooks.

use super::node::FunctionPreHook;
use super::variable::materialize_autograd_meta;
use crate::error::AutogradError;
use crate::tensor::Tensor;
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::trace;

/// Callback run on a gradient. Returning an undefined tensor leaves the
/// gradient unchanged.
pub type HookFn = Arc<dyn Fn(&Tensor) -> Tensor + Send + Sync>;

/// Hook table keyed by registration handle.
///
/// Handles are indices in registration order. Removing a hook empties its
/// slot instead of shifting later ones, so issued handles stay valid.
#[derive(Default)]
pub struct HooksMap {
    slots: Mutex<Vec<Option<HookFn>>>,
}

impl HooksMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook and return its handle.
    pub fn insert(&self, hook: HookFn) -> usize {
        let mut slots = self.slots.lock();
        slots.push(Some(hook));
        slots.len() - 1
    }

    /// Make the hook at `index` inert.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHookIndex` if no handle `index` was ever issued.
    pub fn remove(&self, index: usize) -> Result<(), AutogradError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(index)
            .ok_or(AutogradError::InvalidHookIndex { index })?;
        *slot = None;
        Ok(())
    }

    /// Number of handles issued so far.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Live hooks in registration order.
    pub fn live(&self) -> Vec<HookFn> {
        self.slots.lock().iter().flatten().cloned().collect()
    }
}

impl Debug for HooksMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("HooksMap")
            .field("len", &slots.len())
            .field("live", &slots.iter().flatten().count())
            .finish()
    }
}

/// Pre-hook that runs the live callbacks of a [`HooksMap`] on one input.
#[derive(Debug)]
pub struct CppFunctionPreHook {
    hooks: Arc<HooksMap>,
    value_idx: usize,
}

impl CppFunctionPreHook {
    pub fn new(hooks: Arc<HooksMap>, value_idx: usize) -> Self {
        Self { hooks, value_idx }
    }

    pub fn value_idx(&self) -> usize {
        self.value_idx
    }
}

impl FunctionPreHook for CppFunctionPreHook {
    fn call(&self, mut values: Vec<Tensor>) -> Result<Vec<Tensor>, AutogradError> {
        let num_values = values.len();
        let value = values.get_mut(self.value_idx).ok_or_else(|| {
            AutogradError::internal(format!(
                "hook input {} out of range for {} values",
                self.value_idx, num_values
            ))
        })?;

        // Snapshot first so callbacks may register or remove hooks.
        for hook in self.hooks.live() {
            let result = hook(&*value);
            if !result.defined() {
                continue;
            }
            check_single_result(value, &result)?;
            *value = result;
        }
        Ok(values)
    }
}

fn check_single_result(value: &Tensor, result: &Tensor) -> Result<(), AutogradError> {
    let (Ok(expected), Ok(actual)) = (value.sizes(), result.sizes()) else {
        return Ok(());
    };
    if expected != actual {
        return Err(AutogradError::HookShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Hook table of `self_`, created and wired on first use.
fn create_cpp_hook(self_: &Tensor) -> Result<Arc<HooksMap>, AutogradError> {
    let meta = materialize_autograd_meta(self_)?;
    let map = {
        let mut state = meta.lock();
        if let Some(existing) = &state.cpp_hooks_map {
            return Ok(existing.clone());
        }
        let map = Arc::new(HooksMap::new());
        state.cpp_hooks_map = Some(map.clone());
        state.hooks.clear();
        state
            .hooks
            .push(Arc::new(CppFunctionPreHook::new(map.clone(), 0)));
        map
    };

    if let Some(function) = self_.grad_fn()? {
        let value_idx = self_.output_nr() as usize;
        function.add_pre_hook(Arc::new(CppFunctionPreHook::new(map.clone(), value_idx)));
    }
    Ok(map)
}

impl Tensor {
    /// Register a callback on the gradient of this tensor.
    ///
    /// Returns a handle for [`Tensor::remove_hook`]. Handles increase with
    /// every registration.
    ///
    /// # Errors
    ///
    /// Returns error if the tensor is undefined or doesn't require grad.
    pub fn register_hook<F>(&self, hook: F) -> Result<usize, AutogradError>
    where
        F: Fn(&Tensor) -> Tensor + Send + Sync + 'static,
    {
        self.inner("register_hook")?;
        if !self.requires_grad() {
            return Err(AutogradError::HookRequiresGrad);
        }

        let existing = materialize_autograd_meta(self)?.lock().cpp_hooks_map.clone();
        let map = match existing {
            Some(map) => map,
            None => create_cpp_hook(self)?,
        };
        let handle = map.insert(Arc::new(hook));
        trace!(handle, "registered gradient hook");
        Ok(handle)
    }

    /// Make the hook registered under `handle` inert.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHookIndex` if no hook was ever registered under
    /// `handle`.
    pub fn remove_hook(&self, handle: usize) -> Result<(), AutogradError> {
        let map = materialize_autograd_meta(self)?
            .lock()
            .cpp_hooks_map
            .clone()
            .ok_or(AutogradError::InvalidHookIndex { index: handle })?;
        map.remove(handle)?;
        trace!(handle, "removed gradient hook");
        Ok(())
    }
}
