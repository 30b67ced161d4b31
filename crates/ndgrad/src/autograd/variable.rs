//! Accessor layer over a tensor's autograd metadata.
//!
//! Free functions here take a tensor handle, allocate its metadata on
//! demand and keep the graph wiring consistent. The two lazy constructions
//! (leaf accumulators and view grad_fns) and the in-place rebasing of view
//! history also live here.
//!
//! Locking: each metadata block has one lock. No function holds two of
//! them at once, so aliasing tensors can never deadlock each other.

use super::edge::Edge;
use super::functions::{AccumulateGrad, AsStridedBackward, CopySlices};
use super::meta::{AutogradMeta, ViewMeta};
use super::node::{FunctionPreHook, Node};
use crate::error::AutogradError;
use crate::geometry::Geometry;
use crate::tensor::Tensor;
use crate::version::VersionCounter;
use std::ffi::c_void;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Metadata of `self_`, allocating a default record if it has none.
pub fn materialize_autograd_meta(self_: &Tensor) -> Result<&AutogradMeta, AutogradError> {
    Ok(self_
        .inner("materialize_autograd_meta")?
        .materialize_autograd_meta())
}

/// Metadata of `self_` if it has been allocated.
pub fn get_autograd_meta(self_: &Tensor) -> Result<Option<&AutogradMeta>, AutogradError> {
    Ok(self_.inner("get_autograd_meta")?.autograd_meta())
}

/// Record `edge` as the producer of `self_`, discarding the previous one.
pub fn set_gradient_edge(self_: &Tensor, edge: Edge) -> Result<(), AutogradError> {
    let meta = materialize_autograd_meta(self_)?;
    let mut state = meta.lock();
    state.grad_fn = edge.function;
    state.output_nr = edge.input_nr;
    Ok(())
}

/// Edge that gradients of `self_` flow into.
///
/// Non-leaves point at their producer; leaves point at their accumulator,
/// which is created here if needed. Leaves that don't require grad get an
/// empty edge.
pub fn gradient_edge(self_: &Tensor) -> Result<Edge, AutogradError> {
    if let Some(function) = self_.grad_fn()? {
        return Ok(Edge::new(function, self_.output_nr()));
    }
    Ok(Edge {
        function: grad_accumulator(self_)?,
        input_nr: 0,
    })
}

/// Accumulator of a leaf, created on first request.
///
/// The accumulator is cached weakly: it owns a handle to `self_`, so an
/// owning cache would form a cycle. Whoever holds an edge into it keeps it
/// alive.
///
/// # Errors
///
/// Returns `NotALeaf` if `self_` has a producing node.
pub fn grad_accumulator(self_: &Tensor) -> Result<Option<Arc<dyn Node>>, AutogradError> {
    let Some(meta) = get_autograd_meta(self_)? else {
        return Ok(None);
    };

    let mut state = meta.lock();
    if state.grad_fn.is_some() {
        return Err(AutogradError::NotALeaf);
    }
    if !meta.requires_grad_flag() {
        return Ok(None);
    }

    if let Some(existing) = state.grad_accumulator.as_ref().and_then(Weak::upgrade) {
        return Ok(Some(existing));
    }

    let accumulator: Arc<dyn Node> = Arc::new(AccumulateGrad::new(self_)?);
    state.grad_accumulator = Some(Arc::downgrade(&accumulator));
    debug!(
        sequence_nr = accumulator.sequence_nr(),
        "created gradient accumulator"
    );
    Ok(Some(accumulator))
}

/// Cached accumulator if it is still alive. Never creates one.
pub fn try_get_grad_accumulator(self_: &Tensor) -> Result<Option<Arc<dyn Node>>, AutogradError> {
    Ok(get_autograd_meta(self_)?
        .and_then(|meta| meta.lock().grad_accumulator.as_ref().and_then(Weak::upgrade)))
}

/// Install a weak accumulator reference.
pub fn set_grad_accumulator(
    self_: &Tensor,
    grad_accumulator: Weak<dyn Node>,
) -> Result<(), AutogradError> {
    materialize_autograd_meta(self_)?.lock().grad_accumulator = Some(grad_accumulator);
    Ok(())
}

/// Stored producing node without view materialization or allocation.
pub fn grad_fn_unsafe(self_: &Tensor) -> Result<Option<Arc<dyn Node>>, AutogradError> {
    Ok(get_autograd_meta(self_)?.and_then(AutogradMeta::grad_fn))
}

/// Replace the version counter of `self_`.
pub fn set_version_counter(
    self_: &Tensor,
    version_counter: &VersionCounter,
) -> Result<(), AutogradError> {
    self_
        .inner("set_version_counter")?
        .set_version_counter(version_counter.clone());
    Ok(())
}

/// Record one in-place mutation of `self_`'s storage.
pub fn bump_version(self_: &Tensor) -> Result<u32, AutogradError> {
    Ok(self_.inner("bump_version")?.bump_version())
}

/// Shared version counter of `self_`.
pub fn version_counter(self_: &Tensor) -> Result<VersionCounter, AutogradError> {
    Ok(self_.inner("version_counter")?.version_counter())
}

pub fn add_hook(self_: &Tensor, hook: Arc<dyn FunctionPreHook>) -> Result<(), AutogradError> {
    materialize_autograd_meta(self_)?.lock().hooks.push(hook);
    Ok(())
}

/// Pre-hooks of `self_` in insertion order; empty without metadata.
pub fn hooks(self_: &Tensor) -> Result<Vec<Arc<dyn FunctionPreHook>>, AutogradError> {
    Ok(get_autograd_meta(self_)?
        .map(|meta| meta.lock().hooks.clone())
        .unwrap_or_default())
}

pub fn clear_hooks(self_: &Tensor) -> Result<(), AutogradError> {
    materialize_autograd_meta(self_)?.lock().hooks.clear();
    Ok(())
}

pub fn set_name(self_: &Tensor, name: &str) -> Result<(), AutogradError> {
    materialize_autograd_meta(self_)?.lock().name = name.to_string();
    Ok(())
}

/// Attach an object owned by an embedding runtime.
///
/// The pointer is stored as-is; the owner manages its lifetime.
pub fn set_external_object(self_: &Tensor, object: *mut c_void) -> Result<(), AutogradError> {
    self_
        .inner("set_external_object")?
        .set_external_object(object);
    Ok(())
}

pub fn external_object(self_: &Tensor) -> Result<*mut c_void, AutogradError> {
    Ok(self_.inner("external_object")?.external_object())
}

/// Create a differentiable view of `base` with `geometry`.
///
/// The view shares `base`'s storage and version counter, and records the
/// root of `base` as its own base. `gradient_edge`, when given, becomes the
/// view's producer.
///
/// # Errors
///
/// Returns error if `base` is undefined or `geometry` reaches past the end
/// of the storage.
pub fn make_variable_view(
    base: &Tensor,
    geometry: Geometry,
    gradient_edge: Option<Edge>,
) -> Result<Tensor, AutogradError> {
    let base_impl = base.inner("make_variable_view")?;
    let required = geometry.storage_extent();
    let available = base_impl.storage().len();
    if required > available {
        return Err(AutogradError::ViewOutOfBounds {
            required,
            available,
        });
    }

    let version_counter = base_impl.version_counter();
    let version = version_counter.current_version();
    let meta = AutogradMeta::new_view(ViewMeta::new(base, geometry.clone())?, version);
    let view = Tensor::new_view(base_impl, geometry, version_counter, meta);
    if let Some(edge) = gradient_edge {
        set_gradient_edge(&view, edge)?;
    }
    trace!(sizes = ?view.sizes()?, version, "created view");
    Ok(view)
}

/// Record the result of an in-place operation on `self_`.
///
/// For a plain tensor, `gradient_edge` simply becomes its producer. For a
/// view, the base's history is rewritten as well: the base's new producer
/// is a [`CopySlices`] node that routes the viewed region through
/// `gradient_edge.function` and the rest through the base's old history.
/// The view's own grad_fn is refreshed before returning.
///
/// # Errors
///
/// Returns error if:
/// - `gradient_edge` has no function
/// - `self_` is a view and the function takes more than one gradient, or
///   the edge's slot is not 0
pub fn rebase_history(self_: &Tensor, gradient_edge: Edge) -> Result<(), AutogradError> {
    let Some(function) = gradient_edge.function.clone() else {
        return Err(AutogradError::MissingGradFn {
            op: "rebase_history",
        });
    };

    let Some((meta, view)) = view_parts(self_)? else {
        return set_gradient_edge(self_, gradient_edge);
    };

    if gradient_edge.input_nr != 0 {
        return Err(AutogradError::internal(format!(
            "in-place edge on a view must use slot 0, got {}",
            gradient_edge.input_nr
        )));
    }
    let num_inputs = function.num_inputs();
    if num_inputs != 1 {
        return Err(AutogradError::MultiOutputInPlaceView { num_inputs });
    }

    let base = view.base();
    let inner_name = function.name();
    let copy_slices: Arc<dyn Node> = Arc::new(CopySlices::new(
        base,
        self_.geometry()?.clone(),
        function,
    )?);
    meta.lock().output_nr = gradient_edge.input_nr;
    debug!(
        inner = inner_name,
        version = self_.version()?,
        "rebasing view history onto base"
    );
    set_gradient_edge(base, Edge::new(copy_slices, 0))?;

    self_.grad_fn()?;
    Ok(())
}

fn view_parts(self_: &Tensor) -> Result<Option<(&AutogradMeta, &ViewMeta)>, AutogradError> {
    Ok(get_autograd_meta(self_)?.and_then(|meta| meta.view().map(|view| (meta, view))))
}

/// Grad_fn of a view, rebuilt if the shared storage was mutated since it
/// was last validated.
///
/// The base's gradient edge is computed without holding the view's lock;
/// the result is installed under the lock unless another caller already
/// validated the same version, so concurrent callers all end up with one
/// node. Any other recorded version is stale, including a larger one left
/// behind when the counter was swapped.
fn view_grad_fn(
    self_: &Tensor,
    meta: &AutogradMeta,
    view: &ViewMeta,
) -> Result<Option<Arc<dyn Node>>, AutogradError> {
    let base = view.base();
    let base_requires_grad = base.requires_grad();
    let current_version = self_.version()?;
    {
        let state = meta.lock();
        if state.grad_fn.is_none() && !base_requires_grad {
            return Ok(None);
        }
        if state.attr_version == current_version {
            return Ok(state.grad_fn.clone());
        }
        if state.output_nr != 0 {
            return Err(AutogradError::internal(format!(
                "view grad_fn must use output slot 0, got {}",
                state.output_nr
            )));
        }
    }

    let function = AsStridedBackward::new(base, view.geometry().clone())?;
    function.set_next_edges(vec![gradient_edge(base)?]);
    let function: Arc<dyn Node> = Arc::new(function);

    let mut state = meta.lock();
    if state.attr_version == current_version {
        return Ok(state.grad_fn.clone());
    }
    debug!(
        from = state.attr_version,
        to = current_version,
        "rebuilt stale view grad_fn"
    );
    state.grad_fn = Some(function.clone());
    state.attr_version = current_version;
    Ok(Some(function))
}

impl Tensor {
    /// Node that produced this tensor; `None` for leaves.
    ///
    /// For views this is where stale history is repaired: if the shared
    /// storage was written since the view's grad_fn was last validated, an
    /// `AsStridedBackward` node over the base's current edge replaces it.
    pub fn grad_fn(&self) -> Result<Option<Arc<dyn Node>>, AutogradError> {
        let Some(meta) = get_autograd_meta(self)? else {
            return Ok(None);
        };
        match meta.view() {
            Some(view) => view_grad_fn(self, meta, view),
            None => Ok(meta.grad_fn()),
        }
    }

    /// Whether gradients flow into this tensor.
    ///
    /// True if the flag is set, the tensor has a producer, or it is a view
    /// of a base that requires grad. Undefined tensors never do.
    pub fn requires_grad(&self) -> bool {
        let Some(meta) = self.try_inner().and_then(|inner| inner.autograd_meta()) else {
            return false;
        };
        if meta.requires_grad_flag() || meta.grad_fn().is_some() {
            return true;
        }
        meta.view().is_some_and(|view| view.base().requires_grad())
    }

    /// Set the requires_grad flag of a leaf.
    ///
    /// # Errors
    ///
    /// Returns error if the tensor is undefined, or if the flag is cleared on
    /// a tensor that has a producing node.
    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<(), AutogradError> {
        let meta = materialize_autograd_meta(self)?;
        if !requires_grad && meta.grad_fn().is_some() {
            return Err(AutogradError::RequiresGradOnNonLeaf);
        }
        meta.set_requires_grad_flag(requires_grad);
        Ok(())
    }

    pub fn is_leaf(&self) -> Result<bool, AutogradError> {
        Ok(self.grad_fn()?.is_none())
    }

    pub fn is_view(&self) -> bool {
        self.try_inner()
            .and_then(|inner| inner.autograd_meta())
            .is_some_and(AutogradMeta::is_view)
    }

    /// Root tensor this view aliases.
    ///
    /// # Errors
    ///
    /// Returns `NotAView` for tensors that are not views.
    pub fn base(&self) -> Result<Tensor, AutogradError> {
        view_parts(self)?
            .map(|(_, view)| view.base().clone())
            .ok_or(AutogradError::NotAView)
    }

    pub fn name(&self) -> Result<String, AutogradError> {
        Ok(get_autograd_meta(self)?
            .map(AutogradMeta::name)
            .unwrap_or_default())
    }

    /// Output slot of the producing node this tensor corresponds to.
    pub fn output_nr(&self) -> u32 {
        self.try_inner()
            .and_then(|inner| inner.autograd_meta())
            .map_or(0, AutogradMeta::output_nr)
    }
}
