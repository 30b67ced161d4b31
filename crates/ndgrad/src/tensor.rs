//! Tensor handles and their shared implementation block.
//!
//! A [`Tensor`] is a cheap, clonable handle. All clones of a handle share
//! one `TensorImpl`, which carries the geometry, the storage, the
//! version counter and (once something asks for it) the autograd
//! metadata. Element data is out of scope: storage only knows its length
//! and identity, which is all aliasing needs.

use crate::autograd::meta::AutogradMeta;
use crate::autograd::variable::{gradient_edge, make_variable_view};
use crate::autograd::{AsStridedBackward, Edge, Node};
use crate::error::AutogradError;
use crate::geometry::Geometry;
use crate::version::VersionCounter;
use parking_lot::RwLock;
use std::ffi::c_void;
use std::fmt::{self, Debug};
use std::ops::Range;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::trace;

/// Element type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    F32,
    #[default]
    F64,
    C64,
}

/// Device tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(u16),
}

/// Backing buffer shared by a tensor and all of its views.
#[derive(Debug, Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

#[derive(Debug)]
struct StorageInner {
    len: usize,
}

impl Storage {
    /// Allocate storage for `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            inner: Arc::new(StorageInner { len }),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Whether both handles refer to the same buffer.
    pub fn is_alias_of(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Storage-and-metadata block behind a tensor handle.
pub(crate) struct TensorImpl {
    storage: Storage,
    geometry: Geometry,
    dtype: DType,
    device: Device,
    version_counter: RwLock<VersionCounter>,
    autograd_meta: OnceLock<AutogradMeta>,
    external_object: AtomicPtr<c_void>,
}

impl TensorImpl {
    fn new(
        storage: Storage,
        geometry: Geometry,
        dtype: DType,
        device: Device,
        version_counter: VersionCounter,
        autograd_meta: OnceLock<AutogradMeta>,
    ) -> Self {
        Self {
            storage,
            geometry,
            dtype,
            device,
            version_counter: RwLock::new(version_counter),
            autograd_meta,
            external_object: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Copy of this block over the same storage without autograd metadata.
    fn shallow_copy_and_detach(&self, version_counter: VersionCounter) -> Self {
        Self::new(
            self.storage.clone(),
            self.geometry.clone(),
            self.dtype,
            self.device,
            version_counter,
            OnceLock::new(),
        )
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub(crate) fn dtype(&self) -> DType {
        self.dtype
    }

    pub(crate) fn device(&self) -> Device {
        self.device
    }

    pub(crate) fn autograd_meta(&self) -> Option<&AutogradMeta> {
        self.autograd_meta.get()
    }

    pub(crate) fn materialize_autograd_meta(&self) -> &AutogradMeta {
        self.autograd_meta.get_or_init(|| {
            trace!(sizes = ?self.geometry.sizes(), "allocating autograd metadata");
            AutogradMeta::new(false)
        })
    }

    pub(crate) fn version_counter(&self) -> VersionCounter {
        self.version_counter.read().clone()
    }

    pub(crate) fn set_version_counter(&self, version_counter: VersionCounter) {
        *self.version_counter.write() = version_counter;
    }

    pub(crate) fn bump_version(&self) -> u32 {
        self.version_counter.read().bump()
    }

    pub(crate) fn external_object(&self) -> *mut c_void {
        self.external_object.load(Ordering::Acquire)
    }

    pub(crate) fn set_external_object(&self, object: *mut c_void) {
        self.external_object.store(object, Ordering::Release);
    }
}

/// Handle to an array participating in autograd.
///
/// A handle is *defined* iff it refers to an implementation block. Cloning
/// a handle shares the block; dropping the last handle drops the block and
/// its metadata.
///
/// # Example
///
/// ```
/// use ndgrad::Tensor;
/// use ndgrad::autograd::Node;
///
/// let a = Tensor::new(&[4, 5]);
/// a.set_requires_grad(true).unwrap();
///
/// let v = a.slice(&[1..3, 0..5]).unwrap();
/// assert!(v.is_view());
/// assert!(v.base().unwrap().is_same(&a));
/// assert_eq!(v.grad_fn().unwrap().unwrap().name(), "AsStridedBackward");
/// ```
#[derive(Clone, Default)]
pub struct Tensor {
    inner: Option<Arc<TensorImpl>>,
}

/// Name used by the accessor layer for tensors taking part in autograd.
pub type Variable = Tensor;

impl Tensor {
    /// Handle that refers to nothing.
    pub fn undefined() -> Self {
        Self::default()
    }

    /// Column-major `f64` tensor on the CPU with fresh storage.
    pub fn new(shape: &[usize]) -> Self {
        Self::with_options(shape, DType::default(), Device::default())
    }

    /// Column-major tensor with fresh storage and explicit tags.
    pub fn with_options(shape: &[usize], dtype: DType, device: Device) -> Self {
        let geometry = Geometry::contiguous(shape);
        let storage = Storage::new(geometry.numel());
        Self::from_impl(TensorImpl::new(
            storage,
            geometry,
            dtype,
            device,
            VersionCounter::new(),
            OnceLock::new(),
        ))
    }

    /// View over `base`'s storage carrying pre-built view metadata.
    pub(crate) fn new_view(
        base: &TensorImpl,
        geometry: Geometry,
        version_counter: VersionCounter,
        meta: AutogradMeta,
    ) -> Self {
        Self::from_impl(TensorImpl::new(
            base.storage.clone(),
            geometry,
            base.dtype,
            base.device,
            version_counter,
            OnceLock::from(meta),
        ))
    }

    fn from_impl(inner: TensorImpl) -> Self {
        Self {
            inner: Some(Arc::new(inner)),
        }
    }

    /// Whether this handle refers to a tensor.
    #[inline]
    pub fn defined(&self) -> bool {
        self.inner.is_some()
    }

    /// Implementation block, or `UndefinedTensor` naming `op`.
    #[inline]
    pub(crate) fn inner(&self, op: &'static str) -> Result<&TensorImpl, AutogradError> {
        self.inner
            .as_deref()
            .ok_or(AutogradError::UndefinedTensor { op })
    }

    /// Implementation block if defined.
    #[inline]
    pub(crate) fn try_inner(&self) -> Option<&TensorImpl> {
        self.inner.as_deref()
    }

    /// Whether both handles share one implementation block.
    ///
    /// Two undefined handles are the same.
    pub fn is_same(&self, other: &Tensor) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn geometry(&self) -> Result<&Geometry, AutogradError> {
        Ok(self.inner("geometry")?.geometry())
    }

    pub fn sizes(&self) -> Result<&[usize], AutogradError> {
        Ok(self.inner("sizes")?.geometry().sizes())
    }

    pub fn dtype(&self) -> Result<DType, AutogradError> {
        Ok(self.inner("dtype")?.dtype())
    }

    pub fn device(&self) -> Result<Device, AutogradError> {
        Ok(self.inner("device")?.device())
    }

    pub fn storage(&self) -> Result<&Storage, AutogradError> {
        Ok(self.inner("storage")?.storage())
    }

    /// Current value of the mutation version counter.
    pub fn version(&self) -> Result<u32, AutogradError> {
        Ok(self.inner("version")?.version_counter().current_version())
    }

    /// New handle over the same storage with a fresh version counter and no
    /// autograd metadata.
    pub fn variable_data(&self) -> Result<Tensor, AutogradError> {
        let inner = self.inner("variable_data")?;
        Ok(Self::from_impl(
            inner.shallow_copy_and_detach(VersionCounter::new()),
        ))
    }

    /// New handle over the same storage that shares the version counter but
    /// has no autograd metadata.
    pub fn tensor_data(&self) -> Result<Tensor, AutogradError> {
        self.shared_counter_copy("tensor_data")
    }

    /// Detach from the graph.
    ///
    /// The result aliases the same storage and version counter, so in-place
    /// writes through it are still seen by staleness checks on views.
    pub fn detach(&self) -> Result<Tensor, AutogradError> {
        self.shared_counter_copy("detach")
    }

    fn shared_counter_copy(&self, op: &'static str) -> Result<Tensor, AutogradError> {
        let inner = self.inner(op)?;
        Ok(Self::from_impl(
            inner.shallow_copy_and_detach(inner.version_counter()),
        ))
    }

    /// Strided view over this tensor's storage.
    ///
    /// `storage_offset` is absolute, as for any geometry. When this tensor
    /// requires grad the view is produced by an `AsStridedBackward` node fed
    /// into this tensor's gradient edge.
    ///
    /// # Errors
    ///
    /// Returns error if the geometry is malformed or reaches past the end of
    /// the storage.
    pub fn as_strided(
        &self,
        sizes: &[usize],
        strides: &[usize],
        storage_offset: usize,
    ) -> Result<Tensor, AutogradError> {
        let geometry = Geometry::new(sizes, strides, storage_offset)?;
        self.view_with_geometry(geometry)
    }

    /// View of a rectangular sub-region.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Number of ranges doesn't match tensor dimensions
    /// - Any range is out of bounds
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Tensor, AutogradError> {
        let geometry = self.inner("slice")?.geometry().slice(ranges)?;
        self.view_with_geometry(geometry)
    }

    /// Non-owning handle to the same implementation block.
    ///
    /// Downgrading an undefined handle gives one that never upgrades.
    pub fn downgrade(&self) -> WeakTensor {
        WeakTensor {
            inner: self.inner.as_ref().map_or_else(Weak::new, Arc::downgrade),
        }
    }

    fn view_with_geometry(&self, geometry: Geometry) -> Result<Tensor, AutogradError> {
        let edge = if self.requires_grad() {
            let node = AsStridedBackward::new(self, geometry.clone())?;
            node.set_next_edges(vec![gradient_edge(self)?]);
            Some(Edge::new(Arc::new(node), 0))
        } else {
            None
        };
        make_variable_view(self, geometry, edge)
    }
}

/// Handle that does not keep its tensor alive.
///
/// Backward nodes that need to find their tensor again hold one of these,
/// since the tensor's metadata may own the node.
#[derive(Clone, Default)]
pub struct WeakTensor {
    inner: Weak<TensorImpl>,
}

impl WeakTensor {
    /// Owning handle, if the tensor is still alive.
    pub fn upgrade(&self) -> Option<Tensor> {
        self.inner.upgrade().map(|inner| Tensor { inner: Some(inner) })
    }
}

impl Debug for WeakTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakTensor(alive: {})", self.inner.strong_count() > 0)
    }
}

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_inner() {
            Some(inner) => f
                .debug_struct("Tensor")
                .field("sizes", &inner.geometry().sizes())
                .field("dtype", &inner.dtype())
                .field("device", &inner.device())
                .field("is_view", &self.is_view())
                .finish(),
            None => write!(f, "Tensor(undefined)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tensor() {
        let t = Tensor::new(&[2, 3]);
        assert!(t.defined());
        assert_eq!(t.sizes().unwrap(), &[2, 3]);
        assert_eq!(t.dtype().unwrap(), DType::F64);
        assert_eq!(t.device().unwrap(), Device::Cpu);
        assert_eq!(t.storage().unwrap().len(), 6);
        assert_eq!(t.version().unwrap(), 0);
        assert!(!t.is_view());
    }

    #[test]
    fn test_undefined_tensor() {
        let t = Tensor::undefined();
        assert!(!t.defined());
        assert!(matches!(
            t.version(),
            Err(AutogradError::UndefinedTensor { op: "version" })
        ));
        assert!(t.detach().is_err());
        assert!(t.is_same(&Tensor::default()));
        assert_eq!(format!("{:?}", t), "Tensor(undefined)");
    }

    #[test]
    fn test_clone_is_same() {
        let a = Tensor::new(&[3]);
        let b = a.clone();
        assert!(a.is_same(&b));
        assert!(!a.is_same(&Tensor::new(&[3])));
    }

    #[test]
    fn test_data_copies_share_storage() {
        let a = Tensor::new(&[4]);
        a.set_requires_grad(true).unwrap();

        let var_data = a.variable_data().unwrap();
        let tensor_data = a.tensor_data().unwrap();
        let detached = a.detach().unwrap();

        for t in [&var_data, &tensor_data, &detached] {
            assert!(t.storage().unwrap().is_alias_of(a.storage().unwrap()));
            assert!(!t.requires_grad());
            assert!(!t.is_same(&a));
        }

        a.inner("test").unwrap().bump_version();
        assert_eq!(tensor_data.version().unwrap(), 1);
        assert_eq!(detached.version().unwrap(), 1);
        assert_eq!(var_data.version().unwrap(), 0);
    }

    #[test]
    fn test_weak_tensor() {
        let a = Tensor::new(&[2]);
        let weak = a.downgrade();
        assert!(weak.upgrade().unwrap().is_same(&a));
        drop(a);
        assert!(weak.upgrade().is_none());
        assert!(Tensor::undefined().downgrade().upgrade().is_none());
    }

    #[test]
    fn test_as_strided_out_of_bounds() {
        let a = Tensor::new(&[2, 2]);
        let err = a.as_strided(&[2, 2], &[1, 2], 1).unwrap_err();
        assert!(matches!(
            err,
            AutogradError::ViewOutOfBounds {
                required: 5,
                available: 4
            }
        ));
    }

    #[test]
    fn test_view_without_grad_has_no_grad_fn() {
        let a = Tensor::new(&[4, 4]);
        let v = a.slice(&[0..2, 0..2]).unwrap();
        assert!(v.is_view());
        assert!(v.grad_fn().unwrap().is_none());
        assert!(v.storage().unwrap().is_alias_of(a.storage().unwrap()));
    }
}
