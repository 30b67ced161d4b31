//! Integration tests for the autograd accessor layer.

use ndgrad::autograd::{
    AccumulateGrad, CppFunctionPreHook, Edge, HooksMap, Node, NodeCore, add_hook, bump_version,
    clear_hooks, external_object, get_autograd_meta, grad_accumulator, grad_fn_unsafe,
    gradient_edge, hooks, materialize_autograd_meta, same_node, set_external_object,
    set_grad_accumulator, set_gradient_edge, set_name, set_version_counter,
    try_get_grad_accumulator, version_counter,
};
use ndgrad::{AutogradError, DType, Device, ErrorKind, Tensor, VersionCounter};
use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MulBackward {
    core: NodeCore,
}

impl Node for MulBackward {
    fn name(&self) -> &'static str {
        "MulBackward"
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn leaf(shape: &[usize]) -> Tensor {
    let t = Tensor::new(shape);
    t.set_requires_grad(true).unwrap();
    t
}

#[test]
fn test_metadata_is_lazy() {
    let t = Tensor::new(&[2, 2]);
    assert!(get_autograd_meta(&t).unwrap().is_none());
    assert!(!t.requires_grad());
    assert!(t.is_leaf().unwrap());
    assert_eq!(t.name().unwrap(), "");
    assert!(hooks(&t).unwrap().is_empty());
    assert!(get_autograd_meta(&t).unwrap().is_none());

    let meta = materialize_autograd_meta(&t).unwrap();
    assert!(!meta.requires_grad_flag());
    assert!(get_autograd_meta(&t).unwrap().is_some());
}

#[test]
fn test_undefined_tensor_errors() {
    let t = Tensor::undefined();
    let errors = [
        materialize_autograd_meta(&t).map(|_| ()).unwrap_err(),
        gradient_edge(&t).map(|_| ()).unwrap_err(),
        bump_version(&t).map(|_| ()).unwrap_err(),
        version_counter(&t).map(|_| ()).unwrap_err(),
        set_name(&t, "x").unwrap_err(),
        external_object(&t).map(|_| ()).unwrap_err(),
        t.set_requires_grad(true).unwrap_err(),
    ];
    for err in errors {
        assert!(matches!(err, AutogradError::UndefinedTensor { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
    assert!(!t.requires_grad());
    assert!(!t.is_view());
    assert_eq!(t.output_nr(), 0);
}

#[test]
fn test_name_round_trip() {
    let t = Tensor::new(&[1]);
    set_name(&t, "weight").unwrap();
    assert_eq!(t.name().unwrap(), "weight");
    // Clones share metadata, detached copies don't.
    assert_eq!(t.clone().name().unwrap(), "weight");
    assert_eq!(t.detach().unwrap().name().unwrap(), "");
}

#[test]
fn test_external_object_slot() {
    let t = Tensor::new(&[1]);
    assert!(external_object(&t).unwrap().is_null());

    let mut owner = 17_u64;
    let ptr = (&raw mut owner).cast::<c_void>();
    set_external_object(&t, ptr).unwrap();
    assert_eq!(external_object(&t).unwrap(), ptr);
    assert!(external_object(&t.detach().unwrap()).unwrap().is_null());
}

#[test]
fn test_grad_accumulator_is_cached() {
    let t = leaf(&[3]);
    assert!(try_get_grad_accumulator(&t).unwrap().is_none());

    let first = grad_accumulator(&t).unwrap().unwrap();
    let second = grad_accumulator(&t).unwrap().unwrap();
    assert!(same_node(&first, &second));
    assert!(same_node(&try_get_grad_accumulator(&t).unwrap().unwrap(), &first));

    let accumulate = first.as_any().downcast_ref::<AccumulateGrad>().unwrap();
    assert!(accumulate.variable().unwrap().is_same(&t));
    let input = first.input_metadata(0).unwrap();
    assert_eq!(input.shape(), &[3]);
    assert_eq!(input.dtype(), DType::F64);
    assert_eq!(input.device(), Device::Cpu);
}

#[test]
fn test_grad_accumulator_is_weak() {
    let t = leaf(&[3]);
    let first = grad_accumulator(&t).unwrap().unwrap();
    let first_seq = first.sequence_nr();
    drop(first);

    assert!(try_get_grad_accumulator(&t).unwrap().is_none());
    let second = grad_accumulator(&t).unwrap().unwrap();
    assert_ne!(second.sequence_nr(), first_seq);
}

#[test]
fn test_set_grad_accumulator() {
    let t = leaf(&[2]);
    let external: Arc<dyn Node> = Arc::new(AccumulateGrad::new(&t).unwrap());
    set_grad_accumulator(&t, Arc::downgrade(&external)).unwrap();
    assert!(same_node(&grad_accumulator(&t).unwrap().unwrap(), &external));
}

#[test]
fn test_grad_accumulator_without_requires_grad() {
    let t = Tensor::new(&[2]);
    assert!(grad_accumulator(&t).unwrap().is_none());
    materialize_autograd_meta(&t).unwrap();
    assert!(grad_accumulator(&t).unwrap().is_none());
    assert!(!gradient_edge(&t).unwrap().is_valid());
}

#[test]
fn test_non_leaf_has_no_accumulator() {
    let t = Tensor::new(&[2]);
    let mul: Arc<dyn Node> = Arc::new(MulBackward::default());
    set_gradient_edge(&t, Edge::new(mul.clone(), 1)).unwrap();

    assert!(matches!(
        grad_accumulator(&t),
        Err(AutogradError::NotALeaf)
    ));
    assert!(!t.is_leaf().unwrap());
    assert!(t.requires_grad());
    assert_eq!(t.output_nr(), 1);
    assert_eq!(gradient_edge(&t).unwrap(), Edge::new(mul.clone(), 1));
    assert!(same_node(&grad_fn_unsafe(&t).unwrap().unwrap(), &mul));

    assert!(matches!(
        t.set_requires_grad(false),
        Err(AutogradError::RequiresGradOnNonLeaf)
    ));
    t.set_requires_grad(true).unwrap();
}

#[test]
fn test_set_gradient_edge_replaces_producer() {
    let t = Tensor::new(&[2]);
    let a: Arc<dyn Node> = Arc::new(MulBackward::default());
    let b: Arc<dyn Node> = Arc::new(MulBackward::default());
    set_gradient_edge(&t, Edge::new(a, 0)).unwrap();
    set_gradient_edge(&t, Edge::new(b.clone(), 2)).unwrap();

    assert!(same_node(&t.grad_fn().unwrap().unwrap(), &b));
    assert_eq!(t.output_nr(), 2);
}

#[test]
fn test_set_version_counter() {
    let a = Tensor::new(&[2]);
    let b = Tensor::new(&[2]);
    let shared = VersionCounter::with_version(5);
    set_version_counter(&a, &shared).unwrap();
    set_version_counter(&b, &shared).unwrap();

    assert_eq!(bump_version(&a).unwrap(), 6);
    assert_eq!(b.version().unwrap(), 6);
    assert!(version_counter(&a).unwrap().shares_with(&shared));
}

#[test]
fn test_add_and_clear_hooks() {
    let t = Tensor::new(&[2]);
    let map = Arc::new(HooksMap::new());
    add_hook(&t, Arc::new(CppFunctionPreHook::new(map.clone(), 0))).unwrap();
    add_hook(&t, Arc::new(CppFunctionPreHook::new(map, 0))).unwrap();
    assert_eq!(hooks(&t).unwrap().len(), 2);

    clear_hooks(&t).unwrap();
    assert!(hooks(&t).unwrap().is_empty());
}

#[test]
fn test_requires_grad_toggle_on_leaf() {
    let t = Tensor::new(&[2]);
    t.set_requires_grad(true).unwrap();
    assert!(t.requires_grad());
    t.set_requires_grad(false).unwrap();
    assert!(!t.requires_grad());
    assert!(t.is_leaf().unwrap());
}
