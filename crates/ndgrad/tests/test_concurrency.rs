//! Integration tests for concurrent access to autograd metadata.

use ndgrad::Tensor;
use ndgrad::autograd::{Node, bump_version, get_autograd_meta, grad_accumulator, same_node};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const NUM_THREADS: usize = 8;
const NUM_READERS: usize = 4;

fn leaf(shape: &[usize]) -> Tensor {
    let t = Tensor::new(shape);
    t.set_requires_grad(true).unwrap();
    t
}

#[test]
fn test_concurrent_grad_accumulator_is_unique() {
    let t = leaf(&[16]);
    let barrier = Barrier::new(NUM_THREADS);

    let accumulators: Vec<Arc<dyn Node>> = thread::scope(|s| {
        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    grad_accumulator(&t).unwrap().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &accumulators[0];
    assert!(accumulators.iter().all(|acc| same_node(acc, first)));
}

#[test]
fn test_concurrent_stale_view_grad_fn_is_unique() {
    let root = leaf(&[8, 8]);
    let v = root.slice(&[0..4, 0..8]).unwrap();
    let before = v.grad_fn().unwrap().unwrap();
    bump_version(&root).unwrap();

    let barrier = Barrier::new(NUM_THREADS);
    let rebuilt: Vec<Arc<dyn Node>> = thread::scope(|s| {
        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    v.grad_fn().unwrap().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &rebuilt[0];
    assert!(!same_node(first, &before));
    assert!(rebuilt.iter().all(|node| same_node(node, first)));
    assert!(same_node(&v.grad_fn().unwrap().unwrap(), first));
}

#[test]
fn test_versions_are_monotonic_across_aliases() {
    let root = leaf(&[32]);
    let view = root.as_strided(&[4], &[2], 1).unwrap();
    let aliases: Vec<Tensor> = (0..NUM_THREADS)
        .map(|i| match i % 3 {
            0 => root.clone(),
            1 => root.detach().unwrap(),
            _ => root.as_strided(&[4], &[2], i).unwrap(),
        })
        .collect();

    let mut rng = rand::rng();
    let bumps: Vec<u32> = (0..NUM_THREADS)
        .map(|_| rng.random_range(1..50))
        .collect();
    let writers_done = AtomicBool::new(false);

    thread::scope(|s| {
        let readers: Vec<_> = (0..NUM_READERS)
            .map(|_| {
                s.spawn(|| {
                    let mut last = root.version().unwrap();
                    loop {
                        let finished = writers_done.load(Ordering::Acquire);
                        let now = view.version().unwrap();
                        assert!(now >= last);
                        last = now;
                        assert!(view.grad_fn().unwrap().is_some());
                        if finished {
                            break;
                        }
                    }
                })
            })
            .collect();

        let writers: Vec<_> = aliases
            .iter()
            .zip(&bumps)
            .map(|(alias, &count)| {
                s.spawn(move || {
                    let mut last = alias.version().unwrap();
                    for _ in 0..count {
                        let now = bump_version(alias).unwrap();
                        assert!(now > last);
                        last = now;
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        writers_done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
    });

    let total = bumps.iter().sum::<u32>();
    assert_eq!(root.version().unwrap(), total);
    view.grad_fn().unwrap();
    assert_eq!(
        get_autograd_meta(&view).unwrap().unwrap().attr_version(),
        total
    );
}
