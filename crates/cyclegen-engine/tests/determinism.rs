//! Op construction depends only on the cycle, never on the worker building it.

#![cfg(not(feature = "loom"))]

mod common;

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use common::{template, TestAdapter};
use cyclegen_core::{DriverAdapter, OpDispenser, OpTemplate, WorkerContext};

fn bound_template() -> OpTemplate {
    template("bound", "bind").with_binding("value", "HashRange(0,1000000);ToString()")
}

fn describe_all(dispenser: &Arc<dyn OpDispenser>, slot: usize, cycles: &[u64]) -> Vec<String> {
    let mut ctx = WorkerContext::new(slot);
    cycles
        .iter()
        .map(|cycle| dispenser.apply(*cycle, &mut ctx).unwrap().describe())
        .collect()
}

#[test]
fn test_same_cycles_build_same_ops_on_two_threads() {
    let dispenser = TestAdapter.dispenser(&bound_template()).unwrap();
    let cycles: Vec<u64> = (0..10_000u64)
        .map(|i| cyclegen_binder::hash_u64(i) % 1_000_000_000)
        .collect();

    let handles: Vec<_> = (0..2)
        .map(|slot| {
            let dispenser = Arc::clone(&dispenser);
            let mut mine = cycles.clone();
            if slot == 1 {
                mine.reverse();
            }
            thread::spawn(move || {
                let mut described = describe_all(&dispenser, slot, &mine);
                if slot == 1 {
                    described.reverse();
                }
                described
            })
        })
        .collect();

    let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0].len(), 10_000);
    assert_eq!(results[0], results[1]);
}

proptest! {
    #[test]
    fn prop_rebuilding_a_cycle_is_stable(cycle in any::<u64>(), warmup in 0usize..50) {
        let dispenser = TestAdapter.dispenser(&bound_template()).unwrap();
        let first = describe_all(&dispenser, 0, &[cycle]);

        let mut ctx = WorkerContext::new(1);
        for i in 0..warmup {
            dispenser.apply(i as u64, &mut ctx).unwrap();
        }
        let again = dispenser.apply(cycle, &mut ctx).unwrap().describe();
        prop_assert_eq!(&first[0], &again);
    }
}
