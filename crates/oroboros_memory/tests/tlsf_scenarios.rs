//! # TLSF Allocator Verification
//!
//! End-to-end checks over a 1 MiB arena:
//!
//! 1. **Scenarios**: the canonical allocate/free sequences
//! 2. **Properties**: conservation, bucket consistency, sizing, no overlap,
//!    coalescing and full-cycle reuse under randomized workloads
//!
//! Run with: cargo test -p oroboros_memory --test tlsf_scenarios

use oroboros_memory::{ArenaPtr, TlsfAllocator, BLOCK_OVERHEAD, HEAD_TAG_SIZE};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const ARENA_SIZE: usize = 1_048_576;

fn one_mib() -> TlsfAllocator<Vec<u8>> {
    let mut tlsf = TlsfAllocator::new();
    tlsf.initialize(vec![0u8; ARENA_SIZE], 3).unwrap();
    tlsf
}

/// Data range `[start, end)` of a live allocation.
fn range(tlsf: &TlsfAllocator<Vec<u8>>, ptr: ArenaPtr) -> (u32, u32) {
    let size = tlsf.usable_size(ptr).unwrap();
    (ptr.offset(), ptr.offset() + size)
}

fn assert_no_overlap(tlsf: &TlsfAllocator<Vec<u8>>, live: &[ArenaPtr]) {
    let mut ranges: Vec<(u32, u32)> = live.iter().map(|ptr| range(tlsf, *ptr)).collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "live ranges overlap: {pair:?}");
    }
}

fn all_size_at(tlsf: &TlsfAllocator<Vec<u8>>, header: u32) -> u32 {
    tlsf.blocks()
        .find(|info| info.offset == header)
        .map(|info| info.all_size)
        .unwrap()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn scenario_initialize_one_mib() {
    let tlsf = one_mib();
    assert!(tlsf.is_initialized());
    assert_eq!(tlsf.capacity(), ARENA_SIZE as u64 - 3 * u64::from(BLOCK_OVERHEAD));
    assert!(tlsf.verify().is_ok());
}

#[test]
fn scenario_two_allocations_do_not_overlap() {
    let mut tlsf = one_mib();
    let a = tlsf.allocate(64).unwrap();
    let b = tlsf.allocate(128).unwrap();

    assert_ne!(a, b);
    assert_no_overlap(&tlsf, &[a, b]);
    assert!(tlsf.usable_size(a).unwrap() >= 64);
    assert!(tlsf.usable_size(b).unwrap() >= 128);
}

#[test]
fn scenario_freed_neighbors_serve_larger_request() {
    let mut tlsf = one_mib();
    let a = tlsf.allocate(64).unwrap();
    let b = tlsf.allocate(128).unwrap();

    assert!(tlsf.deallocate(a));
    assert!(tlsf.deallocate(b));
    let c = tlsf.allocate(190).unwrap();
    assert!(tlsf.usable_size(c).unwrap() >= 190);
    assert_eq!(tlsf.verify().unwrap().used_blocks, 1);
}

#[test]
fn scenario_request_larger_than_arena() {
    let mut tlsf = one_mib();
    assert!(tlsf.allocate(2_000_000).is_none());
    assert!(tlsf.allocate(u64::MAX).is_none());
    // Nothing was consumed by the failed requests.
    assert_eq!(tlsf.stats().used_blocks, 0);
}

#[test]
fn scenario_zero_size_request() {
    let mut tlsf = one_mib();
    assert!(tlsf.allocate(0).is_none());
}

#[test]
fn scenario_exhaust_then_full_reuse() {
    let mut tlsf = one_mib();

    let mut live = Vec::new();
    while let Some(ptr) = tlsf.allocate(8) {
        live.push(ptr);
    }
    let count = live.len();
    assert!(count > 30_000, "only {count} blocks fit");
    assert_eq!(tlsf.stats().free_blocks, 0);
    assert_eq!(tlsf.leak_report().len(), count);

    for ptr in live.into_iter().rev() {
        assert!(tlsf.deallocate(ptr));
    }
    assert!(tlsf.leak_report().is_empty());

    let whole = tlsf.allocate(tlsf.capacity()).unwrap();
    assert_eq!(u64::from(tlsf.usable_size(whole).unwrap()), tlsf.capacity());
    assert!(tlsf.verify().is_ok());
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn property_coalescing_either_order() {
    for free_low_first in [true, false] {
        let mut tlsf = one_mib();
        let low = tlsf.allocate(100).unwrap();
        let high = tlsf.allocate(300).unwrap();
        let _fence = tlsf.allocate(8).unwrap();

        let low_header = low.offset() - HEAD_TAG_SIZE;
        let high_header = high.offset() - HEAD_TAG_SIZE;
        let expected = all_size_at(&tlsf, low_header) + all_size_at(&tlsf, high_header);

        let order = if free_low_first { [low, high] } else { [high, low] };
        for ptr in order {
            assert!(tlsf.deallocate(ptr));
        }

        assert_eq!(all_size_at(&tlsf, low_header), expected);
        assert!(tlsf.blocks().all(|info| info.offset != high_header));
        assert!(tlsf.verify().is_ok());
    }
}

#[test]
fn property_random_workload_keeps_invariants() {
    let mut rng = StdRng::seed_from_u64(0x0B0B_0205);
    let mut tlsf = one_mib();
    let mut live: Vec<(ArenaPtr, u64)> = Vec::new();

    for step in 0..4_000 {
        let free = !live.is_empty() && rng.gen_bool(0.45);
        if free {
            let index = rng.gen_range(0..live.len());
            let (ptr, _) = live.swap_remove(index);
            assert!(tlsf.deallocate(ptr));
        } else {
            let size = if rng.gen_bool(0.1) {
                rng.gen_range(1_024..32_768)
            } else {
                rng.gen_range(1..512)
            };
            if let Some(ptr) = tlsf.allocate(size) {
                // Sizing contract.
                assert!(u64::from(tlsf.usable_size(ptr).unwrap()) >= size);
                live.push((ptr, size));
            }
        }

        if step % 50 == 0 {
            let stats = tlsf.verify().unwrap();
            assert_eq!(stats.used_blocks, live.len());
            let ptrs: Vec<ArenaPtr> = live.iter().map(|(ptr, _)| *ptr).collect();
            assert_no_overlap(&tlsf, &ptrs);
        }
    }

    // Conservation: block walk covers the arena exactly.
    let walked: u64 = tlsf.blocks().map(|info| u64::from(info.all_size)).sum();
    assert_eq!(walked, ARENA_SIZE as u64);
}

#[test]
fn property_contents_survive_neighbor_churn() {
    let mut tlsf = one_mib();
    let keep = tlsf.allocate(256).unwrap();
    tlsf.data_mut(keep).unwrap().fill(0x5A);

    for round in 0..200u64 {
        let a = tlsf.allocate(8 + round).unwrap();
        tlsf.data_mut(a).unwrap().fill(0xFF);
        let b = tlsf.allocate(512).unwrap();
        assert!(tlsf.deallocate(a));
        assert!(tlsf.deallocate(b));
    }

    assert!(tlsf.data(keep).unwrap().iter().all(|byte| *byte == 0x5A));
}

#[test]
fn property_full_cycle_reuse_shuffled() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut tlsf = one_mib();

    let mut live = Vec::new();
    loop {
        let size = rng.gen_range(8..4_096);
        match tlsf.allocate(size) {
            Some(ptr) => live.push(ptr),
            None => break,
        }
    }
    // Top the arena off with minimum blocks.
    while let Some(ptr) = tlsf.allocate(8) {
        live.push(ptr);
    }
    assert_eq!(tlsf.stats().free_blocks, 0);

    live.shuffle(&mut rng);
    for ptr in live {
        assert!(tlsf.deallocate(ptr));
    }

    assert!(tlsf.leak_report().is_empty());
    let stats = tlsf.verify().unwrap();
    assert_eq!(stats.free_blocks, 1);
    assert!(tlsf.allocate(tlsf.capacity()).is_some());
}

#[test]
fn property_every_exponent_round_trips() {
    for exponent in 1..=5 {
        let mut tlsf = TlsfAllocator::new();
        tlsf.initialize(vec![0u8; 64 * 1024], exponent).unwrap();

        let ptrs: Vec<ArenaPtr> = (1..200u64).filter_map(|size| tlsf.allocate(size * 3)).collect();
        assert_eq!(ptrs.len(), 199);
        for ptr in &ptrs {
            assert!(tlsf.usable_size(*ptr).unwrap() >= 1 << exponent);
        }
        for ptr in ptrs {
            assert!(tlsf.deallocate(ptr));
        }
        assert_eq!(tlsf.verify().unwrap().free_blocks, 1);
    }
}

#[test]
fn property_destroy_leaves_caller_memory_intact() {
    let mut memory = vec![0u8; 4096];
    {
        let mut tlsf = TlsfAllocator::new();
        tlsf.initialize(memory.as_mut_slice(), 3).unwrap();
        let ptr = tlsf.allocate(16).unwrap();
        tlsf.data_mut(ptr).unwrap().copy_from_slice(b"arena-is-caller!");
        let returned = tlsf.destroy().unwrap();
        assert_eq!(returned.len(), 4096);
    }
    // The caller still owns the bytes, payload included.
    let found = memory.windows(16).any(|window| window == b"arena-is-caller!");
    assert!(found);
}
