//! ICM pool benchmark suite
//!
//! Tracks the cost of the hot paths against the mock device:
//! - buddy split/merge throughput across orders
//! - chunk allocation and release round trips
//! - sync-reclaim passes with large hot lists
//!
//! Run with: `cargo bench --bench pool_bench`

use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use steerforge::icm::BuddyAllocator;
use steerforge::{IcmPool, MockDevice, PoolConfig, ResourceClass};

const HUGE_THRESHOLD: usize = usize::MAX / 2;

fn bench_buddy_split_merge() {
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut buddy = BuddyAllocator::new(10);
        let mut segs = Vec::with_capacity(64);
        for order in [0u8, 1, 2, 3, 4, 5] {
            for _ in 0..8 {
                if let Some(seg) = buddy.alloc(order) {
                    segs.push((seg, order));
                }
            }
        }
        for (seg, order) in segs.drain(..) {
            buddy.free(seg, order);
        }
        black_box(&buddy);
    }

    let elapsed = start.elapsed();
    println!(
        "buddy split/merge: {} cycles in {:?} ({:.0} cycles/sec)",
        iterations,
        elapsed,
        iterations as f64 / elapsed.as_secs_f64()
    );
}

fn bench_chunk_round_trip() {
    let device = Arc::new(MockDevice::new());
    let pool = IcmPool::new(
        device,
        ResourceClass::HeaderRewrite,
        PoolConfig::new(12, HUGE_THRESHOLD).unwrap(),
    )
    .unwrap();

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let order = (i % 4) as u8;
        let chunk = pool.alloc_chunk(order).unwrap();
        black_box(chunk.device_addr());
        pool.free_chunk(chunk).unwrap();
    }

    let elapsed = start.elapsed();
    println!(
        "chunk round trip: {} alloc/free in {:?} ({:.0} ops/sec)",
        iterations,
        elapsed,
        iterations as f64 / elapsed.as_secs_f64()
    );
}

fn bench_sync_reclaim_pass() {
    let device = Arc::new(MockDevice::new());
    let pool = IcmPool::new(
        device,
        ResourceClass::RuleMatching,
        PoolConfig::new(10, HUGE_THRESHOLD).unwrap(),
    )
    .unwrap();

    let passes = 100;
    let chunks_per_pass = 128;
    let start = Instant::now();

    for _ in 0..passes {
        let chunks: Vec<_> = (0..chunks_per_pass)
            .map(|_| pool.alloc_chunk(1).unwrap())
            .collect();
        for chunk in chunks {
            pool.free_chunk(chunk).unwrap();
        }
        pool.sync().unwrap();
    }

    let elapsed = start.elapsed();
    println!(
        "sync reclaim: {} passes x {} chunks in {:?} ({:.0} chunks/sec)",
        passes,
        chunks_per_pass,
        elapsed,
        (passes * chunks_per_pass) as f64 / elapsed.as_secs_f64()
    );
}

fn main() {
    println!("====================================");
    println!("SteerForge ICM Pool Benchmarks");
    println!("====================================");

    bench_buddy_split_merge();
    bench_chunk_round_trip();
    bench_sync_reclaim_pass();

    println!("====================================");
    println!("Benchmark Complete");
    println!("====================================");
}
