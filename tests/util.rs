#![allow(dead_code)]

use mesh_blocks::algs::communicator::LocalComm;
use mesh_blocks::topology::bounds::{ContinuousBounds, DiscreteBounds};

/// Run `f` once per simulated rank, each on its own thread, and collect the
/// results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let world = LocalComm::world(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

pub fn discrete(min: &[i64], max: &[i64]) -> DiscreteBounds {
    DiscreteBounds::from_corners(min, max).expect("valid corners")
}

pub fn continuous(min: &[f64], max: &[f64]) -> ContinuousBounds {
    ContinuousBounds::from_corners(min, max).expect("valid corners")
}
