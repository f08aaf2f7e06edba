use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mesh_blocks::algs::communicator::NoComm;
use mesh_blocks::decomposition::{
    ContiguousAssigner, DecomposerOptions, RegularDecomposer, decompose_into,
};
use mesh_blocks::master::{Master, MasterConfig};
use mesh_blocks::topology::bounds::{ContinuousBounds, DiscreteBounds};

fn cube(nblocks: usize) -> RegularDecomposer<i64> {
    let domain = DiscreteBounds::from_corners(&[0, 0, 0], &[1023, 1023, 1023]).unwrap();
    let opts = DecomposerOptions {
        wrap: vec![true; 3],
        ghosts: vec![1; 3],
        ..Default::default()
    };
    RegularDecomposer::new(domain, nblocks, opts).unwrap()
}

fn bench_links(c: &mut Criterion) {
    let mut group = c.benchmark_group("links");
    for &nblocks in &[64usize, 512, 4096] {
        let dec = cube(nblocks);
        let assigner = ContiguousAssigner::new(1, nblocks);
        group.bench_with_input(BenchmarkId::from_parameter(nblocks), &nblocks, |b, &n| {
            b.iter(|| {
                let mut total = 0;
                for gid in 0..n {
                    total += dec.link(gid, &assigner).neighbors().len();
                }
                total
            })
        });
    }
    group.finish();
}

fn bench_point_location(c: &mut Criterion) {
    let domain = ContinuousBounds::from_corners(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let opts = DecomposerOptions {
        wrap: vec![true, true],
        ghosts: vec![0.01, 0.01],
        ..Default::default()
    };
    let dec = RegularDecomposer::new(domain, 1024, opts).unwrap();
    let mut rng = SmallRng::seed_from_u64(42);
    let points: Vec<[f64; 2]> = (0..10_000)
        .map(|_| [rng.r#gen::<f64>(), rng.r#gen::<f64>()])
        .collect();
    c.bench_function("point_to_gids", |b| {
        b.iter(|| points.iter().map(|p| dec.point_to_gids(p).len()).sum::<usize>())
    });
}

fn bench_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange");
    for &threads in &[1usize, 4] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &t| {
            let comm = NoComm;
            let dec = cube(64);
            let assigner = ContiguousAssigner::new(1, 64);
            let mut master = Master::new(
                &comm,
                MasterConfig {
                    threads: t,
                    immediate: false,
                    ..Default::default()
                },
            );
            decompose_into(&dec, &master, &assigner, |gid, _, _, _, _| vec![gid as f64; 512])
                .unwrap();
            b.iter(|| {
                master
                    .foreach(|v: &mut Vec<f64>, cp| cp.enqueue_all(v))
                    .unwrap();
                master.exchange().unwrap();
                master
                    .foreach(|v: &mut Vec<f64>, cp| {
                        for from in cp.incoming() {
                            let theirs: Vec<f64> = cp.dequeue(from)?;
                            v[0] += theirs[0];
                        }
                        Ok(())
                    })
                    .unwrap();
                master.execute().unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_links, bench_point_location, bench_exchange);
criterion_main!(benches);
