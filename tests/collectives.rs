mod util;

use mesh_blocks::algs::communicator::{Communicator, NoComm};
use mesh_blocks::decomposition::{Assigner, ContiguousAssigner};
use mesh_blocks::master::{Master, MasterConfig, ops};
use mesh_blocks::topology::link::{GenericLink, Gid};
use util::*;

#[derive(Debug, Default)]
struct Tally {
    gid: Gid,
    max: usize,
    sum: f64,
    all_even: bool,
}

fn register<C: Communicator>(master: &Master<'_, Tally, C>, assigner: &ContiguousAssigner) {
    for gid in assigner.local_gids(master.communicator().rank()) {
        master
            .add(gid, Tally { gid, ..Default::default() }, GenericLink::new())
            .unwrap();
    }
}

fn reduce_round<C: Communicator>(master: &mut Master<'_, Tally, C>) {
    master
        .foreach(|b, cp| {
            cp.all_reduce(b.gid, ops::Maximum);
            cp.all_reduce(b.gid as f64 + 0.5, ops::Sum);
            cp.all_reduce(b.gid % 2 == 0, ops::LogicalAnd);
            Ok(())
        })
        .unwrap();
    master.exchange().unwrap();
    master
        .foreach(|b, cp| {
            assert_eq!(cp.collectives(), 3);
            b.max = cp.get()?;
            b.sum = cp.get()?;
            b.all_even = cp.get()?;
            assert_eq!(cp.collectives(), 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn maximum_gid_on_one_rank() {
    let comm = NoComm;
    let mut master = Master::new(&comm, MasterConfig::default());
    register(&master, &ContiguousAssigner::new(1, 4));
    reduce_round(&mut master);
    for lid in 0..4 {
        let b = master.block_mut(lid).unwrap();
        assert_eq!(b.max, 3);
        assert_eq!(b.sum, 8.0);
        assert!(!b.all_even);
    }
}

#[test]
fn maximum_gid_across_two_ranks() {
    let results = run_ranks(2, |comm| {
        let assigner = ContiguousAssigner::new(2, 4);
        let mut master = Master::new(
            &comm,
            MasterConfig {
                threads: 2,
                ..Default::default()
            },
        );
        register(&master, &assigner);
        reduce_round(&mut master);
        (0..master.size())
            .map(|lid| {
                let b = master.block_mut(lid).unwrap();
                (b.max, b.sum)
            })
            .collect::<Vec<_>>()
    });
    for (max, sum) in results.into_iter().flatten() {
        assert_eq!(max, 3);
        assert_eq!(sum, 8.0);
    }
}

#[test]
fn custom_operator_and_scratch() {
    let comm = NoComm;
    let mut master = Master::new(&comm, MasterConfig::default());
    register(&master, &ContiguousAssigner::new(1, 3));
    master
        .foreach(|b, cp| {
            cp.scratch(format!("block {}", b.gid));
            cp.all_reduce(
                vec![b.gid],
                ops::ReduceFn(|a: &Vec<usize>, b: &Vec<usize>| {
                    let mut v = a.clone();
                    v.extend(b);
                    v.sort_unstable();
                    v
                }),
            );
            Ok(())
        })
        .unwrap();
    master.flush().unwrap();
    master
        .foreach(|b, cp| {
            assert_eq!(cp.get::<String>()?, format!("block {}", b.gid));
            assert_eq!(cp.get::<Vec<usize>>()?, vec![0, 1, 2]);
            Ok(())
        })
        .unwrap();
}
