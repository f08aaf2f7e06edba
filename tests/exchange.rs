mod util;

use mesh_blocks::algs::communicator::{Communicator, NoComm};
use mesh_blocks::block_error::BlockError;
use mesh_blocks::decomposition::{
    Assigner, ContiguousAssigner, DecomposerOptions, RegularDecomposer, decompose_into,
};
use mesh_blocks::master::{Master, MasterConfig};
use mesh_blocks::topology::link::{BlockId, GenericLink, Gid};
use util::*;

#[derive(Debug, Default)]
struct Cell {
    gid: Gid,
    received: Vec<i32>,
}

#[test]
fn array_crosses_ranks() {
    let got = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut master: Master<'_, Cell, _> = Master::new(&comm, MasterConfig::default());
        // block 0 on rank 0 talks to block 1 on rank 1
        let peer = BlockId::new(1 - rank, 1 - rank);
        master
            .add(rank, Cell { gid: rank, ..Default::default() }, GenericLink::from_neighbors(vec![peer]))
            .unwrap();
        assert_eq!(master.expected(), 1);

        master
            .foreach(|b: &mut Cell, cp| {
                if b.gid == 0 {
                    let to = cp.link().target(0);
                    cp.enqueue(to, &[7i32, 8, 9])?;
                }
                Ok(())
            })
            .unwrap();
        master.exchange().unwrap();
        assert_eq!(master.received(), 1);

        master
            .foreach(|b: &mut Cell, cp| {
                if b.gid == 1 {
                    let arr: [i32; 3] = cp.dequeue(0)?;
                    b.received.extend(arr);
                } else {
                    // the empty queue from block 1 still arrives
                    assert_eq!(cp.incoming(), vec![1]);
                    assert_eq!(cp.incoming_size(1), 0);
                }
                Ok(())
            })
            .unwrap();
        std::mem::take(&mut master.block_mut(0).unwrap().received)
    });
    assert!(got[0].is_empty());
    assert_eq!(got[1], vec![7, 8, 9]);
}

#[test]
fn ring_of_eight_blocks_over_two_ranks() {
    let sums = run_ranks(2, |comm| {
        let dec = RegularDecomposer::new(
            discrete(&[0], &[799]),
            8,
            DecomposerOptions {
                wrap: vec![true],
                ..Default::default()
            },
        )
        .unwrap();
        let assigner = ContiguousAssigner::new(2, 8);
        let mut master = Master::new(
            &comm,
            MasterConfig {
                threads: 2,
                immediate: false,
                ..Default::default()
            },
        );
        decompose_into(&dec, &master, &assigner, |gid, _, _, _, _| Cell {
            gid,
            ..Default::default()
        })
        .unwrap();

        master
            .foreach(|b: &mut Cell, cp| cp.enqueue_all(&(b.gid as i32)))
            .unwrap();
        assert_eq!(master.pending(), 1);
        master.exchange().unwrap();
        assert_eq!(master.pending(), 0);
        assert_eq!(master.received(), master.expected());

        master
            .foreach(|b: &mut Cell, cp| {
                for from in cp.incoming() {
                    let v: i32 = cp.dequeue(from)?;
                    b.received.push(v);
                }
                Ok(())
            })
            .unwrap();
        master.execute().unwrap();

        let mut out = Vec::new();
        for lid in 0..master.size() {
            let b = master.block_mut(lid).unwrap();
            b.received.sort_unstable();
            out.push((b.gid, b.received.clone()));
        }
        out
    });
    let all: Vec<(Gid, Vec<i32>)> = sums.into_iter().flatten().collect();
    assert_eq!(all.len(), 8);
    for (gid, received) in all {
        let left = (gid + 7) % 8;
        let right = (gid + 1) % 8;
        let mut want = vec![left as i32, right as i32];
        want.sort_unstable();
        assert_eq!(received, want, "block {gid}");
    }
}

#[test]
fn self_addressed_queue_is_delivered_but_not_counted() {
    let comm = NoComm;
    let mut master: Master<'_, Cell, _> = Master::new(&comm, MasterConfig::default());
    master.add(0, Cell::default(), GenericLink::new()).unwrap();
    master
        .foreach(|_, cp| cp.enqueue(BlockId::new(0, 0), &42i32))
        .unwrap();
    master.exchange().unwrap();
    assert_eq!(master.received(), 0);
    master
        .foreach(|b, cp| {
            b.received.push(cp.dequeue(0)?);
            Ok(())
        })
        .unwrap();
    assert_eq!(master.block_mut(0).unwrap().received, vec![42]);
}

#[test]
fn unread_queues_are_gone_after_the_next_round() {
    let comm = NoComm;
    let mut master: Master<'_, Cell, _> = Master::new(&comm, MasterConfig::default());
    master
        .add(0, Cell::default(), GenericLink::from_neighbors(vec![BlockId::new(1, 0)]))
        .unwrap();
    master
        .add(1, Cell::default(), GenericLink::from_neighbors(vec![BlockId::new(0, 0)]))
        .unwrap();
    master
        .foreach(|b, cp| cp.enqueue_all(&(b.gid as u8)))
        .unwrap();
    master.exchange().unwrap();
    // read nothing this round
    master.foreach(|_, _| Ok(())).unwrap();
    master
        .foreach(|_, cp| {
            assert!(cp.incoming().is_empty());
            Ok(())
        })
        .unwrap();
    let err = master.foreach(|_, cp| cp.dequeue::<u8>(1).map(drop));
    assert!(matches!(err, Err(BlockError::MissingQueue { .. })));
}

#[test]
fn empty_execute_is_a_no_op() {
    let comm = NoComm;
    let mut master: Master<'_, Cell, _> = Master::new(
        &comm,
        MasterConfig {
            immediate: false,
            ..Default::default()
        },
    );
    master.add(3, Cell::default(), GenericLink::new()).unwrap();
    master.execute().unwrap();
    master.exchange().unwrap();
    assert_eq!(master.received(), 0);
    assert_eq!(master.in_memory(), 1);
}

#[test]
fn concurrent_adds_get_distinct_lids() {
    use rayon::prelude::*;

    let comm = NoComm;
    let master: Master<'_, Cell, _> = Master::new(&comm, MasterConfig::default());
    let assigner = ContiguousAssigner::new(1, 64);
    let mut lids: Vec<usize> = assigner
        .local_gids(0)
        .into_par_iter()
        .map(|gid| master.add(gid, Cell { gid, ..Default::default() }, GenericLink::new()).unwrap())
        .collect();
    lids.sort_unstable();
    assert_eq!(lids, (0..64).collect::<Vec<_>>());
    for gid in 0..64 {
        assert_eq!(master.gid(master.lid(gid).unwrap()), Some(gid));
    }
    assert!(matches!(
        master.add(5, Cell::default(), GenericLink::new()),
        Err(BlockError::DuplicateGid(5))
    ));
}

#[test]
fn release_and_clear() {
    let comm = NoComm;
    let mut master: Master<'_, Cell, _> = Master::new(&comm, MasterConfig::default());
    master
        .add(0, Cell { gid: 0, ..Default::default() }, GenericLink::from_neighbors(vec![BlockId::new(1, 0)]))
        .unwrap();
    master
        .add(1, Cell { gid: 1, ..Default::default() }, GenericLink::from_neighbors(vec![BlockId::new(0, 0)]))
        .unwrap();
    assert_eq!(master.expected(), 2);

    let (cell, link) = master.release(0).unwrap();
    assert_eq!(cell.gid, 0);
    assert_eq!(link.size(), 1);
    assert_eq!(master.expected(), 1);
    assert_eq!(master.gids(), vec![1]);
    assert!(!master.local(0));
    assert!(matches!(master.release(0), Err(BlockError::UnknownLid(0))));

    master.clear().unwrap();
    assert_eq!(master.size(), 0);
    assert_eq!(master.in_memory(), 0);
    assert_eq!(master.expected(), 0);
}
