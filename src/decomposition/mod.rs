//! Regular decomposition of a box domain and its reduction topologies.
//!
//! [`decompose_into`] registers every block a rank owns with a [`Master`];
//! [`decompose_update`] recomputes links for blocks that are already
//! registered.

pub mod assigner;
pub mod partners;
pub mod regular;

pub use assigner::{Assigner, ContiguousAssigner, RoundRobinAssigner};
pub use partners::{
    DimK, ReducePartners, RegularAllReducePartners, RegularBroadcastPartners,
    RegularMergePartners, RegularPartners, RegularSwapPartners,
};
pub use regular::{DecomposerOptions, RegularDecomposer};

use crate::algs::communicator::Communicator;
use crate::block_error::BlockError;
use crate::master::Master;
use crate::topology::bounds::{Bounds, Coordinate};
use crate::topology::link::{Gid, Lid, RegularLink};

/// Create and register a block for every gid the master's rank owns.
///
/// `create(gid, core, bounds, domain, link)` builds the block; the link is
/// then handed to the master.
pub fn decompose_into<Cd, B, C, A, F>(
    decomposer: &RegularDecomposer<Cd>,
    master: &Master<'_, B, C>,
    assigner: &A,
    mut create: F,
) -> Result<Vec<Lid>, BlockError>
where
    Cd: Coordinate,
    B: Send,
    C: Communicator,
    A: Assigner + ?Sized,
    F: FnMut(Gid, &Bounds<Cd>, &Bounds<Cd>, &Bounds<Cd>, &RegularLink<Cd>) -> B,
{
    let rank = master.communicator().rank();
    let mut lids = Vec::new();
    for gid in assigner.local_gids(rank) {
        let link = decomposer.link(gid, assigner);
        let block = create(gid, link.core(), link.bounds(), decomposer.domain(), &link);
        lids.push(master.add(gid, block, Cd::into_link(link))?);
    }
    log::debug!("rank {rank} registered {} block(s)", lids.len());
    Ok(lids)
}

/// Replace the links of blocks already registered and let `update` adjust
/// each block to its (possibly new) bounds.
pub fn decompose_update<Cd, B, C, A, F>(
    decomposer: &RegularDecomposer<Cd>,
    master: &mut Master<'_, B, C>,
    assigner: &A,
    mut update: F,
) -> Result<(), BlockError>
where
    Cd: Coordinate,
    B: Send,
    C: Communicator,
    A: Assigner + ?Sized,
    F: FnMut(Gid, &Bounds<Cd>, &Bounds<Cd>, &Bounds<Cd>, &RegularLink<Cd>, &mut B),
{
    let rank = master.communicator().rank();
    for gid in assigner.local_gids(rank) {
        let lid = master.lid(gid).ok_or(BlockError::UnknownGid(gid))?;
        let link = decomposer.link(gid, assigner);
        let (core, bounds) = (*link.core(), *link.bounds());
        master.replace_link(lid, Cd::into_link(link.clone()))?;
        let block = master.get(lid)?;
        update(gid, &core, &bounds, decomposer.domain(), &link, block);
    }
    Ok(())
}
