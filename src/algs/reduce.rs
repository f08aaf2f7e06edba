//! Round-based k-ary reductions over a [`Master`].
//!
//! [`reduce`] walks the rounds of a [`ReducePartners`] topology. In round `r`
//! the user callback runs on every block active in `r`, with the blocks it
//! receives from (`in_link`) and sends to (`out_link`) resolved to ranks
//! through an [`Assigner`]. Queues are then flushed with the expected count
//! set to the number of messages the next round's active blocks wait for.

use std::ops::{Deref, DerefMut};

use crate::algs::communicator::Communicator;
use crate::block_error::BlockError;
use crate::decomposition::assigner::Assigner;
use crate::decomposition::partners::ReducePartners;
use crate::master::{Command, Master, Proxy, ProxyWithLink};
use crate::topology::link::{BlockId, Gid, Lid};

/// Proxy handed to reduction callbacks.
pub struct ReduceProxy<'r, 'p> {
    proxy: &'r mut Proxy<'p>,
    round: usize,
    in_link: Vec<BlockId>,
    out_link: Vec<BlockId>,
}

impl<'r, 'p> ReduceProxy<'r, 'p> {
    pub fn round(&self) -> usize {
        self.round
    }

    /// Blocks that sent to this one at the end of the previous round.
    pub fn in_link(&self) -> &[BlockId] {
        &self.in_link
    }

    /// Blocks this one sends to at the end of this round.
    pub fn out_link(&self) -> &[BlockId] {
        &self.out_link
    }
}

impl<'p> Deref for ReduceProxy<'_, 'p> {
    type Target = Proxy<'p>;
    fn deref(&self) -> &Proxy<'p> {
        self.proxy
    }
}

impl<'p> DerefMut for ReduceProxy<'_, 'p> {
    fn deref_mut(&mut self) -> &mut Proxy<'p> {
        self.proxy
    }
}

fn resolve<A: Assigner + ?Sized>(gids: Vec<Gid>, assigner: &A) -> Vec<BlockId> {
    gids.into_iter()
        .map(|g| BlockId::new(g, assigner.rank(g)))
        .collect()
}

/// Run `f` for `partners.rounds() + 1` rounds, flushing between rounds.
///
/// Pending `foreach` commands are left untouched; the expected message
/// count is restored afterwards.
pub fn reduce<B, C, A, P, F>(
    master: &mut Master<'_, B, C>,
    assigner: &A,
    partners: &P,
    f: F,
) -> Result<(), BlockError>
where
    B: Send,
    C: Communicator,
    A: Assigner + Sync + ?Sized,
    P: ReducePartners + Sync,
    F: Fn(&mut B, &mut ReduceProxy<'_, '_>, &P) -> Result<(), BlockError> + Send + Sync,
{
    let saved_expected = master.expected();
    let rounds = partners.rounds();
    for round in 0..=rounds {
        let f = &f;
        let cmd = Command::new(
            move |block: Option<&mut B>, cp: &mut ProxyWithLink<'_>| {
                let Some(block) = block else {
                    return Ok(());
                };
                let gid = cp.gid();
                let in_link = resolve(partners.incoming(round, gid), assigner);
                let out_link = resolve(partners.outgoing(round, gid), assigner);
                let mut rp = ReduceProxy {
                    proxy: cp.proxy_mut(),
                    round,
                    in_link,
                    out_link,
                };
                f(block, &mut rp, partners)?;
                for to in std::mem::take(&mut rp.out_link) {
                    rp.touch(to);
                }
                Ok(())
            },
            Some(Box::new(move |_lid: Lid, gid: Gid| !partners.active(round, gid))),
        );
        master.execute_commands(&[cmd])?;
        if round == rounds {
            break;
        }

        let next = round + 1;
        let expected: usize = master
            .gids()
            .into_iter()
            .filter(|&g| partners.active(next, g))
            .map(|g| {
                partners
                    .incoming(next, g)
                    .into_iter()
                    .filter(|&src| src != g)
                    .count()
            })
            .sum();
        master.set_expected(expected);
        master.flush()?;
        log::debug!("reduce round {round} done, next round expects {expected} message(s)");
    }
    master.set_expected(saved_expected);
    Ok(())
}
