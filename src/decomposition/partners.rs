//! Multi-round k-ary partner topologies over a regular decomposition.
//!
//! [`RegularPartners`] splits each axis's division count into per-round group
//! sizes and interleaves the axes round-robin. Each round groups blocks along
//! a single axis; the wrappers ([`RegularMergePartners`],
//! [`RegularSwapPartners`], [`RegularBroadcastPartners`],
//! [`RegularAllReducePartners`]) turn those groups into the
//! active/incoming/outgoing sets consumed by
//! [`reduce`](crate::algs::reduce::reduce).

use crate::decomposition::regular::{coords_to_gid, gid_to_coords, RegularDecomposer};
use crate::topology::bounds::Coordinate;
use crate::topology::link::Gid;

/// Round structure of a reduction, as seen by the driver.
///
/// A reduction with `rounds() == R` invokes the user callback `R + 1`
/// times; `incoming(0)` and `outgoing(R)` are always empty.
pub trait ReducePartners {
    fn rounds(&self) -> usize;
    /// Whether `gid` takes part in round `round`.
    fn active(&self, round: usize, gid: Gid) -> bool;
    /// Blocks `gid` receives from at the start of `round`.
    fn incoming(&self, round: usize, gid: Gid) -> Vec<Gid>;
    /// Blocks `gid` sends to at the end of `round`.
    fn outgoing(&self, round: usize, gid: Gid) -> Vec<Gid>;
}

/// Group size of one round along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DimK {
    pub dim: usize,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegularPartners {
    divisions: Vec<usize>,
    kvs: Vec<DimK>,
    contiguous: bool,
    steps: Vec<usize>,
}

/// Split `tot` into group sizes: `k` while it divides, else the largest
/// divisor below `k`, else whatever is left.
fn factor_k(k: usize, tot: usize) -> Vec<usize> {
    let mut kvs = Vec::new();
    let mut rem = tot;
    while rem > 1 {
        if rem % k == 0 {
            kvs.push(k);
            rem /= k;
        } else if let Some(j) = (2..k).rev().find(|j| rem % j == 0) {
            kvs.push(j);
            rem /= j;
        } else {
            kvs.push(rem);
            rem = 1;
        }
    }
    kvs
}

impl RegularPartners {
    /// `k` is the target group size per round; `contiguous` selects whether
    /// the first rounds group nearby blocks (step grows) or far-apart ones
    /// (step shrinks).
    pub fn new(divisions: &[usize], k: usize, contiguous: bool) -> Self {
        assert!(k >= 2, "group size must be at least 2");
        let per_axis: Vec<Vec<usize>> = divisions.iter().map(|&d| factor_k(k, d)).collect();

        let mut kvs = Vec::new();
        let mut next = vec![0usize; divisions.len()];
        loop {
            let mut changed = false;
            for (dim, sizes) in per_axis.iter().enumerate() {
                if let Some(&size) = sizes.get(next[dim]) {
                    kvs.push(DimK { dim, size });
                    next[dim] += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut partners = Self {
            divisions: divisions.to_vec(),
            kvs,
            contiguous,
            steps: Vec::new(),
        };
        partners.fill_steps();
        partners
    }

    pub fn from_decomposer<C: Coordinate>(
        decomposer: &RegularDecomposer<C>,
        k: usize,
        contiguous: bool,
    ) -> Self {
        Self::new(decomposer.divisions(), k, contiguous)
    }

    fn fill_steps(&mut self) {
        self.steps.clear();
        if self.contiguous {
            let mut cur = vec![1usize; self.divisions.len()];
            for kv in &self.kvs {
                self.steps.push(cur[kv.dim]);
                cur[kv.dim] *= kv.size;
            }
        } else {
            let mut cur = self.divisions.clone();
            for kv in &self.kvs {
                cur[kv.dim] /= kv.size;
                self.steps.push(cur[kv.dim]);
            }
        }
    }

    #[inline]
    pub fn rounds(&self) -> usize {
        self.kvs.len()
    }
    pub fn size(&self, round: usize) -> usize {
        self.kvs[round].size
    }
    pub fn dim(&self, round: usize) -> usize {
        self.kvs[round].dim
    }
    pub fn step(&self, round: usize) -> usize {
        self.steps[round]
    }
    pub fn kvs(&self) -> &[DimK] {
        &self.kvs
    }
    pub fn divisions(&self) -> &[usize] {
        &self.divisions
    }
    pub fn contiguous(&self) -> bool {
        self.contiguous
    }

    /// Position of axis coordinate `c` within its round-`round` group.
    #[inline]
    pub fn group_position(&self, round: usize, c: usize, step: usize) -> usize {
        c / step % self.kvs[round].size
    }

    /// Members of `gid`'s group in round `round`, in position order.
    pub fn fill(&self, round: usize, gid: Gid) -> Vec<Gid> {
        let DimK { dim, size } = self.kvs[round];
        let step = self.step(round);
        let mut coords = gid_to_coords(gid, &self.divisions);
        let pos = self.group_position(round, coords[dim], step);
        let first = coords[dim] - pos * step;
        (0..size)
            .map(|i| {
                coords[dim] = first + i * step;
                coords_to_gid(&coords, &self.divisions)
            })
            .collect()
    }

    /// `true` if `gid` sits at position 0 of every group it joined before `round`.
    pub fn is_root_through(&self, round: usize, gid: Gid) -> bool {
        let coords = gid_to_coords(gid, &self.divisions);
        (0..round.min(self.rounds())).all(|r| {
            self.group_position(r, coords[self.kvs[r].dim], self.step(r)) == 0
        })
    }
}

/// k-ary gather toward the group roots; gid 0 ends up with everything.
#[derive(Clone, Debug)]
pub struct RegularMergePartners(pub RegularPartners);

impl RegularMergePartners {
    pub fn new(divisions: &[usize], k: usize, contiguous: bool) -> Self {
        Self(RegularPartners::new(divisions, k, contiguous))
    }
}

impl ReducePartners for RegularMergePartners {
    fn rounds(&self) -> usize {
        self.0.rounds()
    }

    fn active(&self, round: usize, gid: Gid) -> bool {
        self.0.is_root_through(round, gid)
    }

    fn incoming(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round == 0 || round > self.rounds() {
            return Vec::new();
        }
        self.0.fill(round - 1, gid)
    }

    fn outgoing(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round >= self.rounds() {
            return Vec::new();
        }
        self.0.fill(round, gid).into_iter().take(1).collect()
    }
}

/// Every member of a group exchanges with every other member each round.
#[derive(Clone, Debug)]
pub struct RegularSwapPartners(pub RegularPartners);

impl RegularSwapPartners {
    pub fn new(divisions: &[usize], k: usize, contiguous: bool) -> Self {
        Self(RegularPartners::new(divisions, k, contiguous))
    }
}

impl ReducePartners for RegularSwapPartners {
    fn rounds(&self) -> usize {
        self.0.rounds()
    }

    fn active(&self, _round: usize, _gid: Gid) -> bool {
        true
    }

    fn incoming(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round == 0 || round > self.rounds() {
            return Vec::new();
        }
        self.0.fill(round - 1, gid)
    }

    fn outgoing(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round >= self.rounds() {
            return Vec::new();
        }
        self.0.fill(round, gid)
    }
}

/// Merge in reverse: the root fans out until every block holds the value.
#[derive(Clone, Debug)]
pub struct RegularBroadcastPartners(pub RegularPartners);

impl RegularBroadcastPartners {
    pub fn new(divisions: &[usize], k: usize, contiguous: bool) -> Self {
        Self(RegularPartners::new(divisions, k, contiguous))
    }
}

impl ReducePartners for RegularBroadcastPartners {
    fn rounds(&self) -> usize {
        self.0.rounds()
    }

    fn active(&self, round: usize, gid: Gid) -> bool {
        self.0.is_root_through(self.rounds().saturating_sub(round), gid)
    }

    fn incoming(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round == 0 || round > self.rounds() {
            return Vec::new();
        }
        self.0
            .fill(self.rounds() - round, gid)
            .into_iter()
            .take(1)
            .collect()
    }

    fn outgoing(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round >= self.rounds() {
            return Vec::new();
        }
        self.0.fill(self.rounds() - round - 1, gid)
    }
}

/// Merge rounds followed by broadcast rounds; `rounds()` is twice the merge count.
#[derive(Clone, Debug)]
pub struct RegularAllReducePartners(pub RegularMergePartners);

impl RegularAllReducePartners {
    pub fn new(divisions: &[usize], k: usize, contiguous: bool) -> Self {
        Self(RegularMergePartners::new(divisions, k, contiguous))
    }

    fn merge_rounds(&self) -> usize {
        self.0.rounds()
    }

    /// Merge round mirrored by `round`.
    fn parent_round(&self, round: usize) -> usize {
        if round < self.merge_rounds() {
            round
        } else {
            self.rounds() - round
        }
    }
}

impl ReducePartners for RegularAllReducePartners {
    fn rounds(&self) -> usize {
        2 * self.merge_rounds()
    }

    fn active(&self, round: usize, gid: Gid) -> bool {
        self.0.active(self.parent_round(round.min(self.rounds())), gid)
    }

    fn incoming(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round > self.rounds() {
            Vec::new()
        } else if round <= self.merge_rounds() {
            self.0.incoming(round, gid)
        } else {
            self.0.outgoing(self.parent_round(round), gid)
        }
    }

    fn outgoing(&self, round: usize, gid: Gid) -> Vec<Gid> {
        if round >= self.rounds() {
            Vec::new()
        } else if round < self.merge_rounds() {
            self.0.outgoing(round, gid)
        } else {
            self.0.incoming(self.parent_round(round), gid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_factors_prefer_k() {
        assert_eq!(factor_k(2, 8), vec![2, 2, 2]);
        assert_eq!(factor_k(4, 8), vec![4, 2]);
        assert_eq!(factor_k(4, 6), vec![3, 2]);
        assert_eq!(factor_k(2, 7), vec![7]);
        assert!(factor_k(2, 1).is_empty());
    }

    #[test]
    fn axes_interleave_round_robin() {
        let p = RegularPartners::new(&[4, 2], 2, true);
        assert_eq!(
            p.kvs(),
            &[
                DimK { dim: 0, size: 2 },
                DimK { dim: 1, size: 2 },
                DimK { dim: 0, size: 2 }
            ]
        );
        assert_eq!((p.step(0), p.step(1), p.step(2)), (1, 1, 2));
        let nc = RegularPartners::new(&[4, 2], 2, false);
        assert_eq!((nc.step(0), nc.step(1), nc.step(2)), (2, 1, 1));
    }

    #[test]
    fn contiguous_groups_grow() {
        let p = RegularPartners::new(&[8], 2, true);
        assert_eq!(p.fill(0, 5), vec![4, 5]);
        assert_eq!(p.fill(1, 5), vec![5, 7]);
        assert_eq!(p.fill(2, 0), vec![0, 4]);
        let nc = RegularPartners::new(&[8], 2, false);
        assert_eq!(nc.fill(0, 5), vec![1, 5]);
        assert_eq!(nc.fill(2, 5), vec![4, 5]);
    }

    #[test]
    fn merge_funnels_to_gid_zero() {
        let m = RegularMergePartners::new(&[4], 2, true);
        assert_eq!(m.rounds(), 2);
        assert!(m.incoming(0, 1).is_empty());
        assert_eq!(m.outgoing(0, 1), vec![0]);
        assert_eq!(m.outgoing(0, 3), vec![2]);
        assert!(m.active(1, 2) && !m.active(1, 3));
        assert_eq!(m.incoming(1, 2), vec![2, 3]);
        assert_eq!(m.outgoing(1, 2), vec![0]);
        assert!(m.active(2, 0) && !m.active(2, 2));
        assert_eq!(m.incoming(2, 0), vec![0, 2]);
        assert!(m.outgoing(2, 0).is_empty());
    }

    #[test]
    fn broadcast_mirrors_merge() {
        let b = RegularBroadcastPartners::new(&[4], 2, true);
        assert!(b.active(0, 0) && !b.active(0, 2));
        assert_eq!(b.outgoing(0, 0), vec![0, 2]);
        assert_eq!(b.incoming(1, 2), vec![0]);
        assert!(b.active(1, 2) && !b.active(1, 3));
        assert_eq!(b.outgoing(1, 2), vec![2, 3]);
        assert_eq!(b.incoming(2, 3), vec![2]);
        assert!(b.active(2, 3));
    }

    #[test]
    fn all_reduce_sends_match_receives() {
        let a = RegularAllReducePartners::new(&[2, 3], 2, true);
        let nblocks = 6;
        for round in 0..a.rounds() {
            for gid in (0..nblocks).filter(|&g| a.active(round, g)) {
                for to in a.outgoing(round, gid) {
                    assert!(a.active(round + 1, to), "round {round}: {gid} -> {to}");
                    assert!(a.incoming(round + 1, to).contains(&gid));
                }
            }
        }
        assert!((0..nblocks).all(|g| a.active(a.rounds(), g)));
    }

    #[test]
    fn swap_pairs_everyone() {
        let s = RegularSwapPartners::new(&[4], 2, false);
        assert_eq!(s.outgoing(0, 1), vec![1, 3]);
        assert_eq!(s.incoming(1, 3), vec![1, 3]);
        assert!(s.active(1, 3));
    }
}
