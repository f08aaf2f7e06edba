//! Static block-to-rank assignment.

use crate::topology::link::Gid;

/// Maps every gid of a run to the rank that owns it.
pub trait Assigner {
    /// Number of ranks.
    fn size(&self) -> usize;
    /// Total number of blocks across all ranks.
    fn nblocks(&self) -> usize;
    /// Owning rank of `gid`.
    fn rank(&self, gid: Gid) -> usize;
    /// Gids owned by `rank`, ascending.
    fn local_gids(&self, rank: usize) -> Vec<Gid>;
}

/// Consecutive gid ranges per rank; the first `nblocks % size` ranks get one extra block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContiguousAssigner {
    size: usize,
    nblocks: usize,
}

impl ContiguousAssigner {
    pub fn new(size: usize, nblocks: usize) -> Self {
        assert!(size > 0, "an assigner needs at least one rank");
        Self { size, nblocks }
    }

    fn first_gid(&self, rank: usize) -> Gid {
        let div = self.nblocks / self.size;
        let rem = self.nblocks % self.size;
        if rank < rem {
            rank * (div + 1)
        } else {
            rem * (div + 1) + (rank - rem) * div
        }
    }
}

impl Assigner for ContiguousAssigner {
    fn size(&self) -> usize {
        self.size
    }

    fn nblocks(&self) -> usize {
        self.nblocks
    }

    fn rank(&self, gid: Gid) -> usize {
        let div = self.nblocks / self.size;
        let rem = self.nblocks % self.size;
        let r = gid / (div + 1);
        if r < rem {
            r
        } else {
            rem + (gid - (div + 1) * rem) / div
        }
    }

    fn local_gids(&self, rank: usize) -> Vec<Gid> {
        (self.first_gid(rank)..self.first_gid(rank + 1).min(self.nblocks)).collect()
    }
}

/// Gid `g` lives on rank `g % size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundRobinAssigner {
    size: usize,
    nblocks: usize,
}

impl RoundRobinAssigner {
    pub fn new(size: usize, nblocks: usize) -> Self {
        assert!(size > 0, "an assigner needs at least one rank");
        Self { size, nblocks }
    }
}

impl Assigner for RoundRobinAssigner {
    fn size(&self) -> usize {
        self.size
    }

    fn nblocks(&self) -> usize {
        self.nblocks
    }

    fn rank(&self, gid: Gid) -> usize {
        gid % self.size
    }

    fn local_gids(&self, rank: usize) -> Vec<Gid> {
        (rank..self.nblocks).step_by(self.size).collect()
    }
}
