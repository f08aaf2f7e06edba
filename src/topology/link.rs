//! Block neighbor topology.
//!
//! A [`Link`] is one block's local view of who it talks to: an ordered list
//! of `(gid, owning rank)` pairs. Links built by the regular decomposer also
//! carry, per neighbor, its bounds, its direction relative to the block and
//! its periodic wrap displacement, in parallel arrays of equal length.
//!
//! The set of link kinds is closed, so [`Link`] is a plain enum rather than
//! a trait object.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::topology::bounds::{Bounds, Coordinate};
use crate::topology::direction::Direction;

/// Global block id, stable across the whole run.
pub type Gid = usize;
/// Index into one process's block registry.
pub type Lid = usize;

/// Addressing unit for neighbor targets and message destinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    pub gid: Gid,
    pub proc: usize,
}

impl BlockId {
    pub fn new(gid: Gid, proc: usize) -> Self {
        Self { gid, proc }
    }
}

/// Distinct targets of `neighbors`, sorted, excluding `me`.
fn distinct_targets(neighbors: &[BlockId], me: Gid) -> Vec<BlockId> {
    let mut out: Vec<BlockId> = neighbors.iter().copied().filter(|b| b.gid != me).collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Neighbor list without geometric metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericLink {
    neighbors: Vec<BlockId>,
}

impl GenericLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_neighbors(neighbors: Vec<BlockId>) -> Self {
        Self { neighbors }
    }

    pub fn add_neighbor(&mut self, bid: BlockId) {
        self.neighbors.push(bid);
    }

    pub fn neighbors(&self) -> &[BlockId] {
        &self.neighbors
    }
}

/// Neighbor list produced by [`RegularDecomposer`](crate::decomposition::regular::RegularDecomposer).
#[derive(Clone, Debug, PartialEq)]
pub struct RegularLink<C> {
    neighbors: Vec<BlockId>,
    core: Bounds<C>,
    bounds: Bounds<C>,
    nbr_bounds: Vec<Bounds<C>>,
    directions: Vec<Direction>,
    wrap: Vec<Direction>,
    dir_map: HashMap<Direction, usize>,
}

impl<C: Coordinate> RegularLink<C> {
    /// Empty link for a block with the given core and ghost-extended bounds.
    pub fn new(core: Bounds<C>, bounds: Bounds<C>) -> Self {
        Self {
            neighbors: Vec::new(),
            core,
            bounds,
            nbr_bounds: Vec::new(),
            directions: Vec::new(),
            wrap: Vec::new(),
            dir_map: HashMap::new(),
        }
    }

    /// Append one neighbor with all of its metadata.
    pub fn add_neighbor(
        &mut self,
        bid: BlockId,
        bounds: Bounds<C>,
        direction: Direction,
        wrap: Direction,
    ) {
        self.dir_map.entry(direction).or_insert(self.neighbors.len());
        self.neighbors.push(bid);
        self.nbr_bounds.push(bounds);
        self.directions.push(direction);
        self.wrap.push(wrap);
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.core.dim()
    }

    pub fn core(&self) -> &Bounds<C> {
        &self.core
    }

    /// Ghost-extended bounds of the owning block.
    pub fn bounds(&self) -> &Bounds<C> {
        &self.bounds
    }

    pub fn neighbors(&self) -> &[BlockId] {
        &self.neighbors
    }

    pub fn neighbor_bounds(&self, i: usize) -> &Bounds<C> {
        &self.nbr_bounds[i]
    }

    pub fn direction(&self, i: usize) -> Direction {
        self.directions[i]
    }

    pub fn wrap(&self, i: usize) -> Direction {
        self.wrap[i]
    }

    /// Index of the neighbor lying in direction `dir`, if any.
    pub fn direction_index(&self, dir: &Direction) -> Option<usize> {
        self.dir_map.get(dir).copied()
    }
}

/// A block's neighbor topology.
#[derive(Clone, Debug, PartialEq)]
pub enum Link {
    Generic(GenericLink),
    Discrete(RegularLink<i64>),
    Continuous(RegularLink<f64>),
}

impl Default for Link {
    fn default() -> Self {
        Link::Generic(GenericLink::default())
    }
}

impl Link {
    pub fn neighbors(&self) -> &[BlockId] {
        match self {
            Link::Generic(l) => l.neighbors(),
            Link::Discrete(l) => l.neighbors(),
            Link::Continuous(l) => l.neighbors(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.neighbors().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.neighbors().is_empty()
    }

    #[inline]
    pub fn target(&self, i: usize) -> BlockId {
        self.neighbors()[i]
    }

    /// Position of the first entry for `gid`.
    pub fn find(&self, gid: Gid) -> Option<usize> {
        self.neighbors().iter().position(|b| b.gid == gid)
    }

    /// Distinct neighbor targets other than the owning block `me`, sorted.
    pub fn unique_targets(&self, me: Gid) -> Vec<BlockId> {
        distinct_targets(self.neighbors(), me)
    }

    /// Number of messages the owning block `me` expects per exchange.
    pub fn expected_from(&self, me: Gid) -> usize {
        self.unique_targets(me).len()
    }

    /// View as a regular link of coordinate flavor `C`.
    pub fn as_regular<C: Coordinate>(&self) -> Option<&RegularLink<C>> {
        C::as_regular(self)
    }
}

impl From<GenericLink> for Link {
    fn from(l: GenericLink) -> Self {
        Link::Generic(l)
    }
}

impl From<RegularLink<i64>> for Link {
    fn from(l: RegularLink<i64>) -> Self {
        Link::Discrete(l)
    }
}

impl From<RegularLink<f64>> for Link {
    fn from(l: RegularLink<f64>) -> Self {
        Link::Continuous(l)
    }
}
