//! Relative block directions.
//!
//! A [`Direction`] has one component per axis in `{-1, 0, 1}`. The same type
//! records both where a neighbor sits relative to a block and the periodic
//! wrap displacement of that neighbor.

use std::ops::{Index, Neg};

use serde::{Deserialize, Serialize};

use crate::topology::bounds::MAX_DIM;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Direction {
    dim: usize,
    comps: [i32; MAX_DIM],
}

impl Direction {
    /// All-zero direction of the given dimension.
    ///
    /// # Panics
    ///
    /// Panics if `dim` exceeds [`MAX_DIM`].
    pub fn new(dim: usize) -> Self {
        assert!(dim <= MAX_DIM, "dimension {dim} exceeds MAX_DIM = {MAX_DIM}");
        Self {
            dim,
            comps: [0; MAX_DIM],
        }
    }

    /// # Panics
    ///
    /// Panics if `comps` has more than [`MAX_DIM`] entries.
    pub fn from_slice(comps: &[i32]) -> Self {
        let mut d = Self::new(comps.len());
        d.comps[..comps.len()].copy_from_slice(comps);
        d
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn set(&mut self, axis: usize, value: i32) {
        debug_assert!(axis < self.dim);
        self.comps[axis] = value;
    }

    pub fn is_zero(&self) -> bool {
        self.as_slice().iter().all(|&c| c == 0)
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.comps[..self.dim]
    }
}

impl Index<usize> for Direction {
    type Output = i32;

    fn index(&self, axis: usize) -> &i32 {
        &self.as_slice()[axis]
    }
}

impl Neg for Direction {
    type Output = Direction;

    fn neg(mut self) -> Direction {
        for c in &mut self.comps[..self.dim] {
            *c = -*c;
        }
        self
    }
}
