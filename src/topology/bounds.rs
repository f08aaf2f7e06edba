//! Axis-aligned block bounds and the coordinate policy shared by the
//! discrete (integer-indexed) and continuous (floating-point) flavors.
//!
//! Both flavors run the same decomposition algorithms; the only differences
//! (how an axis is split, where a point falls) live in [`Coordinate`].

use std::fmt::{Debug, Display};

use num_traits::{Num, NumCast};
use serde::{Deserialize, Serialize};

use crate::block_error::BlockError;
use crate::topology::link::{Link, RegularLink};

/// Largest supported spatial dimension.
pub const MAX_DIM: usize = 4;

/// Scalar type of a [`Bounds`] corner.
///
/// The split helpers mirror each other across flavors:
/// - `block_from`/`block_to` give the extent of block `i` out of `n` along an axis.
/// - `lower`/`upper` give the half-open range of block indices whose extent
///   contains `x` (a point on a shared boundary belongs to both sides).
pub trait Coordinate:
    Copy + PartialOrd + Debug + Display + Default + Num + NumCast + Send + Sync + 'static
{
    /// `true` for integer-indexed bounds.
    const DISCRETE: bool;

    fn block_from(i: usize, n: usize, min: Self, max: Self, shared_face: bool) -> Self;
    fn block_to(i: usize, n: usize, min: Self, max: Self, shared_face: bool) -> Self;
    fn lower(x: Self, n: usize, min: Self, max: Self, shared_face: bool) -> isize;
    fn upper(x: Self, n: usize, min: Self, max: Self, shared_face: bool) -> isize;
    /// Length of one periodic repeat of the axis `[min, max]`.
    fn period(min: Self, max: Self) -> Self;

    fn to_f64(self) -> f64;

    /// Wrap a regular link of this flavor into the closed [`Link`] sum type.
    fn into_link(link: RegularLink<Self>) -> Link;
    /// View a [`Link`] as a regular link of this flavor, if it is one.
    fn as_regular(link: &Link) -> Option<&RegularLink<Self>>;
}

impl Coordinate for i64 {
    const DISCRETE: bool = true;

    fn block_from(i: usize, n: usize, min: i64, max: i64, _shared_face: bool) -> i64 {
        min + (max - min + 1) / n as i64 * i as i64
    }

    fn block_to(i: usize, n: usize, min: i64, max: i64, shared_face: bool) -> i64 {
        if i + 1 == n {
            max
        } else {
            Self::block_from(i + 1, n, min, max, shared_face) - if shared_face { 0 } else { 1 }
        }
    }

    fn lower(x: i64, n: usize, min: i64, max: i64, shared_face: bool) -> isize {
        let width = (max - min + 1) / n as i64;
        let mut res = (x - min).div_euclid(width);
        if res >= n as i64 {
            res = n as i64 - 1;
        }
        if shared_face && res >= 0 && x == Self::block_from(res as usize, n, min, max, shared_face) {
            res -= 1;
        }
        res as isize
    }

    fn upper(x: i64, n: usize, min: i64, max: i64, shared_face: bool) -> isize {
        let width = (max - min + 1) / n as i64;
        let mut res = (x - min).div_euclid(width) + 1;
        if shared_face && res >= 0 && x == Self::block_from(res as usize, n, min, max, shared_face) {
            res += 1;
        }
        res as isize
    }

    fn period(min: i64, max: i64) -> i64 {
        max - min + 1
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn into_link(link: RegularLink<i64>) -> Link {
        Link::Discrete(link)
    }

    fn as_regular(link: &Link) -> Option<&RegularLink<i64>> {
        match link {
            Link::Discrete(l) => Some(l),
            _ => None,
        }
    }
}

impl Coordinate for f64 {
    const DISCRETE: bool = false;

    fn block_from(i: usize, n: usize, min: f64, max: f64, _shared_face: bool) -> f64 {
        min + (max - min) / n as f64 * i as f64
    }

    fn block_to(i: usize, n: usize, min: f64, max: f64, shared_face: bool) -> f64 {
        // the last block ends exactly on the domain edge, free of rounding
        if i + 1 == n {
            max
        } else {
            Self::block_from(i + 1, n, min, max, shared_face)
        }
    }

    fn lower(x: f64, n: usize, min: f64, max: f64, _shared_face: bool) -> isize {
        let width = (max - min) / n as f64;
        let res = ((x - min) / width).floor();
        if min + res * width == x {
            res as isize - 1
        } else {
            res as isize
        }
    }

    fn upper(x: f64, n: usize, min: f64, max: f64, _shared_face: bool) -> isize {
        let width = (max - min) / n as f64;
        let res = ((x - min) / width).ceil();
        if min + res * width == x {
            res as isize + 1
        } else {
            res as isize
        }
    }

    fn period(min: f64, max: f64) -> f64 {
        max - min
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn into_link(link: RegularLink<f64>) -> Link {
        Link::Continuous(link)
    }

    fn as_regular(link: &Link) -> Option<&RegularLink<f64>> {
        match link {
            Link::Continuous(l) => Some(l),
            _ => None,
        }
    }
}

/// Axis-aligned box; only the first `dim` entries of `min`/`max` are meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds<C> {
    dim: usize,
    pub min: [C; MAX_DIM],
    pub max: [C; MAX_DIM],
}

/// Integer-indexed bounds (inclusive on both ends).
pub type DiscreteBounds = Bounds<i64>;
/// Floating-point bounds.
pub type ContinuousBounds = Bounds<f64>;

impl<C: Coordinate> Bounds<C> {
    /// Zero-sized box of the given dimension.
    ///
    /// # Panics
    ///
    /// Panics if `dim` exceeds [`MAX_DIM`]; use [`Bounds::from_corners`] for
    /// a checked constructor.
    pub fn new(dim: usize) -> Self {
        assert!(dim <= MAX_DIM, "dimension {dim} exceeds MAX_DIM = {MAX_DIM}");
        Self {
            dim,
            min: [C::default(); MAX_DIM],
            max: [C::default(); MAX_DIM],
        }
    }

    /// Build a box from per-axis corners; both slices must have the same length.
    pub fn from_corners(min: &[C], max: &[C]) -> Result<Self, BlockError> {
        if min.len() != max.len() {
            return Err(BlockError::DimensionMismatch {
                expected: min.len(),
                found: max.len(),
            });
        }
        if min.is_empty() || min.len() > MAX_DIM {
            return Err(BlockError::DimensionMismatch {
                expected: MAX_DIM,
                found: min.len(),
            });
        }
        let mut b = Self::new(min.len());
        b.min[..min.len()].copy_from_slice(min);
        b.max[..max.len()].copy_from_slice(max);
        Ok(b)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Closed containment test on the first `dim` axes.
    pub fn contains(&self, p: &[C]) -> bool {
        (0..self.dim).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }

    /// `true` if any axis is inverted.
    pub fn is_inverted(&self) -> bool {
        (0..self.dim).any(|i| self.max[i] < self.min[i])
    }
}
