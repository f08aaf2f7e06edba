//! Regular (grid) decomposition of a box domain into blocks.
//!
//! Blocks are numbered in mixed radix over the division vector with axis 0
//! varying fastest. For each block the decomposer produces its core bounds,
//! its ghost-extended bounds, and a [`RegularLink`] to every block it touches
//! (faces, edges and corners), following periodic wrap where requested.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::block_error::BlockError;
use crate::decomposition::assigner::Assigner;
use crate::topology::bounds::{Bounds, Coordinate, MAX_DIM};
use crate::topology::direction::Direction;
use crate::topology::link::{BlockId, Gid, RegularLink};

/// Optional per-axis constraints. An empty vector means "false / 0 /
/// unconstrained" on every axis; otherwise it must have one entry per axis.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerOptions<C> {
    /// Neighboring blocks share their boundary face instead of splitting exclusively.
    pub share_face: Vec<bool>,
    /// Periodic boundary per axis.
    pub wrap: Vec<bool>,
    /// Ghost width per axis.
    pub ghosts: Vec<C>,
    /// Number of blocks per axis; 0 lets the decomposer choose.
    pub divisions: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegularDecomposer<C> {
    domain: Bounds<C>,
    nblocks: usize,
    divisions: Vec<usize>,
    share_face: Vec<bool>,
    wrap: Vec<bool>,
    ghosts: Vec<C>,
}

/// Prime factors of `n`, ascending.
pub fn factor(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut f = 2;
    while n > 1 {
        if n % f == 0 {
            factors.push(f);
            n /= f;
        } else {
            f += 1;
        }
    }
    factors
}

fn per_axis<T: Clone + Default>(v: Vec<T>, dim: usize) -> Result<Vec<T>, BlockError> {
    match v.len() {
        0 => Ok(vec![T::default(); dim]),
        n if n == dim => Ok(v),
        n => Err(BlockError::DimensionMismatch {
            expected: dim,
            found: n,
        }),
    }
}

/// Mixed-radix decode, axis 0 fastest.
pub fn gid_to_coords(mut gid: Gid, divisions: &[usize]) -> Vec<usize> {
    divisions
        .iter()
        .map(|&d| {
            let c = gid % d;
            gid /= d;
            c
        })
        .collect()
}

/// Mixed-radix encode, inverse of [`gid_to_coords`].
pub fn coords_to_gid(coords: &[usize], divisions: &[usize]) -> Gid {
    coords
        .iter()
        .zip(divisions)
        .rev()
        .fold(0, |gid, (&c, &d)| gid * d + c)
}

impl<C: Coordinate> RegularDecomposer<C> {
    /// Validate the constraints and fix the division vector.
    ///
    /// # Errors
    /// - `NoBlocks` when `nblocks == 0`
    /// - `DimensionMismatch` when an option vector has the wrong length
    /// - `Unfactorable` when `nblocks` cannot be split across the given divisions
    /// - `DegenerateSplit` when some axis would get an empty block
    pub fn new(
        domain: Bounds<C>,
        nblocks: usize,
        opts: DecomposerOptions<C>,
    ) -> Result<Self, BlockError> {
        let dim = domain.dim();
        if dim == 0 || dim > MAX_DIM {
            return Err(BlockError::DimensionMismatch {
                expected: MAX_DIM,
                found: dim,
            });
        }
        if nblocks == 0 {
            return Err(BlockError::NoBlocks);
        }
        let mut dec = Self {
            domain,
            nblocks,
            divisions: Vec::new(),
            share_face: per_axis(opts.share_face, dim)?,
            wrap: per_axis(opts.wrap, dim)?,
            ghosts: per_axis(opts.ghosts, dim)?,
        };
        let mut divisions = per_axis(opts.divisions, dim)?;
        if let Err(e) = dec.fill_divisions(&mut divisions) {
            log::error!("decomposition of {nblocks} blocks failed: {e}");
            return Err(e);
        }
        dec.divisions = divisions;
        dec.check_splits()?;
        Ok(dec)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.domain.dim()
    }
    pub fn domain(&self) -> &Bounds<C> {
        &self.domain
    }
    pub fn nblocks(&self) -> usize {
        self.nblocks
    }
    pub fn divisions(&self) -> &[usize] {
        &self.divisions
    }
    pub fn wrap(&self) -> &[bool] {
        &self.wrap
    }
    pub fn share_face(&self) -> &[bool] {
        &self.share_face
    }
    pub fn ghosts(&self) -> &[C] {
        &self.ghosts
    }

    /// Fill the zero entries of `divisions` so that their product is `nblocks`.
    ///
    /// Remaining prime factors are assigned largest first, each to the axis
    /// whose current block extent is largest (ties: fewer divisions first,
    /// then lower axis).
    pub fn fill_divisions(&self, divisions: &mut [usize]) -> Result<(), BlockError> {
        let unfactorable = || BlockError::Unfactorable {
            nblocks: self.nblocks,
            divisions: divisions.to_vec(),
        };
        let prod: usize = divisions.iter().filter(|&&d| d != 0).product();
        let constrained = divisions.iter().filter(|&&d| d != 0).count();
        if self.nblocks % prod != 0 {
            return Err(unfactorable());
        }
        if constrained == divisions.len() {
            return if prod == self.nblocks {
                Ok(())
            } else {
                Err(unfactorable())
            };
        }

        struct BlockSize<C> {
            axis: usize,
            nb: usize,
            extent: C,
        }
        let mut missing: Vec<BlockSize<C>> = (0..self.dim())
            .filter(|&i| divisions[i] == 0)
            .map(|i| BlockSize {
                axis: i,
                nb: 1,
                extent: self.domain.max[i] - self.domain.min[i],
            })
            .collect();

        for f in factor(self.nblocks / prod).into_iter().rev() {
            missing.sort_by(|a, b| {
                b.extent
                    .partial_cmp(&a.extent)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.nb.cmp(&b.nb))
                    .then(a.axis.cmp(&b.axis))
            });
            let target = &mut missing[0];
            let (lo, hi) = (self.domain.min[target.axis], self.domain.max[target.axis]);
            let sf = self.share_face[target.axis];
            let min = C::block_from(0, target.nb * f, lo, hi, sf);
            let max = C::block_to(0, target.nb * f, lo, hi, sf);
            if max < min {
                return Err(BlockError::DegenerateSplit {
                    nblocks: self.nblocks,
                    axis: target.axis,
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
            target.nb *= f;
            target.extent = max - min;
        }

        for bs in missing {
            divisions[bs.axis] = bs.nb;
        }
        Ok(())
    }

    fn check_splits(&self) -> Result<(), BlockError> {
        for axis in 0..self.dim() {
            let n = self.divisions[axis];
            let (lo, hi, sf) = (
                self.domain.min[axis],
                self.domain.max[axis],
                self.share_face[axis],
            );
            let (min, max) = (C::block_from(0, n, lo, hi, sf), C::block_to(0, n, lo, hi, sf));
            if max < min {
                log::error!("axis {axis} of the domain cannot hold {n} blocks");
                return Err(BlockError::DegenerateSplit {
                    nblocks: self.nblocks,
                    axis,
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn gid_to_coords(&self, gid: Gid) -> Vec<usize> {
        gid_to_coords(gid, &self.divisions)
    }

    pub fn coords_to_gid(&self, coords: &[usize]) -> Gid {
        coords_to_gid(coords, &self.divisions)
    }

    /// Bounds of the block at `coords`, optionally extended by the ghost width.
    ///
    /// Ghost extension is clamped to the domain except on wrapping axes.
    pub fn fill_bounds(&self, coords: &[usize], add_ghosts: bool) -> Bounds<C> {
        let mut b = Bounds::new(self.dim());
        for i in 0..self.dim() {
            let (lo, hi, sf, n) = (
                self.domain.min[i],
                self.domain.max[i],
                self.share_face[i],
                self.divisions[i],
            );
            b.min[i] = C::block_from(coords[i], n, lo, hi, sf);
            b.max[i] = C::block_to(coords[i], n, lo, hi, sf);
            if !add_ghosts {
                continue;
            }
            let g = self.ghosts[i];
            if self.wrap[i] {
                b.min[i] = b.min[i] - g;
                b.max[i] = b.max[i] + g;
            } else {
                let lo_g = b.min[i] - g;
                let hi_g = b.max[i] + g;
                b.min[i] = if lo_g < lo { lo } else { lo_g };
                b.max[i] = if hi_g > hi { hi } else { hi_g };
            }
        }
        b
    }

    /// `(core, ghost-extended)` bounds of block `gid`.
    pub fn block_bounds(&self, gid: Gid) -> (Bounds<C>, Bounds<C>) {
        let coords = self.gid_to_coords(gid);
        (self.fill_bounds(&coords, false), self.fill_bounds(&coords, true))
    }

    /// Full neighbor link of block `gid`, ranks resolved through `assigner`.
    ///
    /// Offsets in `{-1,0,1}^dim` are enumerated with axis 0 varying fastest;
    /// out-of-domain neighbors on non-wrapping axes are skipped.
    pub fn link<A: Assigner + ?Sized>(&self, gid: Gid, assigner: &A) -> RegularLink<C> {
        let dim = self.dim();
        let coords = self.gid_to_coords(gid);
        let (core, bounds) = (self.fill_bounds(&coords, false), self.fill_bounds(&coords, true));
        let mut link = RegularLink::new(core, bounds);

        let offsets = (0..dim)
            .map(|_| -1i32..=1)
            .multi_cartesian_product()
            .map(|mut o| {
                o.reverse();
                o
            });
        'offsets: for offset in offsets {
            if offset.iter().all(|&o| o == 0) {
                continue;
            }
            let mut nbr = vec![0usize; dim];
            let mut dir = Direction::new(dim);
            let mut wrap = Direction::new(dim);
            for k in 0..dim {
                let c = coords[k] as i64 + offset[k] as i64;
                let n = self.divisions[k] as i64;
                nbr[k] = if c < 0 {
                    if !self.wrap[k] {
                        continue 'offsets;
                    }
                    wrap.set(k, -1);
                    (n - 1) as usize
                } else if c >= n {
                    if !self.wrap[k] {
                        continue 'offsets;
                    }
                    wrap.set(k, 1);
                    0
                } else {
                    c as usize
                };
                dir.set(k, offset[k]);
            }
            let nbr_gid = self.coords_to_gid(&nbr);
            link.add_neighbor(
                BlockId::new(nbr_gid, assigner.rank(nbr_gid)),
                self.fill_bounds(&nbr, false),
                dir,
                wrap,
            );
        }
        link
    }

    /// Run `create(gid, core, bounds, domain, link)` for every block `rank` owns.
    pub fn decompose<A, F>(&self, rank: usize, assigner: &A, mut create: F)
    where
        A: Assigner + ?Sized,
        F: FnMut(Gid, &Bounds<C>, &Bounds<C>, &Bounds<C>, RegularLink<C>),
    {
        for gid in assigner.local_gids(rank) {
            let link = self.link(gid, assigner);
            let (core, bounds) = (*link.core(), *link.bounds());
            create(gid, &core, &bounds, &self.domain, link);
        }
    }

    /// Half-open range of block indices along `axis` whose ghost-extended
    /// extent contains `x`; clamped to the grid unless the axis wraps.
    fn index_range(&self, x: C, axis: usize) -> (isize, isize) {
        let (lo, hi, sf, n) = (
            self.domain.min[axis],
            self.domain.max[axis],
            self.share_face[axis],
            self.divisions[axis],
        );
        let g = self.ghosts[axis];
        let mut bottom = C::lower(x - g, n, lo, hi, sf);
        let mut top = C::upper(x + g, n, lo, hi, sf);
        if !self.wrap[axis] {
            bottom = bottom.max(0);
            top = top.min(n as isize);
        } else if top - bottom > n as isize {
            top = bottom + n as isize;
        }
        (bottom, top)
    }

    /// Every block whose ghost-extended bounds contain `p`, axis 0 fastest.
    ///
    /// `p` needs at least one coordinate per axis of the domain.
    pub fn point_to_gids(&self, p: &[C]) -> Vec<Gid> {
        debug_assert!(
            p.len() >= self.dim(),
            "point has {} coordinates, domain has {}",
            p.len(),
            self.dim()
        );
        let ranges: Vec<(isize, isize)> = (0..self.dim()).map(|i| self.index_range(p[i], i)).collect();
        if ranges.iter().any(|&(b, t)| b >= t) {
            return Vec::new();
        }
        let mut gids: Vec<Gid> = Vec::new();
        let candidates = ranges
            .iter()
            .rev()
            .map(|&(b, t)| b..t)
            .multi_cartesian_product();
        for mut c in candidates {
            c.reverse();
            let coords: Vec<usize> = c
                .iter()
                .zip(&self.divisions)
                .map(|(&x, &n)| x.rem_euclid(n as isize) as usize)
                .collect();
            let gid = self.coords_to_gid(&coords);
            if !gids.contains(&gid) {
                gids.push(gid);
            }
        }
        gids
    }

    /// Lowest-indexed block whose core contains `p` (no ghosts).
    ///
    /// `p` needs at least one coordinate per axis of the domain.
    pub fn point_to_gid(&self, p: &[C]) -> Gid {
        debug_assert!(
            p.len() >= self.dim(),
            "point has {} coordinates, domain has {}",
            p.len(),
            self.dim()
        );
        let coords: Vec<usize> = (0..self.dim())
            .map(|i| {
                let n = self.divisions[i];
                let b = C::lower(
                    p[i],
                    n,
                    self.domain.min[i],
                    self.domain.max[i],
                    self.share_face[i],
                );
                b.clamp(0, n as isize - 1) as usize
            })
            .collect();
        self.coords_to_gid(&coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::assigner::ContiguousAssigner;
    use crate::topology::bounds::{ContinuousBounds, DiscreteBounds};

    fn line(nblocks: usize, wrap: bool) -> RegularDecomposer<i64> {
        let domain = DiscreteBounds::from_corners(&[0], &[99]).unwrap();
        let opts = DecomposerOptions {
            wrap: vec![wrap],
            ..Default::default()
        };
        RegularDecomposer::new(domain, nblocks, opts).unwrap()
    }

    #[test]
    fn primes_ascending() {
        assert_eq!(factor(1), Vec::<usize>::new());
        assert_eq!(factor(12), vec![2, 2, 3]);
        assert_eq!(factor(97), vec![97]);
    }

    #[test]
    fn largest_extent_is_split_first() {
        let domain = DiscreteBounds::from_corners(&[0, 0], &[199, 99]).unwrap();
        let d = RegularDecomposer::new(domain, 2, DecomposerOptions::default()).unwrap();
        assert_eq!(d.divisions(), &[2, 1]);
        // equal extents: tie goes to the axis with fewer divisions, then the lower axis
        let square = DiscreteBounds::from_corners(&[0, 0], &[99, 99]).unwrap();
        let d = RegularDecomposer::new(square, 4, DecomposerOptions::default()).unwrap();
        assert_eq!(d.divisions(), &[2, 2]);
        let d = RegularDecomposer::new(square, 2, DecomposerOptions::default()).unwrap();
        assert_eq!(d.divisions(), &[2, 1]);
    }

    #[test]
    fn constrained_axes_must_divide() {
        let domain = DiscreteBounds::from_corners(&[0, 0], &[99, 99]).unwrap();
        let opts = DecomposerOptions {
            divisions: vec![3, 0],
            ..Default::default()
        };
        assert!(matches!(
            RegularDecomposer::new(domain, 8, opts),
            Err(BlockError::Unfactorable { .. })
        ));
        let opts = DecomposerOptions {
            divisions: vec![2, 2],
            ..Default::default()
        };
        assert!(RegularDecomposer::new(domain, 8, opts).is_err());
        let opts = DecomposerOptions {
            divisions: vec![0, 4],
            ..Default::default()
        };
        let d = RegularDecomposer::new(domain, 8, opts).unwrap();
        assert_eq!(d.divisions(), &[2, 4]);
    }

    #[test]
    fn too_many_blocks_is_degenerate() {
        let domain = DiscreteBounds::from_corners(&[0], &[2]).unwrap();
        assert!(matches!(
            RegularDecomposer::new(domain, 4, DecomposerOptions::default()),
            Err(BlockError::DegenerateSplit { .. })
        ));
    }

    #[test]
    fn option_length_is_checked() {
        let domain = DiscreteBounds::from_corners(&[0, 0], &[9, 9]).unwrap();
        let opts = DecomposerOptions {
            wrap: vec![true],
            ..Default::default()
        };
        assert!(matches!(
            RegularDecomposer::new(domain, 2, opts),
            Err(BlockError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn coords_roundtrip() {
        let divs = [3, 2, 4];
        for gid in 0..24 {
            assert_eq!(coords_to_gid(&gid_to_coords(gid, &divs), &divs), gid);
        }
        assert_eq!(gid_to_coords(5, &divs), vec![2, 1, 0]);
    }

    #[test]
    fn line_links_without_wrap() {
        let d = line(4, false);
        let a = ContiguousAssigner::new(1, 4);
        let l0 = d.link(0, &a);
        assert_eq!(l0.neighbors(), &[BlockId::new(1, 0)]);
        let l1 = d.link(1, &a);
        let gids: Vec<Gid> = l1.neighbors().iter().map(|b| b.gid).collect();
        assert_eq!(gids, vec![0, 2]);
        assert_eq!(l1.direction(0).as_slice(), &[-1]);
        assert_eq!(l1.direction(1).as_slice(), &[1]);
        assert!(l1.wrap(0).is_zero());
    }

    #[test]
    fn ghosts_clamp_unless_wrapping() {
        let domain = DiscreteBounds::from_corners(&[0, 0], &[99, 99]).unwrap();
        let opts = DecomposerOptions {
            wrap: vec![true, false],
            ghosts: vec![2, 2],
            divisions: vec![2, 2],
            ..Default::default()
        };
        let d = RegularDecomposer::new(domain, 4, opts).unwrap();
        let (core, bounds) = d.block_bounds(0);
        assert_eq!((core.min[0], core.max[0]), (0, 49));
        assert_eq!((bounds.min[0], bounds.max[0]), (-2, 51));
        assert_eq!((bounds.min[1], bounds.max[1]), (0, 51));
    }

    #[test]
    fn diagonal_neighbors_in_2d() {
        let domain = DiscreteBounds::from_corners(&[0, 0], &[8, 8]).unwrap();
        let opts = DecomposerOptions {
            divisions: vec![3, 3],
            ..Default::default()
        };
        let d = RegularDecomposer::new(domain, 9, opts).unwrap();
        let a = ContiguousAssigner::new(1, 9);
        let center = d.link(4, &a);
        let gids: Vec<Gid> = center.neighbors().iter().map(|b| b.gid).collect();
        assert_eq!(gids, vec![0, 1, 2, 3, 5, 6, 7, 8]);
        assert_eq!(center.direction(0).as_slice(), &[-1, -1]);
        assert_eq!(center.direction_index(&Direction::from_slice(&[0, 1])), Some(6));
        assert_eq!(d.link(0, &a).neighbors().len(), 3);
    }

    #[test]
    fn continuous_point_location() {
        let domain = ContinuousBounds::from_corners(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let opts = DecomposerOptions {
            divisions: vec![2, 2],
            ..Default::default()
        };
        let d = RegularDecomposer::new(domain, 4, opts).unwrap();
        assert_eq!(d.point_to_gids(&[0.25, 0.75]), vec![2]);
        assert_eq!(d.point_to_gid(&[0.25, 0.75]), 2);
        // the center touches all four blocks
        assert_eq!(d.point_to_gids(&[0.5, 0.5]), vec![0, 1, 2, 3]);
        assert!(d.point_to_gids(&[2.0, 0.5]).is_empty());
    }

    #[test]
    #[should_panic(expected = "point has 1 coordinates")]
    #[cfg(debug_assertions)]
    fn short_point_is_rejected() {
        let domain = DiscreteBounds::from_corners(&[0, 0], &[9, 9]).unwrap();
        let d = RegularDecomposer::new(domain, 4, DecomposerOptions::default()).unwrap();
        d.point_to_gids(&[3]);
    }

    #[test]
    fn discrete_point_location_with_ghosts() {
        let domain = DiscreteBounds::from_corners(&[0], &[99]).unwrap();
        let opts = DecomposerOptions {
            ghosts: vec![1],
            ..Default::default()
        };
        let d = RegularDecomposer::new(domain, 4, opts).unwrap();
        assert_eq!(d.point_to_gids(&[10]), vec![0]);
        assert_eq!(d.point_to_gids(&[24]), vec![0, 1]);
        assert_eq!(d.point_to_gids(&[0]), vec![0]);
        assert_eq!(d.point_to_gid(&[99]), 3);
    }
}
