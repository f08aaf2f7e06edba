//! Neighbor selection over a [`RegularLink`].
//!
//! Neighbor bounds stored in a link are the neighbor's *own* bounds. For a
//! neighbor reached across a periodic boundary those bounds sit on the far
//! side of the domain, so they are first shifted by the wrap displacement
//! before any distance test.

use crate::topology::bounds::{Bounds, Coordinate};
use crate::topology::direction::Direction;
use crate::topology::link::RegularLink;

/// Shift `bounds` by `wrap` domain periods along each axis.
pub fn wrap_bounds<C: Coordinate>(bounds: &mut Bounds<C>, wrap: Direction, domain: &Bounds<C>) {
    for i in 0..bounds.dim() {
        let w = wrap[i];
        if w == 0 {
            continue;
        }
        let period = C::period(domain.min[i], domain.max[i]);
        let shift = if w > 0 { period } else { C::zero() - period };
        bounds.min[i] = bounds.min[i] + shift;
        bounds.max[i] = bounds.max[i] + shift;
    }
}

/// Euclidean distance from `p` to the closest point of `bounds` (0 inside).
pub fn distance<C: Coordinate>(bounds: &Bounds<C>, p: &[C]) -> f64 {
    let mut res = 0.0;
    for i in 0..bounds.dim() {
        let x = p[i].to_f64();
        let diff = (bounds.min[i].to_f64() - x)
            .max(x - bounds.max[i].to_f64())
            .max(0.0);
        res += diff * diff;
    }
    res.sqrt()
}

/// Distance between two boxes (0 when they touch or overlap).
pub fn bounds_distance<C: Coordinate>(a: &Bounds<C>, b: &Bounds<C>) -> f64 {
    let mut res = 0.0;
    for i in 0..a.dim() {
        let diff = (a.min[i].to_f64() - b.max[i].to_f64())
            .max(b.min[i].to_f64() - a.max[i].to_f64())
            .max(0.0);
        res += diff * diff;
    }
    res.sqrt()
}

fn wrapped_neighbor<C: Coordinate>(link: &RegularLink<C>, n: usize, domain: &Bounds<C>) -> Bounds<C> {
    let mut nb = *link.neighbor_bounds(n);
    wrap_bounds(&mut nb, link.wrap(n), domain);
    nb
}

/// Link indices of neighbors whose (wrapped) bounds lie within `r` of `p`.
pub fn near<C: Coordinate>(
    link: &RegularLink<C>,
    p: &[C],
    r: f64,
    domain: &Bounds<C>,
) -> Vec<usize> {
    (0..link.neighbors().len())
        .filter(|&n| distance(&wrapped_neighbor(link, n, domain), p) <= r)
        .collect()
}

/// Link indices of neighbors whose (wrapped) bounds contain `p`.
pub fn within<C: Coordinate>(link: &RegularLink<C>, p: &[C], domain: &Bounds<C>) -> Vec<usize> {
    (0..link.neighbors().len())
        .filter(|&n| distance(&wrapped_neighbor(link, n, domain), p) == 0.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::bounds::{ContinuousBounds, DiscreteBounds};
    use crate::topology::link::BlockId;

    fn ring() -> (RegularLink<f64>, ContinuousBounds) {
        // block [0,1) of the periodic domain [0,4]; neighbors 1 (right) and 3 (wrapped left)
        let domain = ContinuousBounds::from_corners(&[0.0], &[4.0]).unwrap();
        let core = ContinuousBounds::from_corners(&[0.0], &[1.0]).unwrap();
        let mut link = RegularLink::new(core, core);
        link.add_neighbor(
            BlockId::new(3, 0),
            ContinuousBounds::from_corners(&[3.0], &[4.0]).unwrap(),
            Direction::from_slice(&[-1]),
            Direction::from_slice(&[-1]),
        );
        link.add_neighbor(
            BlockId::new(1, 0),
            ContinuousBounds::from_corners(&[1.0], &[2.0]).unwrap(),
            Direction::from_slice(&[1]),
            Direction::new(1),
        );
        (link, domain)
    }

    #[test]
    fn wrapped_neighbor_is_near_the_low_edge() {
        let (link, domain) = ring();
        assert_eq!(near(&link, &[0.1], 0.2, &domain), vec![0]);
        assert_eq!(near(&link, &[0.9], 0.2, &domain), vec![1]);
        assert_eq!(near(&link, &[0.5], 0.6, &domain), vec![0, 1]);
    }

    #[test]
    fn within_uses_closed_bounds() {
        let (link, domain) = ring();
        assert_eq!(within(&link, &[0.0], &domain), vec![0]);
        assert_eq!(within(&link, &[1.0], &domain), vec![1]);
        assert!(within(&link, &[0.5], &domain).is_empty());
    }

    #[test]
    fn discrete_wrap_shifts_by_cell_count() {
        let domain = DiscreteBounds::from_corners(&[0], &[99]).unwrap();
        let mut b = DiscreteBounds::from_corners(&[75], &[99]).unwrap();
        wrap_bounds(&mut b, Direction::from_slice(&[-1]), &domain);
        assert_eq!((b.min[0], b.max[0]), (-25, -1));
        wrap_bounds(&mut b, Direction::from_slice(&[1]), &domain);
        assert_eq!((b.min[0], b.max[0]), (75, 99));
    }

    #[test]
    fn box_distance() {
        let a = ContinuousBounds::from_corners(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let b = ContinuousBounds::from_corners(&[4.0, 5.0], &[6.0, 6.0]).unwrap();
        assert_eq!(bounds_distance(&a, &b), 5.0);
        assert_eq!(bounds_distance(&a, &a), 0.0);
    }
}
