//! Geometry and neighbor topology of decomposed blocks.
//!
//! This module provides:
//! - [`bounds`]: axis-aligned boxes and the discrete/continuous coordinate policy
//! - [`direction`]: relative neighbor directions and wrap displacements
//! - [`link`]: block ids and per-block neighbor lists
//! - [`pick`]: neighbor selection by distance or containment

pub mod bounds;
pub mod direction;
pub mod link;
pub mod pick;

pub use bounds::{Bounds, ContinuousBounds, Coordinate, DiscreteBounds, MAX_DIM};
pub use direction::Direction;
pub use link::{BlockId, GenericLink, Gid, Lid, Link, RegularLink};
