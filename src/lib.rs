#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-blocks
//!
//! mesh-blocks is a block-parallel execution runtime for scientific codes that
//! split a box domain into blocks and distribute those blocks over processes.
//! Each process registers its blocks with a [`Master`](master::Master), runs
//! callbacks over them, and exchanges per-neighbor byte queues between rounds.
//!
//! ## Features
//! - Regular decomposition of discrete (`i64`) and continuous (`f64`) boxes,
//!   with shared faces, periodic wrap and ghost layers
//! - Neighbor links recording direction and wrap displacement per neighbor
//! - Multithreaded block execution with an in-memory limit and out-of-core
//!   spilling of blocks and large queues to [`ExternalStorage`](data::storage::ExternalStorage)
//! - Queue exchange over a pluggable [`Communicator`](algs::communicator::Communicator):
//!   serial, threads in one process, or MPI behind the `mpi-support` feature
//! - Collectives (all-reduce, scratch) composed across blocks and ranks
//! - k-ary merge, swap, broadcast and all-reduce partner topologies and a
//!   round-based [`reduce`](algs::reduce::reduce) driver
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-blocks = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! A typical round: decompose with
//! [`decompose_into`](decomposition::decompose_into), queue work with
//! [`Master::foreach`](master::Master::foreach), then
//! [`Master::exchange`](master::Master::exchange).

pub mod algs;
pub mod block_error;
pub mod data;
pub mod decomposition;
pub mod master;
pub mod topology;

pub use block_error::BlockError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::reduce::{ReduceProxy, reduce};
    pub use crate::block_error::BlockError;
    pub use crate::data::buffer::MemoryBuffer;
    pub use crate::data::storage::{ExternalStorage, FileStorage, MemoryStorage};
    pub use crate::decomposition::{
        Assigner, ContiguousAssigner, DecomposerOptions, ReducePartners,
        RegularAllReducePartners, RegularBroadcastPartners, RegularDecomposer,
        RegularMergePartners, RegularSwapPartners, RoundRobinAssigner, decompose_into,
        decompose_update,
    };
    pub use crate::master::{
        BlockCallbacks, Master, MasterConfig, Proxy, ProxyWithLink, ops,
    };
    pub use crate::topology::{
        BlockId, Bounds, ContinuousBounds, Direction, DiscreteBounds, Gid, Lid, Link,
        RegularLink,
    };
}
