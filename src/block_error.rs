//! BlockError: Unified error type for mesh-blocks public APIs
//!
//! Decomposition, queue exchange, storage and collectives all report failures
//! through this one enum so callers can propagate with `?`.

use thiserror::Error;

use crate::topology::link::{Gid, Lid};

/// Unified error type for mesh-blocks operations.
#[derive(Debug, Error)]
pub enum BlockError {
    /// The requested block count cannot be split across the user-constrained axes.
    #[error("cannot factor {nblocks} blocks into the provided divisions {divisions:?}")]
    Unfactorable {
        nblocks: usize,
        divisions: Vec<usize>,
    },
    /// A factor would produce an empty or inverted interval along an axis.
    #[error("unable to decompose domain into {nblocks} blocks: axis {axis} splits into [{min}, {max}]")]
    DegenerateSplit {
        nblocks: usize,
        axis: usize,
        min: String,
        max: String,
    },
    /// Dimension is zero, above the supported maximum, or inconsistent between inputs.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// The domain must contain at least one block.
    #[error("decomposition needs at least one block")]
    NoBlocks,
    /// No block with this global id is registered on this process.
    #[error("unknown gid {0}")]
    UnknownGid(Gid),
    /// A block with this global id is already registered on this process.
    #[error("gid {0} is already registered")]
    DuplicateGid(Gid),
    /// No block is registered under this local id.
    #[error("unknown or released lid {0}")]
    UnknownLid(Lid),
    /// A dequeue was attempted from a neighbor that sent nothing this round.
    #[error("block {gid} has no incoming queue from {from}")]
    MissingQueue { gid: Gid, from: Gid },
    /// A queue held fewer bytes than the requested read.
    #[error("queue underflow: needed {needed} bytes, {available} available")]
    QueueUnderflow { needed: usize, available: usize },
    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// External storage could not write or read a record.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    /// The storage handle is not (or no longer) known to the storage backend.
    #[error("unknown storage handle {0}")]
    UnknownHandle(u64),
    /// A block had to be moved out of core but no storage/callbacks were configured.
    #[error("block {0} must be unloaded but the master has no external storage")]
    NoStorage(Gid),
    /// A collective result was read back as a different type than it was registered with.
    #[error("collective type mismatch on block {gid}: expected {expected}")]
    CollectiveTypeMismatch { gid: Gid, expected: &'static str },
    /// `get`/`read` found no collective result left on the block.
    #[error("block {0} has no pending collective result")]
    NoCollective(Gid),
    /// Blocks registered differing numbers of collectives in the same round.
    #[error("collective count mismatch: block {gid} has {found}, expected {expected}")]
    CollectiveCountMismatch {
        gid: Gid,
        expected: usize,
        found: usize,
    },
    /// A received message did not carry a valid queue header.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// Generic communication failure.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
}
