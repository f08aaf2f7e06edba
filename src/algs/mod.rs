//! Message passing, the queue wire format, and reductions built on a master.

pub mod communicator;
pub mod reduce;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm};
pub use reduce::{ReduceProxy, reduce};
