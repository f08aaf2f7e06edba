//! Byte buffers and out-of-core storage.
//!
//! - [`buffer`]: the in-memory byte buffer every queue and block image lives in
//! - [`storage`]: where buffers go when they are moved out of core

pub mod buffer;
pub mod storage;

pub use buffer::MemoryBuffer;
pub use storage::{ExternalStorage, FileStorage, MemoryStorage, StorageHandle};
