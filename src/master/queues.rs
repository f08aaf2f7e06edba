//! Per-block message queues and their residency.
//!
//! A queue is either held in memory or spilled to [`ExternalStorage`] and
//! referenced by handle. Outgoing queues are keyed by destination
//! [`BlockId`], incoming queues by source gid.

use hashbrown::HashMap;

use crate::block_error::BlockError;
use crate::data::buffer::MemoryBuffer;
use crate::data::storage::{ExternalStorage, StorageHandle};
use crate::topology::link::{BlockId, Gid};

pub type OutgoingQueues = HashMap<BlockId, QueueRecord>;
pub type IncomingQueues = HashMap<Gid, QueueRecord>;

#[derive(Debug)]
pub enum QueueRecord {
    Resident(MemoryBuffer),
    Spilled { handle: StorageHandle, size: usize },
}

impl Default for QueueRecord {
    fn default() -> Self {
        QueueRecord::Resident(MemoryBuffer::new())
    }
}

impl QueueRecord {
    /// Record for a freshly delivered payload: spilled only when `spill` is
    /// requested, storage exists and the payload exceeds `threshold` bytes.
    pub fn place(
        mut buf: MemoryBuffer,
        spill: bool,
        storage: Option<&dyn ExternalStorage>,
        threshold: usize,
    ) -> Result<Self, BlockError> {
        match storage {
            Some(s) if spill && buf.size() > threshold => {
                let size = buf.size();
                let handle = s.put(&mut buf)?;
                Ok(QueueRecord::Spilled { handle, size })
            }
            _ => Ok(QueueRecord::Resident(buf)),
        }
    }

    /// Payload size in bytes, wherever it lives.
    pub fn size(&self) -> usize {
        match self {
            QueueRecord::Resident(b) => b.size(),
            QueueRecord::Spilled { size, .. } => *size,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, QueueRecord::Resident(_))
    }

    /// The in-memory buffer, reading it back from storage first if needed.
    pub fn buffer_mut(
        &mut self,
        storage: Option<&dyn ExternalStorage>,
    ) -> Result<&mut MemoryBuffer, BlockError> {
        if let QueueRecord::Spilled { handle, .. } = *self {
            let s = storage.ok_or(BlockError::UnknownHandle(handle.0))?;
            let mut bb = MemoryBuffer::new();
            s.get(handle, &mut bb)?;
            *self = QueueRecord::Resident(bb);
        }
        match self {
            QueueRecord::Resident(b) => Ok(b),
            QueueRecord::Spilled { handle, .. } => Err(BlockError::UnknownHandle(handle.0)),
        }
    }

    /// Spill a resident queue larger than `threshold`.
    pub fn unload(
        &mut self,
        storage: &dyn ExternalStorage,
        threshold: usize,
    ) -> Result<(), BlockError> {
        if let QueueRecord::Resident(b) = self {
            if b.size() > threshold {
                let size = b.size();
                let handle = storage.put(b)?;
                *self = QueueRecord::Spilled { handle, size };
            }
        }
        Ok(())
    }

    /// Take the payload out, reading it back from storage if needed.
    pub fn into_buffer(
        mut self,
        storage: Option<&dyn ExternalStorage>,
    ) -> Result<MemoryBuffer, BlockError> {
        let mut bb = std::mem::take(self.buffer_mut(storage)?);
        bb.reset();
        Ok(bb)
    }

    /// Drop the payload, releasing its storage record if it has one.
    pub fn discard(self, storage: Option<&dyn ExternalStorage>) -> Result<(), BlockError> {
        match (self, storage) {
            (QueueRecord::Spilled { handle, .. }, Some(s)) => s.destroy(handle),
            _ => Ok(()),
        }
    }
}

/// Discard every record of `queues`.
pub(crate) fn discard_all<K>(
    queues: &mut HashMap<K, QueueRecord>,
    storage: Option<&dyn ExternalStorage>,
) -> Result<(), BlockError> {
    for (_, rec) in queues.drain() {
        rec.discard(storage)?;
    }
    Ok(())
}
