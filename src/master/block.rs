//! Block slots: residency, lifecycle callbacks and out-of-core moves.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Serialize, de::DeserializeOwned};

use crate::block_error::BlockError;
use crate::data::buffer::{self, MemoryBuffer};
use crate::data::storage::{ExternalStorage, StorageHandle};
use crate::master::collectives::Collective;
use crate::master::queues::{IncomingQueues, OutgoingQueues, discard_all};
use crate::topology::link::Gid;

/// How to rebuild a block after it has been moved out of core.
///
/// Destruction is `Drop`.
pub struct BlockCallbacks<B> {
    pub create: fn() -> B,
    pub save: fn(&B, &mut MemoryBuffer) -> Result<(), BlockError>,
    pub load: fn(&mut B, &mut MemoryBuffer) -> Result<(), BlockError>,
}

impl<B> Clone for BlockCallbacks<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for BlockCallbacks<B> {}

impl<B> std::fmt::Debug for BlockCallbacks<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCallbacks").finish_non_exhaustive()
    }
}

impl<B: Serialize + DeserializeOwned + Default> BlockCallbacks<B> {
    /// Callbacks that store the block with bincode.
    pub fn serde() -> Self {
        Self {
            create: B::default,
            save: |b, bb| buffer::save(bb, b),
            load: |b, bb| {
                *b = buffer::load(bb)?;
                Ok(())
            },
        }
    }
}

#[derive(Debug)]
pub(crate) enum Residency<B> {
    InMemory(B),
    Stored(StorageHandle),
    Released,
}

/// Everything a process keeps per block besides its gid and link.
pub(crate) struct SlotState<B> {
    pub residency: Residency<B>,
    pub outgoing: OutgoingQueues,
    pub incoming: IncomingQueues,
    pub collectives: VecDeque<Box<dyn Collective>>,
}

impl<B> SlotState<B> {
    pub fn new(block: B) -> Self {
        Self {
            residency: Residency::InMemory(block),
            outgoing: OutgoingQueues::new(),
            incoming: IncomingQueues::new(),
            collectives: VecDeque::new(),
        }
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        matches!(self.residency, Residency::InMemory(_))
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        matches!(self.residency, Residency::Released)
    }

    pub fn block_mut(&mut self) -> Option<&mut B> {
        match &mut self.residency {
            Residency::InMemory(b) => Some(b),
            _ => None,
        }
    }
}

/// Shared, read-only context for moving blocks and queues in and out of core.
pub(crate) struct Residence<'s, B> {
    pub storage: Option<&'s dyn ExternalStorage>,
    pub callbacks: Option<&'s BlockCallbacks<B>>,
    pub threshold: usize,
    pub in_memory: &'s AtomicUsize,
}

impl<B> Clone for Residence<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Residence<'_, B> {}

impl<B> Residence<'_, B> {
    fn backend(&self, gid: Gid) -> Result<(&dyn ExternalStorage, &BlockCallbacks<B>), BlockError> {
        match (self.storage, self.callbacks) {
            (Some(s), Some(c)) => Ok((s, c)),
            _ => Err(BlockError::NoStorage(gid)),
        }
    }

    /// Write a resident block (and its large queues) to storage without
    /// touching the residency counter.
    pub fn store(&self, gid: Gid, state: &mut SlotState<B>) -> Result<(), BlockError> {
        let (storage, cb) = self.backend(gid)?;
        if let Residency::InMemory(b) = &state.residency {
            let mut bb = MemoryBuffer::new();
            (cb.save)(b, &mut bb)?;
            let handle = storage.put(&mut bb)?;
            state.residency = Residency::Stored(handle);
            log::trace!("block {gid} stored as {handle:?}");
        }
        self.unload_queues(state)
    }

    /// Move a resident block out of core.
    pub fn unload(&self, gid: Gid, state: &mut SlotState<B>) -> Result<(), BlockError> {
        if state.is_resident() {
            self.store(gid, state)?;
            self.in_memory.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Bring a stored block (and its queues) back into memory.
    pub fn load(&self, gid: Gid, state: &mut SlotState<B>) -> Result<(), BlockError> {
        if let Residency::Stored(handle) = state.residency {
            let (storage, cb) = self.backend(gid)?;
            let mut bb = MemoryBuffer::new();
            storage.get(handle, &mut bb)?;
            let mut b = (cb.create)();
            (cb.load)(&mut b, &mut bb)?;
            state.residency = Residency::InMemory(b);
            self.in_memory.fetch_add(1, Ordering::Relaxed);
            log::trace!("block {gid} loaded from {handle:?}");
        }
        self.load_queues(state)
    }

    pub fn load_queues(&self, state: &mut SlotState<B>) -> Result<(), BlockError> {
        for rec in state.outgoing.values_mut() {
            rec.buffer_mut(self.storage)?;
        }
        for rec in state.incoming.values_mut() {
            rec.buffer_mut(self.storage)?;
        }
        Ok(())
    }

    /// Spill the queues above the threshold; a no-op without storage.
    pub fn unload_queues(&self, state: &mut SlotState<B>) -> Result<(), BlockError> {
        let Some(storage) = self.storage else {
            return Ok(());
        };
        for rec in state.outgoing.values_mut() {
            rec.unload(storage, self.threshold)?;
        }
        for rec in state.incoming.values_mut() {
            rec.unload(storage, self.threshold)?;
        }
        Ok(())
    }

    /// Drop all queues and collectives and take the block out, loading it
    /// first if it is stored. The slot is left released.
    pub fn release(&self, gid: Gid, state: &mut SlotState<B>) -> Result<B, BlockError> {
        self.load(gid, state)?;
        discard_all(&mut state.outgoing, self.storage)?;
        discard_all(&mut state.incoming, self.storage)?;
        state.collectives.clear();
        match std::mem::replace(&mut state.residency, Residency::Released) {
            Residency::InMemory(b) => {
                self.in_memory.fetch_sub(1, Ordering::Relaxed);
                Ok(b)
            }
            _ => Err(BlockError::UnknownGid(gid)),
        }
    }

    /// Drop the block and its queues without loading anything; stored
    /// records are destroyed in place. The slot is left released.
    pub fn discard(&self, gid: Gid, state: &mut SlotState<B>) -> Result<(), BlockError> {
        discard_all(&mut state.outgoing, self.storage)?;
        discard_all(&mut state.incoming, self.storage)?;
        state.collectives.clear();
        match std::mem::replace(&mut state.residency, Residency::Released) {
            Residency::InMemory(_) => {
                self.in_memory.fetch_sub(1, Ordering::Relaxed);
            }
            Residency::Stored(handle) => {
                self.storage
                    .ok_or(BlockError::NoStorage(gid))?
                    .destroy(handle)?;
                log::trace!("block {gid} discarded from {handle:?}");
            }
            Residency::Released => {}
        }
        Ok(())
    }
}
