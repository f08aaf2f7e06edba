//! Per-block façade handed to callbacks.
//!
//! A [`Proxy`] is bound to one gid for one callback invocation. It writes to
//! that block's outgoing queues, reads its incoming queues, and registers
//! collectives. [`ProxyWithLink`] adds the block's neighbor [`Link`].

use std::any::type_name;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use bytemuck::Pod;
use serde::{Serialize, de::DeserializeOwned};

use crate::block_error::BlockError;
use crate::data::buffer::{self, MemoryBuffer};
use crate::data::storage::ExternalStorage;
use crate::master::collectives::{AllReduce, Collective, ReduceOp, Scratch};
use crate::master::queues::{IncomingQueues, OutgoingQueues, QueueRecord};
use crate::topology::link::{BlockId, Gid, Link};

pub struct Proxy<'p> {
    gid: Gid,
    outgoing: &'p mut OutgoingQueues,
    incoming: &'p mut IncomingQueues,
    collectives: &'p mut VecDeque<Box<dyn Collective>>,
    storage: Option<&'p dyn ExternalStorage>,
}

impl<'p> Proxy<'p> {
    pub(crate) fn new(
        gid: Gid,
        outgoing: &'p mut OutgoingQueues,
        incoming: &'p mut IncomingQueues,
        collectives: &'p mut VecDeque<Box<dyn Collective>>,
        storage: Option<&'p dyn ExternalStorage>,
    ) -> Self {
        Self {
            gid,
            outgoing,
            incoming,
            collectives,
            storage,
        }
    }

    #[inline]
    pub fn gid(&self) -> Gid {
        self.gid
    }

    // --- outgoing ---

    fn out_buffer(&mut self, to: BlockId) -> Result<&mut MemoryBuffer, BlockError> {
        self.outgoing
            .entry(to)
            .or_insert_with(QueueRecord::default)
            .buffer_mut(self.storage)
    }

    /// Append `x` to the queue for `to`.
    pub fn enqueue<T: Serialize + ?Sized>(&mut self, to: BlockId, x: &T) -> Result<(), BlockError> {
        buffer::save(self.out_buffer(to)?, x)
    }

    /// Append to the queue for `to` with a custom writer.
    pub fn enqueue_with<F>(&mut self, to: BlockId, f: F) -> Result<(), BlockError>
    where
        F: FnOnce(&mut MemoryBuffer) -> Result<(), BlockError>,
    {
        f(self.out_buffer(to)?)
    }

    /// Append raw elements with no framing; the receiver must know the count.
    pub fn enqueue_slice<T: Pod>(&mut self, to: BlockId, xs: &[T]) -> Result<(), BlockError> {
        buffer::save_slice(self.out_buffer(to)?, xs);
        Ok(())
    }

    /// Make sure a (possibly empty) queue to `to` exists so a message is sent.
    pub fn touch(&mut self, to: BlockId) {
        self.outgoing.entry(to).or_default();
    }

    /// Destinations with a queue this round, sorted.
    pub fn outgoing(&self) -> Vec<BlockId> {
        let mut v: Vec<BlockId> = self.outgoing.keys().copied().collect();
        v.sort_unstable();
        v
    }

    // --- incoming ---

    fn in_buffer(&mut self, from: Gid) -> Result<&mut MemoryBuffer, BlockError> {
        let gid = self.gid;
        self.incoming
            .get_mut(&from)
            .ok_or(BlockError::MissingQueue { gid, from })?
            .buffer_mut(self.storage)
    }

    /// Read the next value sent by `from`.
    pub fn dequeue<T: DeserializeOwned>(&mut self, from: Gid) -> Result<T, BlockError> {
        buffer::load(self.in_buffer(from)?)
    }

    /// Read from the queue of `from` with a custom reader.
    pub fn dequeue_with<R, F>(&mut self, from: Gid, f: F) -> Result<R, BlockError>
    where
        F: FnOnce(&mut MemoryBuffer) -> Result<R, BlockError>,
    {
        f(self.in_buffer(from)?)
    }

    /// Fill `xs` with raw elements sent by `from`.
    pub fn dequeue_slice<T: Pod>(&mut self, from: Gid, xs: &mut [T]) -> Result<(), BlockError> {
        buffer::load_slice(self.in_buffer(from)?, xs)
    }

    /// Gids that sent this block something this round, sorted.
    pub fn incoming(&self) -> Vec<Gid> {
        let mut v: Vec<Gid> = self.incoming.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Unread bytes left from `from`, 0 if nothing arrived.
    pub fn incoming_size(&self, from: Gid) -> usize {
        match self.incoming.get(&from) {
            Some(QueueRecord::Resident(b)) => b.remaining(),
            Some(rec) => rec.size(),
            None => 0,
        }
    }

    // --- collectives ---

    /// Register a reduction of `value` with `op` across all blocks.
    pub fn all_reduce<T, Op>(&mut self, value: T, op: Op)
    where
        T: Clone + Serialize + DeserializeOwned + Send + 'static,
        Op: ReduceOp<T>,
    {
        self.collectives.push_back(Box::new(AllReduce::new(value, op)));
    }

    /// Park `value` on the collective list; it comes back unchanged.
    pub fn scratch<T: Send + 'static>(&mut self, value: T) {
        self.collectives.push_back(Box::new(Scratch(value)));
    }

    /// Pop the oldest collective result.
    pub fn get<T: 'static>(&mut self) -> Result<T, BlockError> {
        let gid = self.gid;
        let front = self.collectives.front().ok_or(BlockError::NoCollective(gid))?;
        if !front.result().is::<T>() {
            return Err(BlockError::CollectiveTypeMismatch {
                gid,
                expected: type_name::<T>(),
            });
        }
        let c = self
            .collectives
            .pop_front()
            .ok_or(BlockError::NoCollective(gid))?;
        c.into_result()
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| BlockError::CollectiveTypeMismatch {
                gid,
                expected: type_name::<T>(),
            })
    }

    /// Peek at the oldest collective result.
    pub fn read<T: 'static>(&self) -> Result<&T, BlockError> {
        let front = self
            .collectives
            .front()
            .ok_or(BlockError::NoCollective(self.gid))?;
        front
            .result()
            .downcast_ref::<T>()
            .ok_or(BlockError::CollectiveTypeMismatch {
                gid: self.gid,
                expected: type_name::<T>(),
            })
    }

    /// Number of collectives registered or awaiting `get`.
    pub fn collectives(&self) -> usize {
        self.collectives.len()
    }
}

/// [`Proxy`] plus the block's neighbor link.
pub struct ProxyWithLink<'p> {
    proxy: Proxy<'p>,
    link: &'p Link,
}

impl<'p> ProxyWithLink<'p> {
    pub(crate) fn new(proxy: Proxy<'p>, link: &'p Link) -> Self {
        Self { proxy, link }
    }

    pub fn link(&self) -> &'p Link {
        self.link
    }

    pub fn proxy_mut(&mut self) -> &mut Proxy<'p> {
        &mut self.proxy
    }

    /// Enqueue `x` to every distinct neighbor other than this block.
    pub fn enqueue_all<T: Serialize + ?Sized>(&mut self, x: &T) -> Result<(), BlockError> {
        for to in self.link.unique_targets(self.proxy.gid) {
            self.proxy.enqueue(to, x)?;
        }
        Ok(())
    }
}

impl<'p> Deref for ProxyWithLink<'p> {
    type Target = Proxy<'p>;
    fn deref(&self) -> &Proxy<'p> {
        &self.proxy
    }
}

impl DerefMut for ProxyWithLink<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.proxy
    }
}
