//! Block registry and round execution.
//!
//! A [`Master`] owns the blocks of one process. Each round, callbacks
//! registered with [`foreach`](Master::foreach) run on every block (possibly
//! on several worker threads, loading blocks from external storage as the
//! in-memory budget allows) and enqueue messages for neighbors;
//! [`exchange`](Master::exchange) then delivers those queues and composes
//! collectives.
//!
//! Blocks live in a dense slot array indexed by local id. A released slot
//! keeps its lid as a tombstone until [`clear`](Master::clear).

mod block;
pub mod collectives;
pub mod config;
pub mod proxy;
pub mod queues;

pub use block::BlockCallbacks;
pub use collectives::{AllReduce, Collective, Gather, ReduceOp, Scratch, ops};
pub use config::MasterConfig;
pub use proxy::{Proxy, ProxyWithLink};
pub use queues::QueueRecord;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{decode_queue, encode_queue};
use crate::block_error::BlockError;
use crate::data::buffer::MemoryBuffer;
use crate::data::storage::ExternalStorage;
use block::{Residence, Residency, SlotState};
use queues::discard_all;

use crate::topology::link::{Gid, Lid, Link};

type Callback<'a, B> = Box<
    dyn Fn(Option<&mut B>, &mut ProxyWithLink<'_>) -> Result<(), BlockError> + Send + Sync + 'a,
>;
type SkipFn<'a> = Box<dyn Fn(Lid, Gid) -> bool + Send + Sync + 'a>;

/// One deferred callback and its optional skip predicate.
pub(crate) struct Command<'a, B> {
    f: Callback<'a, B>,
    skip: Option<SkipFn<'a>>,
}

impl<'a, B> Command<'a, B> {
    pub(crate) fn new<F>(f: F, skip: Option<SkipFn<'a>>) -> Self
    where
        F: Fn(Option<&mut B>, &mut ProxyWithLink<'_>) -> Result<(), BlockError> + Send + Sync + 'a,
    {
        Self {
            f: Box::new(f),
            skip,
        }
    }

    #[inline]
    fn skips(&self, lid: Lid, gid: Gid) -> bool {
        self.skip.as_ref().is_some_and(|s| s(lid, gid))
    }
}

struct BlockSlot<B> {
    gid: Gid,
    /// `None` once the block has been released.
    link: Option<Link>,
    state: Mutex<SlotState<B>>,
}

struct Registry<B> {
    slots: Vec<BlockSlot<B>>,
    lids: HashMap<Gid, Lid>,
}

impl<B> Default for Registry<B> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            lids: HashMap::new(),
        }
    }
}

/// Storage backend, callbacks and the residency counter.
struct OutOfCore<B> {
    storage: Option<Arc<dyn ExternalStorage>>,
    callbacks: Option<BlockCallbacks<B>>,
    threshold: usize,
    in_memory: AtomicUsize,
}

impl<B> OutOfCore<B> {
    fn residence(&self) -> Residence<'_, B> {
        Residence {
            storage: self.storage.as_deref(),
            callbacks: self.callbacks.as_ref(),
            threshold: self.threshold,
            in_memory: &self.in_memory,
        }
    }
}

pub struct Master<'a, B, C> {
    comm: &'a C,
    config: MasterConfig,
    ooc: OutOfCore<B>,
    registry: RwLock<Registry<B>>,
    expected: AtomicUsize,
    received: usize,
    commands: Vec<Command<'a, B>>,
}

impl<B, C> Drop for Master<'_, B, C> {
    /// Destroy what the blocks still hold in external storage.
    fn drop(&mut self) {
        let residence = self.ooc.residence();
        for slot in self.registry.get_mut().slots.iter_mut() {
            let state = slot.state.get_mut();
            if state.is_released() {
                continue;
            }
            if let Err(e) = residence.discard(slot.gid, state) {
                log::warn!("dropping block {}: {e}", slot.gid);
            }
        }
    }
}

impl<'a, B: Send, C: Communicator> Master<'a, B, C> {
    pub fn new(comm: &'a C, config: MasterConfig) -> Self {
        let threshold = config.queue_threshold;
        Self {
            comm,
            config,
            ooc: OutOfCore {
                storage: None,
                callbacks: None,
                threshold,
                in_memory: AtomicUsize::new(0),
            },
            registry: RwLock::new(Registry::default()),
            expected: AtomicUsize::new(0),
            received: 0,
            commands: Vec::new(),
        }
    }

    /// Enable moving blocks and large queues out of core.
    pub fn with_storage(
        mut self,
        storage: Arc<dyn ExternalStorage>,
        callbacks: BlockCallbacks<B>,
    ) -> Self {
        self.ooc.storage = Some(storage);
        self.ooc.callbacks = Some(callbacks);
        self
    }

    pub fn communicator(&self) -> &'a C {
        self.comm
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn storage(&self) -> Option<&Arc<dyn ExternalStorage>> {
        self.ooc.storage.as_ref()
    }

    // --- registry ---

    /// Register `block` under `gid`; callable from several threads at once.
    ///
    /// The expected message count grows by the number of distinct neighbors
    /// in `link` other than the block itself. When the in-memory budget is
    /// already used up the block goes straight to storage.
    pub fn add(&self, gid: Gid, block: B, link: impl Into<Link>) -> Result<Lid, BlockError> {
        let link = link.into();
        let mut registry = self.registry.write();
        if registry.lids.contains_key(&gid) {
            return Err(BlockError::DuplicateGid(gid));
        }
        let mut state = SlotState::new(block);
        let full = self
            .config
            .limit
            .is_some_and(|l| self.ooc.in_memory.load(Ordering::Relaxed) >= l);
        if full {
            self.ooc.residence().store(gid, &mut state)?;
        } else {
            self.ooc.in_memory.fetch_add(1, Ordering::Relaxed);
        }
        let lid = registry.slots.len();
        self.expected
            .fetch_add(link.expected_from(gid), Ordering::Relaxed);
        registry.lids.insert(gid, lid);
        registry.slots.push(BlockSlot {
            gid,
            link: Some(link),
            state: Mutex::new(state),
        });
        log::trace!("added block gid={gid} lid={lid} resident={}", !full);
        Ok(lid)
    }

    /// Number of local ids issued, released slots included.
    pub fn size(&self) -> usize {
        self.registry.read().slots.len()
    }

    pub fn gid(&self, lid: Lid) -> Option<Gid> {
        let registry = self.registry.read();
        registry
            .slots
            .get(lid)
            .filter(|s| s.link.is_some())
            .map(|s| s.gid)
    }

    pub fn lid(&self, gid: Gid) -> Option<Lid> {
        self.registry.read().lids.get(&gid).copied()
    }

    pub fn local(&self, gid: Gid) -> bool {
        self.lid(gid).is_some()
    }

    /// Gids of the live blocks, in lid order.
    pub fn gids(&self) -> Vec<Gid> {
        self.registry
            .read()
            .slots
            .iter()
            .filter(|s| s.link.is_some())
            .map(|s| s.gid)
            .collect()
    }

    pub fn link(&self, lid: Lid) -> Option<MappedRwLockReadGuard<'_, Link>> {
        RwLockReadGuard::try_map(self.registry.read(), |r| {
            r.slots.get(lid).and_then(|s| s.link.as_ref())
        })
        .ok()
    }

    /// Blocks currently held in memory.
    pub fn in_memory(&self) -> usize {
        self.ooc.in_memory.load(Ordering::Relaxed)
    }

    pub fn loaded(&self, lid: Lid) -> bool {
        self.registry
            .read()
            .slots
            .get(lid)
            .is_some_and(|s| s.state.lock().is_resident())
    }

    /// Messages the next flush waits for.
    pub fn expected(&self) -> usize {
        self.expected.load(Ordering::Relaxed)
    }

    pub fn set_expected(&self, n: usize) {
        self.expected.store(n, Ordering::Relaxed);
    }

    fn sub_expected(&self, n: usize) {
        let _ = self
            .expected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |e| {
                Some(e.saturating_sub(n))
            });
    }

    /// Messages received by the most recent flush.
    pub fn received(&self) -> usize {
        self.received
    }

    /// The block at `lid` if it is in memory.
    pub fn block_mut(&mut self, lid: Lid) -> Option<&mut B> {
        self.registry
            .get_mut()
            .slots
            .get_mut(lid)?
            .state
            .get_mut()
            .block_mut()
    }

    /// The block at `lid`, loading it from storage if needed.
    pub fn get(&mut self, lid: Lid) -> Result<&mut B, BlockError> {
        let residence = self.ooc.residence();
        let slot = self
            .registry
            .get_mut()
            .slots
            .get_mut(lid)
            .filter(|s| s.link.is_some())
            .ok_or(BlockError::UnknownLid(lid))?;
        let state = slot.state.get_mut();
        residence.load(slot.gid, state)?;
        state.block_mut().ok_or(BlockError::UnknownLid(lid))
    }

    /// Move the block at `lid` (and its large queues) to storage.
    pub fn unload(&mut self, lid: Lid) -> Result<(), BlockError> {
        let residence = self.ooc.residence();
        let slot = self
            .registry
            .get_mut()
            .slots
            .get_mut(lid)
            .filter(|s| s.link.is_some())
            .ok_or(BlockError::UnknownLid(lid))?;
        residence.unload(slot.gid, slot.state.get_mut())
    }

    /// Take the block and its link out of the registry.
    ///
    /// Pending queues and collectives of the block are dropped and the
    /// expected message count shrinks by what its link contributed.
    pub fn release(&mut self, lid: Lid) -> Result<(B, Link), BlockError> {
        let residence = self.ooc.residence();
        let registry = self.registry.get_mut();
        let slot = registry
            .slots
            .get_mut(lid)
            .filter(|s| s.link.is_some())
            .ok_or(BlockError::UnknownLid(lid))?;
        let gid = slot.gid;
        let block = residence.release(gid, slot.state.get_mut())?;
        let link = slot.link.take().unwrap_or_default();
        registry.lids.remove(&gid);
        self.sub_expected(link.expected_from(gid));
        log::trace!("released block gid={gid} lid={lid}");
        Ok((block, link))
    }

    pub fn destroy(&mut self, lid: Lid) -> Result<(), BlockError> {
        self.release(lid).map(drop)
    }

    /// Destroy every block and forget all lids.
    pub fn clear(&mut self) -> Result<(), BlockError> {
        let residence = self.ooc.residence();
        let registry = self.registry.get_mut();
        for slot in registry.slots.iter_mut() {
            let state = slot.state.get_mut();
            if !state.is_released() {
                residence.discard(slot.gid, state)?;
            }
        }
        registry.slots.clear();
        registry.lids.clear();
        self.expected.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Swap the link of `lid`, adjusting the expected message count.
    pub fn replace_link(&mut self, lid: Lid, link: impl Into<Link>) -> Result<Link, BlockError> {
        let link = link.into();
        let slot = self
            .registry
            .get_mut()
            .slots
            .get_mut(lid)
            .filter(|s| s.link.is_some())
            .ok_or(BlockError::UnknownLid(lid))?;
        let gid = slot.gid;
        let added = link.expected_from(gid);
        let old = slot.link.replace(link).unwrap_or_default();
        self.sub_expected(old.expected_from(gid));
        self.expected.fetch_add(added, Ordering::Relaxed);
        Ok(old)
    }

    // --- rounds ---

    /// Queue `f` to run on every block; runs at once in immediate mode.
    pub fn foreach<F>(&mut self, f: F) -> Result<(), BlockError>
    where
        F: Fn(&mut B, &mut ProxyWithLink<'_>) -> Result<(), BlockError> + Send + Sync + 'a,
    {
        let cmd = Command::new(
            move |b: Option<&mut B>, cp: &mut ProxyWithLink<'_>| match b {
                Some(b) => f(b, cp),
                None => Ok(()),
            },
            None,
        );
        self.push_command(cmd)
    }

    /// Like [`foreach`](Self::foreach), but blocks for which `skip(lid, gid)`
    /// holds are handed to `f` as `None`. If every pending command skips a
    /// block, that block is not loaded; its queues still are.
    pub fn foreach_skip<F, S>(&mut self, f: F, skip: S) -> Result<(), BlockError>
    where
        F: Fn(Option<&mut B>, &mut ProxyWithLink<'_>) -> Result<(), BlockError>
            + Send
            + Sync
            + 'a,
        S: Fn(Lid, Gid) -> bool + Send + Sync + 'a,
    {
        self.push_command(Command::new(f, Some(Box::new(skip))))
    }

    fn push_command(&mut self, cmd: Command<'a, B>) -> Result<(), BlockError> {
        self.commands.push(cmd);
        if self.config.immediate {
            self.execute()
        } else {
            Ok(())
        }
    }

    /// Commands registered but not yet executed.
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Run all pending commands on all blocks, then drop them.
    pub fn execute(&mut self) -> Result<(), BlockError> {
        let commands = std::mem::take(&mut self.commands);
        self.execute_commands(&commands)
    }

    pub(crate) fn execute_commands(&mut self, commands: &[Command<'_, B>]) -> Result<(), BlockError> {
        if commands.is_empty() {
            return Ok(());
        }
        let residence = self.ooc.residence();
        let registry = self.registry.get_mut();

        // blocks already in memory go first
        let mut order = Vec::with_capacity(registry.slots.len());
        let mut stored = Vec::new();
        for (lid, slot) in registry.slots.iter_mut().enumerate() {
            if slot.link.is_none() {
                continue;
            }
            if slot.state.get_mut().is_resident() {
                order.push(lid);
            } else {
                stored.push(lid);
            }
        }
        order.extend(stored);

        let threads = self.config.effective_threads(order.len());
        let per_thread = self.config.blocks_per_thread(threads);
        let registry: &Registry<B> = registry;
        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<BlockError>> = Mutex::new(None);
        let work = || {
            if let Err(e) = run_worker(
                registry, &order, &cursor, &failed, commands, residence, per_thread,
            ) {
                failed.store(true, Ordering::Relaxed);
                let mut first = first_error.lock();
                if first.is_none() {
                    *first = Some(e);
                }
            }
        };
        if threads == 1 {
            work();
        } else {
            rayon::scope(|s| {
                for _ in 0..threads {
                    s.spawn(|_| work());
                }
            });
        }
        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }

        for slot in self.registry.get_mut().slots.iter_mut() {
            discard_all(&mut slot.state.get_mut().incoming, residence.storage)?;
        }

        let in_memory = self.ooc.in_memory.load(Ordering::Relaxed);
        if let Some(limit) = self.config.limit {
            if in_memory > limit {
                log::error!("{in_memory} blocks in memory after execute, limit is {limit}");
                panic!("in-memory block limit exceeded: {in_memory} > {limit}");
            }
        }
        log::debug!(
            "executed {} command(s) on {} block(s) with {threads} thread(s)",
            commands.len(),
            order.len()
        );
        Ok(())
    }

    /// Execute pending commands, make sure every block sends to each of its
    /// distinct neighbors (possibly an empty queue), then deliver.
    pub fn exchange(&mut self) -> Result<(), BlockError> {
        self.execute()?;
        for slot in self.registry.get_mut().slots.iter_mut() {
            let Some(link) = slot.link.as_ref() else {
                continue;
            };
            let state = slot.state.get_mut();
            for to in link.unique_targets(slot.gid) {
                state.outgoing.entry(to).or_default();
            }
        }
        self.flush()
    }

    /// Deliver all outgoing queues and wait until every expected message has
    /// arrived, then compose collectives and synchronize all ranks.
    ///
    /// Messages to blocks on this rank skip the network. Messages a block
    /// sends to itself are delivered but not counted.
    pub fn flush(&mut self) -> Result<(), BlockError> {
        let comm = self.comm;
        let rank = comm.rank();
        let residence = self.ooc.residence();
        let (storage, threshold) = (residence.storage, residence.threshold);
        let expected = self.expected.load(Ordering::Relaxed);
        let registry = self.registry.get_mut();

        // resident queues are sent first
        let mut to_send: VecDeque<Lid> = VecDeque::new();
        let mut spilled = Vec::new();
        for (lid, slot) in registry.slots.iter_mut().enumerate() {
            let state = slot.state.get_mut();
            // leftovers of a round nobody read
            discard_all(&mut state.incoming, storage)?;
            if state.outgoing.is_empty() {
                continue;
            }
            if state.outgoing.values().all(QueueRecord::is_resident) {
                to_send.push_back(lid);
            } else {
                spilled.push(lid);
            }
        }
        to_send.extend(spilled);

        let nblocks = registry.lids.len();
        let budget = match self.config.limit {
            Some(limit) if nblocks > 0 => (to_send.len() / nblocks * limit).max(1),
            _ => to_send.len().max(1),
        };

        let mut in_flight: Vec<C::SendHandle> = Vec::new();
        let (mut received, mut sent) = (0usize, 0usize);
        let stall = self.config.stall_warning_ms.map(Duration::from_millis);
        let mut last_progress = Instant::now();
        let mut warned = false;
        loop {
            let mut progress = false;

            // post sends
            while in_flight.len() < budget {
                let Some(lid) = to_send.pop_front() else {
                    break;
                };
                let from = registry.slots[lid].gid;
                let mut queues: Vec<_> =
                    std::mem::take(&mut registry.slots[lid].state.get_mut().outgoing)
                        .into_iter()
                        .collect();
                queues.sort_unstable_by_key(|(to, _)| *to);
                for (to, rec) in queues {
                    let buf = rec.into_buffer(storage)?;
                    if to.proc == rank {
                        deliver(registry, from, to.gid, buf, storage, threshold)?;
                        if to.gid != from {
                            received += 1;
                        }
                    } else {
                        let msg = encode_queue(from, to.gid, buf.as_slice());
                        in_flight.push(comm.isend(to.proc, CommTag::QUEUE, msg));
                        sent += 1;
                    }
                }
                progress = true;
            }

            // retire completed sends
            let before = in_flight.len();
            in_flight.retain_mut(|h| !h.test());
            progress |= in_flight.len() != before;

            // drain arrivals
            while let Some(env) = comm.try_recv(None, CommTag::QUEUE) {
                let msg = decode_queue(env.payload)?;
                let buf = MemoryBuffer::from_vec(msg.payload.to_vec());
                deliver(registry, msg.from, msg.to, buf, storage, threshold)?;
                received += 1;
                progress = true;
            }

            if in_flight.is_empty() && to_send.is_empty() && received >= expected {
                break;
            }
            if progress {
                last_progress = Instant::now();
                continue;
            }
            if let Some(limit) = stall {
                if !warned && last_progress.elapsed() >= limit {
                    log::warn!(
                        "flush stalled on rank {rank}: received={received} expected={expected} in_flight={} unsent_blocks={}",
                        in_flight.len(),
                        to_send.len()
                    );
                    warned = true;
                }
            }
            std::thread::yield_now();
        }

        self.received = received;
        log::debug!("flush on rank {rank}: sent={sent} received={received} expected={expected}");
        self.process_collectives()?;
        comm.barrier();
        Ok(())
    }

    fn process_collectives(&mut self) -> Result<(), BlockError> {
        let comm = self.comm;
        let mut lists: Vec<(Gid, &mut VecDeque<Box<dyn Collective>>)> = self
            .registry
            .get_mut()
            .slots
            .iter_mut()
            .filter(|s| s.link.is_some())
            .map(|s| (s.gid, &mut s.state.get_mut().collectives))
            .collect();
        if lists.iter().all(|(_, l)| l.is_empty()) {
            return Ok(());
        }
        collectives::compose(&mut lists, comm)
    }
}

/// Record `buf` as the queue from `from` in the incoming table of local block `to`.
///
/// The payload is spilled right away when `to` is out of core and the
/// payload is above the threshold.
fn deliver<B>(
    registry: &mut Registry<B>,
    from: Gid,
    to: Gid,
    buf: MemoryBuffer,
    storage: Option<&dyn ExternalStorage>,
    threshold: usize,
) -> Result<(), BlockError> {
    let &lid = registry.lids.get(&to).ok_or(BlockError::UnknownGid(to))?;
    let target = registry.slots[lid].state.get_mut();
    let rec = QueueRecord::place(buf, !target.is_resident(), storage, threshold)?;
    if let Some(old) = target.incoming.insert(from, rec) {
        old.discard(storage)?;
    }
    log::trace!("queue {from} -> {to} recorded");
    Ok(())
}

/// Claim blocks from the shared cursor until none are left.
///
/// Each worker keeps at most `per_thread` blocks it touched in memory and
/// moves all of them out before loading one more.
fn run_worker<B: Send>(
    registry: &Registry<B>,
    order: &[Lid],
    cursor: &AtomicUsize,
    failed: &AtomicBool,
    commands: &[Command<'_, B>],
    residence: Residence<'_, B>,
    per_thread: Option<usize>,
) -> Result<(), BlockError> {
    let mut local: Vec<Lid> = Vec::new();
    while !failed.load(Ordering::Relaxed) {
        let Some(&lid) = order.get(cursor.fetch_add(1, Ordering::Relaxed)) else {
            break;
        };
        let slot = &registry.slots[lid];
        let Some(link) = slot.link.as_ref() else {
            continue;
        };
        let gid = slot.gid;
        let skip_all = commands.iter().all(|c| c.skips(lid, gid));

        let mut state = slot.state.lock();
        if !skip_all || state.is_resident() {
            if per_thread.is_some_and(|n| local.len() >= n) {
                for other in local.drain(..) {
                    let o = &registry.slots[other];
                    residence.unload(o.gid, &mut o.state.lock())?;
                }
            }
            local.push(lid);
        }
        if skip_all {
            residence.load_queues(&mut state)?;
        } else {
            residence.load(gid, &mut state)?;
        }

        let SlotState {
            residency,
            outgoing,
            incoming,
            collectives,
        } = &mut *state;
        for cmd in commands {
            let block = match &mut *residency {
                Residency::InMemory(b) if !cmd.skips(lid, gid) => Some(b),
                _ => None,
            };
            let proxy = Proxy::new(
                gid,
                &mut *outgoing,
                &mut *incoming,
                &mut *collectives,
                residence.storage,
            );
            let mut cp = ProxyWithLink::new(proxy, link);
            (cmd.f)(block, &mut cp)?;
        }
        for rec in incoming.values_mut() {
            if let QueueRecord::Resident(b) = rec {
                b.wipe();
            }
        }

        if !state.is_resident() {
            residence.unload_queues(&mut state)?;
        }
    }
    Ok(())
}
