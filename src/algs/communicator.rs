//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte buffers* handed over as [`Bytes`]. Sends are
//! non-blocking and return a handle that can be polled with [`Wait::test`];
//! receives are non-blocking probes ([`Communicator::try_recv`]). Delivery is
//! FIFO per `(source, tag)` pair and unordered across sources.
//!
//! The process group is an explicit value: construct it once, pass it by
//! reference to every [`Master`](crate::master::Master) that uses it.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

/// Message tag, reserved per protocol so runtime traffic never matches
/// application traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    /// Block-to-block queue exchange.
    pub const QUEUE: CommTag = CommTag(0xB10C);
    /// Collective composition (all-gather of partial results).
    pub const COLLECTIVE: CommTag = CommTag(0xB10D);
    /// Message-based barrier.
    pub const BARRIER: CommTag = CommTag(0xB10E);

    #[inline]
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

/// A received message and the rank it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub source: usize,
    pub payload: Bytes,
}

/// Anything that can be polled or waited on.
pub trait Wait {
    /// Non-blocking completion check.
    fn test(&mut self) -> bool;

    /// Spin until completion.
    fn wait(mut self)
    where
        Self: Sized,
    {
        while !self.test() {
            std::thread::yield_now();
        }
    }
}

impl Wait for () {
    fn test(&mut self) -> bool {
        true
    }
}

/// Non-blocking point-to-point communication interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Post a send of `buf` to `peer`; must not wait for a matching receive.
    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Self::SendHandle;

    /// Receive one message with `tag`, from `source` or from any rank.
    fn try_recv(&self, source: Option<usize>, tag: CommTag) -> Option<Envelope>;

    /// Spin on [`try_recv`](Self::try_recv) until a message arrives.
    fn recv(&self, source: Option<usize>, tag: CommTag) -> Envelope {
        loop {
            if let Some(env) = self.try_recv(source, tag) {
                return env;
            }
            std::thread::yield_now();
        }
    }

    /// Every rank sends `buf`; returns all contributions indexed by rank.
    fn all_gather(&self, tag: CommTag, buf: Bytes) -> Vec<Bytes> {
        let (me, n) = (self.rank(), self.size());
        let sends: Vec<_> = (0..n)
            .filter(|&p| p != me)
            .map(|p| self.isend(p, tag, buf.clone()))
            .collect();
        let mut out = vec![Bytes::new(); n];
        for (peer, slot) in out.iter_mut().enumerate() {
            if peer != me {
                *slot = self.recv(Some(peer), tag).payload;
            }
        }
        out[me] = buf;
        for s in sends {
            s.wait();
        }
        out
    }

    /// Returns once every rank has entered the barrier.
    fn barrier(&self) {
        if self.size() > 1 {
            self.all_gather(CommTag::BARRIER, Bytes::new());
        }
    }
}

/// Compile-time no-op comm for single-process runs and serial unit tests.
///
/// Reports rank 0 of 1; messages to other ranks are dropped.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: CommTag, _buf: Bytes) {}
    fn try_recv(&self, _source: Option<usize>, _tag: CommTag) -> Option<Envelope> {
        None
    }
}

// --- LocalComm: several simulated ranks inside one process ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// One rank of an in-process world; see [`LocalComm::world`].
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<DashMap<Key, VecDeque<Bytes>>>,
}

impl LocalComm {
    /// Build `size` connected endpoints, one per simulated rank.
    ///
    /// Each endpoint is meant to be driven by its own thread.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    fn pop(&self, src: usize, tag: CommTag) -> Option<Bytes> {
        let mut q = self.mailbox.get_mut(&(src, self.rank, tag.as_u16()))?;
        q.pop_front()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) {
        debug_assert!(peer < self.size, "rank {peer} outside world of {}", self.size);
        self.mailbox
            .entry((self.rank, peer, tag.as_u16()))
            .or_default()
            .push_back(buf);
    }

    fn try_recv(&self, source: Option<usize>, tag: CommTag) -> Option<Envelope> {
        match source {
            Some(src) => self.pop(src, tag).map(|payload| Envelope { source: src, payload }),
            None => (0..self.size).find_map(|src| {
                self.pop(src, tag)
                    .map(|payload| Envelope { source: src, payload })
            }),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI-backed communicator; the caller owns the `Universe` and keeps it
    /// alive for as long as this value is used.
    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }
    }

    /// Pending `MPI_Isend`; owns the send buffer until completion.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: Option<*mut [u8]>,
    }

    impl MpiSendHandle {
        fn release(&mut self) {
            if let Some(ptr) = self.buf.take() {
                // SAFETY: `ptr` came from `Box::leak` in `isend` and the request
                // that borrowed it has completed.
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }

    impl Wait for MpiSendHandle {
        fn test(&mut self) -> bool {
            match self.req.take() {
                None => true,
                Some(r) => match r.test() {
                    Ok(_) => {
                        self.release();
                        true
                    }
                    Err(r) => {
                        self.req = Some(r);
                        false
                    }
                },
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> MpiSendHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the buffer stays alive until `release` after completion.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                tag.as_u16() as i32,
            );
            MpiSendHandle {
                req: Some(req),
                buf: Some(ptr),
            }
        }

        fn try_recv(&self, source: Option<usize>, tag: CommTag) -> Option<Envelope> {
            let probe = match source {
                Some(r) => self
                    .world
                    .process_at_rank(r as i32)
                    .immediate_matched_probe_with_tag(tag.as_u16() as i32),
                None => self
                    .world
                    .any_process()
                    .immediate_matched_probe_with_tag(tag.as_u16() as i32),
            };
            probe.map(|(msg, status)| {
                let (data, _) = msg.matched_receive_vec::<u8>();
                Envelope {
                    source: status.source_rank() as usize,
                    payload: Bytes::from(data),
                }
            })
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiSendHandle};
