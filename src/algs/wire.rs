//! Fixed, versioned, little-endian wire header for queue messages.
//!
//! Every cross-rank queue message is one buffer: a [`WireQueueHdr`] naming the
//! source and destination blocks, followed by the serialized queue bytes.

use bytemuck::{Pod, Zeroable};
use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::block_error::BlockError;
use crate::topology::link::Gid;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Kind tag of a block-to-block queue message.
pub const KIND_QUEUE: u16 = 1;

/// All multi-byte integers are stored pre-LE with `.to_le()`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireQueueHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32, // keep zero
    pub from_le: u64,
    pub to_le: u64,
    pub len_le: u64,
}

const_assert_eq!(size_of::<WireQueueHdr>(), 32);

impl WireQueueHdr {
    pub const SIZE: usize = size_of::<WireQueueHdr>();

    pub fn new(from: Gid, to: Gid, len: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: KIND_QUEUE.to_le(),
            reserved_le: 0,
            from_le: (from as u64).to_le(),
            to_le: (to as u64).to_le(),
            len_le: (len as u64).to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn from(&self) -> Gid {
        u64::from_le(self.from_le) as Gid
    }
    pub fn to(&self) -> Gid {
        u64::from_le(self.to_le) as Gid
    }
    pub fn len(&self) -> usize {
        u64::from_le(self.len_le) as usize
    }
}

/// A decoded queue message; `payload` shares the receive buffer.
#[derive(Clone, Debug)]
pub struct QueueMessage {
    pub from: Gid,
    pub to: Gid,
    pub payload: Bytes,
}

/// Frame `payload` as a queue message from block `from` to block `to`.
pub fn encode_queue(from: Gid, to: Gid, payload: &[u8]) -> Bytes {
    let hdr = WireQueueHdr::new(from, to, payload.len());
    let mut out = BytesMut::with_capacity(WireQueueHdr::SIZE + payload.len());
    out.put_slice(bytemuck::bytes_of(&hdr));
    out.put_slice(payload);
    out.freeze()
}

/// Inverse of [`encode_queue`]; validates version, kind and length.
pub fn decode_queue(msg: Bytes) -> Result<QueueMessage, BlockError> {
    if msg.len() < WireQueueHdr::SIZE {
        return Err(BlockError::MalformedMessage(format!(
            "expected at least {} header bytes, got {}",
            WireQueueHdr::SIZE,
            msg.len()
        )));
    }
    let hdr: WireQueueHdr = bytemuck::pod_read_unaligned(&msg[..WireQueueHdr::SIZE]);
    if hdr.version() != WIRE_VERSION || hdr.kind() != KIND_QUEUE {
        return Err(BlockError::MalformedMessage(format!(
            "unexpected header version {} kind {}",
            hdr.version(),
            hdr.kind()
        )));
    }
    let body = msg.len() - WireQueueHdr::SIZE;
    if hdr.len() != body {
        return Err(BlockError::MalformedMessage(format!(
            "header announces {} payload bytes, got {body}",
            hdr.len()
        )));
    }
    Ok(QueueMessage {
        from: hdr.from(),
        to: hdr.to(),
        payload: msg.slice(WireQueueHdr::SIZE..),
    })
}
