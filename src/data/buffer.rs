//! Growable byte buffer with a read cursor, plus the default save/load
//! helpers used for queue payloads and block images.
//!
//! Two encodings coexist in one buffer:
//! - [`save`]/[`load`]: any `serde` type, bincode-framed.
//! - [`save_slice`]/[`load_slice`]: raw `Pod` arrays with no framing, for bulk
//!   transfers where both sides know the element count.

use std::io;

use bytemuck::Pod;
use serde::{Serialize, de::DeserializeOwned};

use crate::block_error::BlockError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryBuffer {
    buffer: Vec<u8>,
    position: usize,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Total number of stored bytes (independent of the read cursor).
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the read cursor and the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Rewind the read cursor.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Drop all content and release the allocation.
    pub fn wipe(&mut self) {
        self.buffer = Vec::new();
        self.position = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Move the bytes out, leaving an empty buffer behind.
    pub fn take_vec(&mut self) -> Vec<u8> {
        self.position = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Append raw bytes.
    pub fn save_binary(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Copy the next `out.len()` bytes into `out` and advance the cursor.
    pub fn load_binary(&mut self, out: &mut [u8]) -> Result<(), BlockError> {
        let end = self.position + out.len();
        if end > self.buffer.len() {
            return Err(BlockError::QueueUnderflow {
                needed: out.len(),
                available: self.remaining(),
            });
        }
        out.copy_from_slice(&self.buffer[self.position..end]);
        self.position = end;
        Ok(())
    }
}

impl io::Write for MemoryBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for MemoryBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// Serialize `x` onto the end of `bb`.
pub fn save<T: Serialize + ?Sized>(bb: &mut MemoryBuffer, x: &T) -> Result<(), BlockError> {
    bincode::serialize_into(bb, x)?;
    Ok(())
}

/// Deserialize the next value from `bb`.
pub fn load<T: DeserializeOwned>(bb: &mut MemoryBuffer) -> Result<T, BlockError> {
    Ok(bincode::deserialize_from(bb)?)
}

/// Append the raw bytes of `xs` (no length prefix).
pub fn save_slice<T: Pod>(bb: &mut MemoryBuffer, xs: &[T]) {
    bb.save_binary(bytemuck::cast_slice(xs));
}

/// Fill `xs` from the next `size_of_val(xs)` bytes of `bb`.
pub fn load_slice<T: Pod>(bb: &mut MemoryBuffer, xs: &mut [T]) -> Result<(), BlockError> {
    bb.load_binary(bytemuck::cast_slice_mut(xs))
}
