//! Out-of-core storage for serialized blocks and spilled message queues.
//!
//! A record is written once with [`ExternalStorage::put`] and read back once
//! with [`ExternalStorage::get`], which also forgets it. Blocks and queues go
//! through exactly the same interface.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::block_error::BlockError;
use crate::data::buffer::MemoryBuffer;

/// Opaque id of a stored record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageHandle(pub u64);

/// Secondary-storage backend. Implementations must be usable from the
/// worker threads of [`Master::execute`](crate::master::Master::execute).
pub trait ExternalStorage: Send + Sync + Debug {
    /// Store the content of `bb`, leaving it empty.
    fn put(&self, bb: &mut MemoryBuffer) -> Result<StorageHandle, BlockError>;

    /// Replace the content of `bb` with the record and forget the record.
    fn get(&self, handle: StorageHandle, bb: &mut MemoryBuffer) -> Result<(), BlockError>;

    /// Forget a record without reading it.
    fn destroy(&self, handle: StorageHandle) -> Result<(), BlockError>;

    /// Bytes currently held.
    fn current_size(&self) -> usize;

    /// High-water mark of [`current_size`](Self::current_size).
    fn max_size(&self) -> usize;
}

#[derive(Debug, Default)]
struct Usage {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Usage {
    fn add(&self, n: usize) {
        let now = self.current.fetch_add(n, Ordering::Relaxed) + n;
        self.max.fetch_max(now, Ordering::Relaxed);
    }
    fn sub(&self, n: usize) {
        self.current.fetch_sub(n, Ordering::Relaxed);
    }
}

/// One file per record under a directory.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    next: AtomicU64,
    records: DashMap<StorageHandle, (PathBuf, usize)>,
    usage: Usage,
}

impl FileStorage {
    /// Use (and create if needed) `dir` for record files.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, BlockError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            next: AtomicU64::new(0),
            records: DashMap::new(),
            usage: Usage::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ExternalStorage for FileStorage {
    fn put(&self, bb: &mut MemoryBuffer) -> Result<StorageHandle, BlockError> {
        let handle = StorageHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let path = self
            .dir
            .join(format!("block-{}-{}.bin", std::process::id(), handle.0));
        let bytes = bb.take_vec();
        fs::write(&path, &bytes)?;
        self.usage.add(bytes.len());
        log::trace!("stored {} bytes as {:?} in {}", bytes.len(), handle, path.display());
        self.records.insert(handle, (path, bytes.len()));
        Ok(handle)
    }

    fn get(&self, handle: StorageHandle, bb: &mut MemoryBuffer) -> Result<(), BlockError> {
        let (_, (path, size)) = self
            .records
            .remove(&handle)
            .ok_or(BlockError::UnknownHandle(handle.0))?;
        let bytes = fs::read(&path)?;
        fs::remove_file(&path)?;
        self.usage.sub(size);
        *bb = MemoryBuffer::from_vec(bytes);
        Ok(())
    }

    fn destroy(&self, handle: StorageHandle) -> Result<(), BlockError> {
        let (_, (path, size)) = self
            .records
            .remove(&handle)
            .ok_or(BlockError::UnknownHandle(handle.0))?;
        fs::remove_file(&path)?;
        self.usage.sub(size);
        Ok(())
    }

    fn current_size(&self) -> usize {
        self.usage.current.load(Ordering::Relaxed)
    }

    fn max_size(&self) -> usize {
        self.usage.max.load(Ordering::Relaxed)
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        for entry in self.records.iter() {
            let _ = fs::remove_file(&entry.value().0);
        }
    }
}

/// Records kept in a concurrent map; same contract as [`FileStorage`] without the disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    next: AtomicU64,
    records: DashMap<StorageHandle, Vec<u8>>,
    usage: Usage,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ExternalStorage for MemoryStorage {
    fn put(&self, bb: &mut MemoryBuffer) -> Result<StorageHandle, BlockError> {
        let handle = StorageHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let bytes = bb.take_vec();
        self.usage.add(bytes.len());
        self.records.insert(handle, bytes);
        Ok(handle)
    }

    fn get(&self, handle: StorageHandle, bb: &mut MemoryBuffer) -> Result<(), BlockError> {
        let (_, bytes) = self
            .records
            .remove(&handle)
            .ok_or(BlockError::UnknownHandle(handle.0))?;
        self.usage.sub(bytes.len());
        *bb = MemoryBuffer::from_vec(bytes);
        Ok(())
    }

    fn destroy(&self, handle: StorageHandle) -> Result<(), BlockError> {
        let (_, bytes) = self
            .records
            .remove(&handle)
            .ok_or(BlockError::UnknownHandle(handle.0))?;
        self.usage.sub(bytes.len());
        Ok(())
    }

    fn current_size(&self) -> usize {
        self.usage.current.load(Ordering::Relaxed)
    }

    fn max_size(&self) -> usize {
        self.usage.max.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn ExternalStorage) {
        let mut bb = MemoryBuffer::from_vec(vec![1, 2, 3, 4]);
        let h = storage.put(&mut bb).unwrap();
        assert!(bb.is_empty());
        assert_eq!(storage.current_size(), 4);
        let h2 = storage.put(&mut MemoryBuffer::from_vec(vec![9; 10])).unwrap();
        assert_ne!(h, h2);
        assert_eq!(storage.max_size(), 14);

        storage.get(h, &mut bb).unwrap();
        assert_eq!(bb.as_slice(), &[1, 2, 3, 4]);
        assert!(matches!(
            storage.get(h, &mut bb),
            Err(BlockError::UnknownHandle(_))
        ));
        storage.destroy(h2).unwrap();
        assert_eq!(storage.current_size(), 0);
        assert_eq!(storage.max_size(), 14);
    }

    #[test]
    fn memory_storage_contract() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn file_storage_contract() {
        let dir = std::env::temp_dir().join(format!("mesh-blocks-storage-{}", std::process::id()));
        let storage = FileStorage::new(&dir).unwrap();
        exercise(&storage);
        assert!(storage.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }
}
