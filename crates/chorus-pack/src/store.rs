//! Shared byte sources behind resource packs.
//!
//! A [`BackingStore`] is cheap to clone. Every clone is one reference; the
//! underlying file or blob is released when the last clone drops, so a decode
//! stream keeps its store alive even after the pack that produced it is gone.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// Platform asset access, e.g. an APK asset manager or a bundle reader.
pub trait AssetSource: Send + Sync {
    /// Total asset length in bytes.
    fn len(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Asset compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct StaticAsset(pub &'static [u8]);

impl AssetSource for StaticAsset {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(copy_from(self.0, offset, buf))
    }
}

/// Which backend a store reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Memory,
    Asset,
}

enum StoreInner {
    File { file: Mutex<File>, len: u64 },
    Memory(Bytes),
    Asset(Arc<dyn AssetSource>),
}

/// Reference-counted file, memory, or asset byte source.
#[derive(Clone)]
pub struct BackingStore {
    inner: Arc<StoreInner>,
}

impl BackingStore {
    /// Open a file for on-demand reads.
    pub fn open_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::new(StoreInner::File {
            file: Mutex::new(file),
            len,
        }))
    }

    /// Read a whole file into memory.
    pub fn read_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Ok(Self::from_bytes(data))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(StoreInner::Memory(data.into()))
    }

    pub fn from_asset(asset: Arc<dyn AssetSource>) -> Self {
        Self::new(StoreInner::Asset(asset))
    }

    fn new(inner: StoreInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn kind(&self) -> StoreKind {
        match *self.inner {
            StoreInner::File { .. } => StoreKind::File,
            StoreInner::Memory(_) => StoreKind::Memory,
            StoreInner::Asset(_) => StoreKind::Asset,
        }
    }

    /// Number of live references to this store, including `self`.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same store.
    pub fn same_store(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn len(&self) -> u64 {
        match &*self.inner {
            StoreInner::File { len, .. } => *len,
            StoreInner::Memory(data) => data.len() as u64,
            StoreInner::Asset(asset) => asset.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of store.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match &*self.inner {
            StoreInner::File { file, len } => {
                if offset >= *len {
                    return Ok(0);
                }
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read(buf)
            }
            StoreInner::Memory(data) => Ok(copy_from(data, offset, buf)),
            StoreInner::Asset(asset) => asset.read_at(offset, buf),
        }
    }

    /// Fill `buf` completely from `offset`.
    pub fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "backing store ended early",
                ));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Zero-copy view of `[start, start + len)` for memory stores.
    pub fn memory_slice(&self, start: u64, len: u64) -> Option<Bytes> {
        match &*self.inner {
            StoreInner::Memory(data) => {
                let start = usize::try_from(start).ok()?;
                let end = start.checked_add(usize::try_from(len).ok()?)?;
                (end <= data.len()).then(|| data.slice(start..end))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStore")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

fn copy_from(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_store() {
        let store = BackingStore::from_bytes(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(store.kind(), StoreKind::Memory);
        let mut buf = [0u8; 3];
        assert_eq!(store.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(store.read_at(9, &mut buf).unwrap(), 0);
        assert_eq!(store.memory_slice(1, 3).unwrap().as_ref(), &[2, 3, 4]);
        assert!(store.memory_slice(4, 3).is_none());
    }

    #[test]
    fn test_file_store_reads_on_demand() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"chorus-pack").unwrap();
        let store = BackingStore::open_file(file.path()).unwrap();
        assert_eq!(store.kind(), StoreKind::File);
        assert_eq!(store.len(), 11);
        let mut buf = [0u8; 4];
        store.read_exact_at(7, &mut buf).unwrap();
        assert_eq!(&buf, b"pack");
        assert!(store.memory_slice(0, 1).is_none());
        let err = store.read_exact_at(9, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_ref_count_tracks_clones() {
        let store = BackingStore::from_asset(Arc::new(StaticAsset(b"abc")));
        assert_eq!(store.ref_count(), 1);
        let other = store.clone();
        assert_eq!(store.ref_count(), 2);
        assert!(store.same_store(&other));
        drop(other);
        assert_eq!(store.ref_count(), 1);
    }
}
