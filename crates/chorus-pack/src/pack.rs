//! Track lookup over a backing store.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chorus_core::{Error, Result, TrackId};
use tracing::debug;

use crate::format::{parse_entries, PackHeader, ENTRY_SIZE, HEADER_SIZE};
use crate::store::{AssetSource, BackingStore, StoreKind};

/// Absolute byte range of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub offset: u64,
    pub size: u64,
}

/// A track resolved to its store and byte range.
///
/// Holds its own store reference, so it stays readable after the pack is dropped.
#[derive(Debug, Clone)]
pub struct TrackRange {
    pub store: BackingStore,
    pub offset: u64,
    pub size: u64,
}

/// Loaded archive: an entry table over one backing store.
#[derive(Debug)]
pub struct ResourcePack {
    store: BackingStore,
    entries: Vec<Entry>,
}

impl ResourcePack {
    /// Open `path`, either streamed from disk or read fully into memory.
    pub fn open(path: impl AsRef<Path>, streamed: bool) -> Result<Self> {
        let path = path.as_ref();
        let store = if streamed {
            BackingStore::open_file(path)?
        } else {
            BackingStore::read_file(path)?
        };
        debug!("Opened pack {} ({:?}, {} bytes)", path.display(), store.kind(), store.len());
        Self::from_store(store)
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::from_store(BackingStore::from_bytes(data))
    }

    pub fn from_asset(asset: Arc<dyn AssetSource>) -> Result<Self> {
        Self::from_store(BackingStore::from_asset(asset))
    }

    /// Parse the header and entry table, converting offsets to absolute.
    pub fn from_store(store: BackingStore) -> Result<Self> {
        let len = store.len();
        let mut head = [0u8; HEADER_SIZE];
        store
            .read_exact_at(0, &mut head)
            .map_err(|e| Error::Pack(format!("failed to read header: {e}")))?;
        let header = PackHeader::parse(&head)?;

        let table_end = header.table_end();
        if table_end > len {
            return Err(Error::Pack(format!(
                "{} entries do not fit in {len} bytes",
                header.num_files
            )));
        }

        let count = header.num_files as usize;
        let mut table = vec![0u8; count * ENTRY_SIZE];
        store
            .read_exact_at(HEADER_SIZE as u64, &mut table)
            .map_err(|e| Error::Pack(format!("failed to read entry table: {e}")))?;

        let entries = parse_entries(&table, count)?
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let offset = table_end + u64::from(raw.offset);
                let size = u64::from(raw.size);
                if offset + size > len {
                    return Err(Error::Pack(format!(
                        "entry {index} [{offset}, {}) exceeds {len} bytes",
                        offset + size
                    )));
                }
                Ok(Entry { offset, size })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { store, entries })
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self) -> StoreKind {
        self.store.kind()
    }

    pub const fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Resolve a track to its store and byte range.
    pub fn track(&self, track: TrackId) -> Option<TrackRange> {
        let entry = self.entries.get(track as usize)?;
        Some(TrackRange {
            store: self.store.clone(),
            offset: entry.offset,
            size: entry.size,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::format::FileEntry;
    use crate::store::StaticAsset;
    use crate::writer::PackWriter;

    fn sample_pack() -> Vec<u8> {
        let mut writer = PackWriter::new();
        writer.push("a.opus", b"alpha".to_vec());
        writer.push("b.opus", b"bravo!".to_vec());
        writer.to_bytes().unwrap()
    }

    #[test]
    fn test_offsets_are_absolute() {
        let pack = ResourcePack::from_bytes(sample_pack()).unwrap();
        assert_eq!(pack.len(), 2);
        assert_eq!(pack.entries()[0], Entry { offset: 28, size: 5 });
        assert_eq!(pack.entries()[1], Entry { offset: 33, size: 6 });

        let track = pack.track(1).unwrap();
        let mut buf = [0u8; 6];
        track.store.read_exact_at(track.offset, &mut buf).unwrap();
        assert_eq!(&buf, b"bravo!");
        assert!(pack.track(2).is_none());
    }

    #[test]
    fn test_streamed_and_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfx.pak");
        std::fs::write(&path, sample_pack()).unwrap();

        let streamed = ResourcePack::open(&path, true).unwrap();
        let buffered = ResourcePack::open(&path, false).unwrap();
        assert_eq!(streamed.kind(), StoreKind::File);
        assert_eq!(buffered.kind(), StoreKind::Memory);
        assert_eq!(streamed.entries(), buffered.entries());
    }

    #[test]
    fn test_asset_pack() {
        static DATA: &[u8] = &[
            0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, // header
            0, 0, 0, 0, 2, 0, 0, 0, // entry
            7, 9,
        ];
        let pack = ResourcePack::from_asset(Arc::new(StaticAsset(DATA))).unwrap();
        assert_eq!(pack.kind(), StoreKind::Asset);
        assert_eq!(pack.entries()[0], Entry { offset: 20, size: 2 });
    }

    #[test]
    fn test_track_holds_store() {
        let pack = ResourcePack::from_bytes(sample_pack()).unwrap();
        let track = pack.track(0).unwrap();
        assert_eq!(pack.store().ref_count(), 2);
        drop(pack);
        assert_eq!(track.store.ref_count(), 1);
        let mut buf = [0u8; 5];
        track.store.read_exact_at(track.offset, &mut buf).unwrap();
        assert_eq!(&buf, b"alpha");
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let mut data = PackHeader {
            num_files: 1,
            ..PackHeader::default()
        }
        .to_bytes()
        .to_vec();
        data.extend_from_slice(&FileEntry { offset: 0, size: 64 }.to_bytes());
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(ResourcePack::from_bytes(data), Err(Error::Pack(_))));
    }

    #[test]
    fn test_rejects_oversized_table() {
        let data = PackHeader {
            num_files: u32::MAX,
            ..PackHeader::default()
        }
        .to_bytes();
        assert!(matches!(
            ResourcePack::from_bytes(data.to_vec()),
            Err(Error::Pack(_))
        ));
        assert!(matches!(
            ResourcePack::from_bytes(vec![0u8; 4]),
            Err(Error::Pack(_))
        ));
    }
}
