//! Pack header and entry table codec.
//!
//! Layout, little-endian:
//!
//! ```text
//! Header    { reserved0: u32, reserved1: u32, num_files: u32 }
//! FileEntry { offset: u32, size: u32 } * num_files
//! payloads
//! ```
//!
//! Entry offsets are relative to the end of the entry table.

use chorus_core::{Error, Result};

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// Encoded entry size in bytes.
pub const ENTRY_SIZE: usize = 8;

/// Archive header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackHeader {
    pub reserved0: u32,
    pub reserved1: u32,
    pub num_files: u32,
}

impl PackHeader {
    /// Decode a header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Pack(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        Ok(Self {
            reserved0: read_u32(buf, 0),
            reserved1: read_u32(buf, 4),
            num_files: read_u32(buf, 8),
        })
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.reserved0.to_le_bytes());
        out[4..8].copy_from_slice(&self.reserved1.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_files.to_le_bytes());
        out
    }

    /// Byte length of the header plus the entry table.
    pub const fn table_end(&self) -> u64 {
        HEADER_SIZE as u64 + ENTRY_SIZE as u64 * self.num_files as u64
    }
}

/// One entry of the table. `offset` is relative to the table end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileEntry {
    pub offset: u32,
    pub size: u32,
}

impl FileEntry {
    pub fn to_bytes(self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

/// Decode `count` consecutive entries from `buf`.
pub fn parse_entries(buf: &[u8], count: usize) -> Result<Vec<FileEntry>> {
    let needed = count
        .checked_mul(ENTRY_SIZE)
        .ok_or_else(|| Error::Pack(format!("entry count {count} overflows")))?;
    if buf.len() < needed {
        return Err(Error::Pack(format!(
            "entry table needs {needed} bytes, got {}",
            buf.len()
        )));
    }
    Ok(buf[..needed]
        .chunks_exact(ENTRY_SIZE)
        .map(|chunk| FileEntry {
            offset: read_u32(chunk, 0),
            size: read_u32(chunk, 4),
        })
        .collect())
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let header = PackHeader {
            reserved0: 0,
            reserved1: 0,
            num_files: 2,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[8..], &[2, 0, 0, 0]);
        assert_eq!(PackHeader::parse(&bytes).unwrap(), header);
        assert_eq!(header.table_end(), 28);
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(PackHeader::parse(&[0; 7]), Err(Error::Pack(_))));
    }

    #[test]
    fn test_short_entry_table() {
        let entry = FileEntry { offset: 0, size: 9 }.to_bytes();
        assert_eq!(parse_entries(&entry, 1).unwrap()[0].size, 9);
        assert!(matches!(parse_entries(&entry, 2), Err(Error::Pack(_))));
    }

    proptest! {
        #[test]
        fn parse_never_panics(buf in proptest::collection::vec(any::<u8>(), 0..64), count in 0usize..16) {
            let _ = PackHeader::parse(&buf);
            let _ = parse_entries(&buf, count);
        }
    }
}
