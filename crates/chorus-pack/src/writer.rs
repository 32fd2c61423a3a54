//! Archive builder.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chorus_core::{Error, Result};
use tracing::info;

use crate::format::{FileEntry, PackHeader};

/// Collects named payloads and writes them as one pack.
///
/// Track ids are assigned in push order.
#[derive(Debug, Default)]
pub struct PackWriter {
    files: Vec<(String, Vec<u8>)>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload. Returns its track id.
    pub fn push(&mut self, name: impl Into<String>, data: Vec<u8>) -> usize {
        self.files.push((name.into(), data));
        self.files.len() - 1
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(name, _)| name.as_str())
    }

    /// Encode the archive.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let num_files = u32::try_from(self.files.len())
            .map_err(|_| Error::InvalidArgument("too many files for one pack".into()))?;
        out.write_all(
            &PackHeader {
                reserved0: 0,
                reserved1: 0,
                num_files,
            }
            .to_bytes(),
        )?;

        let mut offset = 0u32;
        for (name, data) in &self.files {
            let size = u32::try_from(data.len())
                .map_err(|_| Error::InvalidArgument(format!("{name} exceeds 4 GiB")))?;
            out.write_all(&FileEntry { offset, size }.to_bytes())?;
            offset = offset
                .checked_add(size)
                .ok_or_else(|| Error::InvalidArgument("pack exceeds 4 GiB".into()))?;
        }

        for (_, data) in &self.files {
            out.write_all(data)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Write the archive to `path`.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        info!("Wrote pack {} ({} files)", path.display(), self.files.len());
        Ok(())
    }

    /// Write one name per line, CRLF-terminated, in track order.
    pub fn write_list<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for name in self.names() {
            write!(out, "{name}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::pack::ResourcePack;
    use proptest::prelude::*;

    #[test]
    fn test_empty_pack() {
        let bytes = PackWriter::new().to_bytes().unwrap();
        assert_eq!(bytes.len(), 12);
        assert!(ResourcePack::from_bytes(bytes).unwrap().is_empty());
    }

    #[test]
    fn test_list_output() {
        let mut writer = PackWriter::new();
        assert_eq!(writer.push("jump.opus", vec![1]), 0);
        assert_eq!(writer.push("land.opus", vec![2]), 1);
        let mut list = Vec::new();
        writer.write_list(&mut list).unwrap();
        assert_eq!(list, b"jump.opus\r\nland.opus\r\n");
    }

    proptest! {
        #[test]
        fn written_sizes_survive_parse(sizes in proptest::collection::vec(0usize..256, 0..12)) {
            let mut writer = PackWriter::new();
            for (i, size) in sizes.iter().enumerate() {
                writer.push(format!("{i}"), vec![i as u8; *size]);
            }
            let pack = ResourcePack::from_bytes(writer.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(pack.len(), sizes.len());
            for (entry, size) in pack.entries().iter().zip(&sizes) {
                prop_assert_eq!(entry.size, *size as u64);
            }
        }
    }
}
