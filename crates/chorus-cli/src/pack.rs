//! `chorus pack` and `chorus list`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chorus_pack::{PackWriter, ResourcePack};
use clap::Args;
use tracing::info;

#[derive(Args)]
pub struct PackArgs {
    /// Directory whose regular files become tracks
    pub dir: PathBuf,

    /// Output pack file
    pub output: PathBuf,

    /// Also write track names, one per line, in track order
    #[arg(long)]
    pub list: Option<PathBuf>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Pack file to inspect
    pub pack: PathBuf,
}

pub fn execute(args: &PackArgs) -> Result<()> {
    let writer = collect(&args.dir)?;
    if writer.is_empty() {
        anyhow::bail!("No files found in {}", args.dir.display());
    }

    writer
        .write_file(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    if let Some(list) = &args.list {
        let mut out = fs::File::create(list)
            .with_context(|| format!("Failed to create {}", list.display()))?;
        writer
            .write_list(&mut out)
            .with_context(|| format!("Failed to write {}", list.display()))?;
    }

    info!("Packed {} files into {}", writer.len(), args.output.display());
    Ok(())
}

pub fn list(args: &ListArgs) -> Result<()> {
    let pack = ResourcePack::open(&args.pack, true)
        .with_context(|| format!("Failed to open {}", args.pack.display()))?;

    println!("{} tracks", pack.len());
    for (i, entry) in pack.entries().iter().enumerate() {
        println!("{i:>5}  offset {:>10}  size {:>10}", entry.offset, entry.size);
    }
    Ok(())
}

/// Every regular file directly under `dir`, sorted by file name.
fn collect(dir: &Path) -> Result<PackWriter> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut writer = PackWriter::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        writer.push(name, data);
    }
    Ok(writer)
}
