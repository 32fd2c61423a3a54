//! # chorus-pack
//!
//! Resource pack archives for Chorus.
//!
//! A pack is a flat archive of audio payloads addressed by track index:
//! - [`format`]: the on-disk header and entry table
//! - [`store`]: shared file, memory, or platform-asset byte sources
//! - [`pack`]: track lookup over one store
//! - [`writer`]: archive builder

pub mod format;
pub mod pack;
pub mod store;
pub mod writer;

pub use format::{FileEntry, PackHeader};
pub use pack::{Entry, ResourcePack, TrackRange};
pub use store::{AssetSource, BackingStore, StaticAsset, StoreKind};
pub use writer::PackWriter;
