//! # chorus-core
//!
//! Core types, configuration, and error handling for the Chorus playback engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, PoolKind, Result};
pub use types::*;
