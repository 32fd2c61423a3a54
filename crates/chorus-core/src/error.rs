//! Error types for Chorus.

use std::fmt;

use thiserror::Error;

use crate::types::PackId;

/// Result type alias using Chorus's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Which fixed-capacity pool ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Voice,
    Stream,
    Handle,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Voice => "voice",
            Self::Stream => "stream slot",
            Self::Handle => "voice handle",
        };
        f.write_str(name)
    }
}

/// Main error type for Chorus.
#[derive(Error, Debug)]
pub enum Error {
    // Capacity errors
    #[error("No free {0} available")]
    PoolExhausted(PoolKind),

    // Lookup errors
    #[error("Pack id {0} is out of range")]
    InvalidPackId(i32),

    #[error("No pack loaded at id {0}")]
    PackNotLoaded(PackId),

    #[error("Track {track} is out of range for pack {pack} ({tracks} tracks)")]
    TrackOutOfRange {
        pack: PackId,
        track: u32,
        tracks: usize,
    },

    // Archive and decode errors
    #[error("Malformed pack: {0}")]
    Pack(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // Device errors
    #[error("Audio device error: {0}")]
    Device(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Misuse
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Engine has been terminated")]
    EngineTerminated,
}

impl Error {
    /// Returns true if a pool was empty. The caller may retry later.
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::PoolExhausted(_))
    }

    /// Returns true if the pack or track could not be resolved.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::InvalidPackId(_) | Self::PackNotLoaded(_) | Self::TrackOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::PoolExhausted(PoolKind::Voice).is_capacity());
        assert!(!Error::PoolExhausted(PoolKind::Handle).is_not_found());
        assert!(Error::InvalidPackId(9).is_not_found());
        assert!(Error::TrackOutOfRange {
            pack: PackId::new(0).unwrap_or_default(),
            track: 4,
            tracks: 2
        }
        .is_not_found());
        assert!(!Error::Decode("bad".into()).is_capacity());
    }

    #[test]
    fn test_error_display() {
        let err = Error::PoolExhausted(PoolKind::Stream);
        assert_eq!(err.to_string(), "No free stream slot available");
    }
}
