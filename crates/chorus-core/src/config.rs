//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::MAX_QUEUED_BUFFERS;

/// Pool sizes and timing for an engine instance.
///
/// All fields default, so a partial JSON document only overrides what it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Voice pool capacity. Also the number of decode stream slots.
    pub max_voices: usize,
    /// Voice handle pool capacity.
    pub max_handles: usize,
    /// Device buffers kept queued per voice, in `[1, 4]`.
    pub queued_buffers: usize,
    /// Engine tick interval while not paused.
    pub idle_wait_ms: u64,
    /// Frames per device buffer.
    pub frames_per_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_voices: 128,
            max_handles: 8,
            queued_buffers: 3,
            idle_wait_ms: 30,
            frames_per_buffer: 5760,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject configurations the pools cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.max_voices == 0 {
            return Err(Error::InvalidArgument("max_voices must be positive".into()));
        }
        if self.max_handles == 0 {
            return Err(Error::InvalidArgument("max_handles must be positive".into()));
        }
        if !(1..=MAX_QUEUED_BUFFERS).contains(&self.queued_buffers) {
            return Err(Error::InvalidArgument(format!(
                "queued_buffers must be in 1..={MAX_QUEUED_BUFFERS}, got {}",
                self.queued_buffers
            )));
        }
        if self.frames_per_buffer == 0 {
            return Err(Error::InvalidArgument(
                "frames_per_buffer must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Tick interval as a duration.
    pub const fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}
