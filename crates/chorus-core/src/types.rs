//! Core domain types for Chorus.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capacity of the resource pack table.
pub const NUM_MAX_PACKS: usize = 8;

/// Upper bound on device buffers queued per voice.
pub const MAX_QUEUED_BUFFERS: usize = 4;

/// Track index inside a pack.
pub type TrackId = u32;

/// Slot in the resource pack table, always in `[0, NUM_MAX_PACKS)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct PackId(u8);

impl PackId {
    /// Validate a raw pack id.
    pub fn new(id: i32) -> Result<Self> {
        usize::try_from(id)
            .ok()
            .filter(|&i| i < NUM_MAX_PACKS)
            .map(|i| Self(i as u8))
            .ok_or(Error::InvalidPackId(id))
    }

    /// Table index of this id.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// All valid ids in table order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..NUM_MAX_PACKS as u8).map(Self)
    }
}

impl TryFrom<i32> for PackId {
    type Error = Error;

    fn try_from(id: i32) -> Result<Self> {
        Self::new(id)
    }
}

impl From<PackId> for i32 {
    fn from(id: PackId) -> Self {
        Self::from(id.0)
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Play state reported by a voice or a voice handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    /// Created but not yet started.
    #[default]
    Initial,
    Playing,
    Paused,
    /// Finished, cancelled, or never bound.
    Stopped,
}

impl PlayState {
    /// Whether the voice still holds device buffers.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

bitflags::bitflags! {
    /// Caller-visible voice flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlayerFlags: u8 {
        /// Restart from the beginning at end of stream.
        const LOOP = 0b0000_0001;
    }
}

/// Fixed output format of an audio device. Samples are always interleaved `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for DeviceFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

impl DeviceFormat {
    /// Interleaved sample count for `frames` frames.
    pub const fn samples(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pack_id_bounds() {
        assert_eq!(PackId::new(0).unwrap().index(), 0);
        assert_eq!(PackId::new(7).unwrap().index(), 7);
        assert!(matches!(PackId::new(8), Err(Error::InvalidPackId(8))));
        assert!(matches!(PackId::new(-1), Err(Error::InvalidPackId(-1))));
        assert_eq!(PackId::all().count(), NUM_MAX_PACKS);
    }

    #[test]
    fn test_pack_id_serde() {
        let id: PackId = serde_json::from_str("3").unwrap();
        assert_eq!(i32::from(id), 3);
        assert!(serde_json::from_str::<PackId>("12").is_err());
    }

    #[test]
    fn test_play_state_default() {
        assert_eq!(PlayState::default(), PlayState::Initial);
        assert!(PlayState::Paused.is_live());
        assert!(!PlayState::Stopped.is_live());
    }

    #[test]
    fn test_flags() {
        let mut flags = PlayerFlags::empty();
        flags.insert(PlayerFlags::LOOP);
        assert!(flags.contains(PlayerFlags::LOOP));
        flags.remove(PlayerFlags::LOOP);
        assert!(flags.is_empty());
    }

    proptest! {
        #[test]
        fn pack_id_accepts_only_table_slots(raw in any::<i32>()) {
            let in_range = (0..NUM_MAX_PACKS as i32).contains(&raw);
            match PackId::new(raw) {
                Ok(id) => {
                    prop_assert!(in_range);
                    prop_assert_eq!(i32::from(id), raw);
                }
                Err(e) => {
                    prop_assert!(!in_range);
                    prop_assert!(matches!(e, Error::InvalidPackId(r) if r == raw));
                }
            }
            let parsed = serde_json::from_str::<PackId>(&raw.to_string());
            prop_assert_eq!(parsed.is_ok(), in_range);
        }
    }
}
