//! Fixed-capacity pools and the request queue.
//!
//! Voices, stream slots, and handles are indices into arenas sized at engine
//! start. Each pool is a free-index stack; all of them, plus the queue of
//! voices awaiting engine-thread initialization, sit behind one lock that is
//! only ever held for index bookkeeping.

/// Index of a voice in the engine's voice arena.
pub type VoiceId = usize;

/// Snapshot of pool occupancy.
///
/// Every voice is in exactly one of free, reserved (mid-submission),
/// requested (queued for the engine), or active (owned by the engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_voices: usize,
    pub free_voices: usize,
    pub reserved: usize,
    pub requested: usize,
    pub active: usize,
    pub free_streams: usize,
    pub max_handles: usize,
    pub free_handles: usize,
}

impl PoolStats {
    /// Whether every voice is accounted for.
    pub const fn is_conserved(&self) -> bool {
        self.free_voices + self.reserved + self.requested + self.active == self.max_voices
    }
}

#[derive(Debug)]
pub(crate) struct PoolState {
    max_voices: usize,
    max_handles: usize,
    free_voices: Vec<VoiceId>,
    free_streams: Vec<usize>,
    free_handles: Vec<usize>,
    /// Newest last; drained newest first.
    requests: Vec<VoiceId>,
    reserved: usize,
    active: usize,
    /// Set by the final drain at shutdown; no request is queued after it.
    closed: bool,
}

impl PoolState {
    pub(crate) fn new(max_voices: usize, max_handles: usize) -> Self {
        // Reversed so the lowest index is handed out first.
        Self {
            max_voices,
            max_handles,
            free_voices: (0..max_voices).rev().collect(),
            free_streams: (0..max_voices).rev().collect(),
            free_handles: (0..max_handles).rev().collect(),
            requests: Vec::with_capacity(max_voices),
            reserved: 0,
            active: 0,
            closed: false,
        }
    }

    pub(crate) fn acquire_voice(&mut self) -> Option<VoiceId> {
        let id = self.free_voices.pop()?;
        self.reserved += 1;
        Some(id)
    }

    /// Return a voice that was reserved but never queued.
    pub(crate) fn release_voice(&mut self, id: VoiceId) {
        self.reserved -= 1;
        self.free_voices.push(id);
    }

    pub(crate) fn acquire_stream(&mut self) -> Option<usize> {
        self.free_streams.pop()
    }

    pub(crate) fn release_stream(&mut self, slot: usize) {
        self.free_streams.push(slot);
    }

    pub(crate) fn acquire_handle(&mut self) -> Option<usize> {
        self.free_handles.pop()
    }

    pub(crate) fn release_handle(&mut self, index: usize) {
        self.free_handles.push(index);
    }

    /// Move a reserved voice onto the request queue.
    ///
    /// Returns false once the pool is closed. The voice then stays reserved
    /// and the caller must release it.
    pub(crate) fn push_request(&mut self, id: VoiceId) -> bool {
        if self.closed {
            return false;
        }
        self.reserved -= 1;
        self.requests.push(id);
        true
    }

    /// Refuse further requests. Pair with a final [`Self::take_requests`]
    /// under the same lock.
    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Detach the whole queue into `into`, newest first. The voices become active.
    pub(crate) fn take_requests(&mut self, into: &mut Vec<VoiceId>) {
        self.active += self.requests.len();
        into.extend(self.requests.drain(..).rev());
    }

    /// Return a batch of retired voices and their stream slots.
    pub(crate) fn release_retired(&mut self, voices: &[VoiceId], streams: &[usize]) {
        self.active -= voices.len();
        self.free_voices.extend_from_slice(voices);
        self.free_streams.extend_from_slice(streams);
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            max_voices: self.max_voices,
            free_voices: self.free_voices.len(),
            reserved: self.reserved,
            requested: self.requests.len(),
            active: self.active,
            free_streams: self.free_streams.len(),
            max_handles: self.max_handles,
            free_handles: self.free_handles.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_exhaustion_is_none() {
        let mut pool = PoolState::new(2, 1);
        assert_eq!(pool.acquire_voice(), Some(0));
        assert_eq!(pool.acquire_voice(), Some(1));
        assert_eq!(pool.acquire_voice(), None);
        assert_eq!(pool.acquire_handle(), Some(0));
        assert_eq!(pool.acquire_handle(), None);
        assert!(pool.stats().is_conserved());
    }

    #[test]
    fn test_requests_drain_newest_first() {
        let mut pool = PoolState::new(3, 1);
        for _ in 0..3 {
            let id = pool.acquire_voice().unwrap();
            assert!(pool.push_request(id));
        }
        assert_eq!(pool.stats().requested, 3);

        let mut batch = Vec::new();
        pool.take_requests(&mut batch);
        assert_eq!(batch, vec![2, 1, 0]);
        let stats = pool.stats();
        assert_eq!((stats.requested, stats.active), (0, 3));
        assert!(stats.is_conserved());
    }

    #[test]
    fn test_retire_returns_voices_and_streams() {
        let mut pool = PoolState::new(2, 1);
        let voice = pool.acquire_voice().unwrap();
        let stream = pool.acquire_stream().unwrap();
        assert!(pool.push_request(voice));
        let mut batch = Vec::new();
        pool.take_requests(&mut batch);

        pool.release_retired(&[voice], &[stream]);
        let stats = pool.stats();
        assert_eq!(stats.free_voices, 2);
        assert_eq!(stats.free_streams, 2);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_reserved_voice_rolls_back() {
        let mut pool = PoolState::new(1, 1);
        let voice = pool.acquire_voice().unwrap();
        assert_eq!(pool.stats().reserved, 1);
        pool.release_voice(voice);
        let stats = pool.stats();
        assert_eq!((stats.free_voices, stats.reserved), (1, 0));
    }

    #[test]
    fn test_closed_pool_refuses_requests() {
        let mut pool = PoolState::new(2, 1);
        let first = pool.acquire_voice().unwrap();
        assert!(pool.push_request(first));

        let mut batch = Vec::new();
        pool.close();
        pool.take_requests(&mut batch);
        assert_eq!(batch, vec![first]);

        let late = pool.acquire_voice().unwrap();
        assert!(!pool.push_request(late));
        let stats = pool.stats();
        assert_eq!((stats.requested, stats.reserved), (0, 1));
        pool.release_voice(late);
        assert!(pool.stats().is_conserved());
    }
}
