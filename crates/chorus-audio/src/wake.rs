//! Wake event for the engine thread.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Cloneable signal that schedules an engine tick.
///
/// Signals coalesce: any number of wakes before the engine waits again yield one tick.
#[derive(Debug, Clone)]
pub struct EngineWaker {
    tx: Sender<()>,
}

impl EngineWaker {
    pub fn wake(&self) {
        // Full means a tick is already pending.
        let _ = self.tx.try_send(());
    }
}

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Signalled,
    TimedOut,
    /// Every waker is gone.
    Closed,
}

/// Receiving side, owned by whoever drives ticks.
#[derive(Debug)]
pub(crate) struct WakeEvent {
    rx: Receiver<()>,
}

impl WakeEvent {
    pub(crate) fn new() -> (EngineWaker, Self) {
        let (tx, rx) = bounded(1);
        (EngineWaker { tx }, Self { rx })
    }

    /// Block until signalled, or until `timeout` when one is given.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(()) => WaitOutcome::Signalled,
                Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => WaitOutcome::Closed,
            },
            None => match self.rx.recv() {
                Ok(()) => WaitOutcome::Signalled,
                Err(_) => WaitOutcome::Closed,
            },
        }
    }

    /// Consume a pending signal without blocking.
    pub(crate) fn clear(&self) {
        let _ = self.rx.try_recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakes_coalesce() {
        let (waker, event) = WakeEvent::new();
        waker.wake();
        waker.wake();
        assert_eq!(event.wait(Some(Duration::ZERO)), WaitOutcome::Signalled);
        assert_eq!(
            event.wait(Some(Duration::from_millis(1))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_closed_when_wakers_dropped() {
        let (waker, event) = WakeEvent::new();
        drop(waker);
        assert_eq!(event.wait(None), WaitOutcome::Closed);
    }
}
