//! Cooperative pause signal shared with the foreground recorder.
//!
//! The recorder asserts the signal when it needs exclusive I/O. The sync
//! engine polls it before every upload stage and after every chunk, and
//! unwinds with [`SyncError::Paused`] as soon as it is observed.

use crate::error::{SyncError, SyncResult};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Hold {
    Released,
    Until(Instant),
    Indefinite,
}

/// A boolean-with-timeout pause flag. Clones share state.
#[derive(Debug, Clone)]
pub struct PauseSignal {
    hold: Arc<Mutex<Hold>>,
}

impl Default for PauseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseSignal {
    pub fn new() -> Self {
        Self {
            hold: Arc::new(Mutex::new(Hold::Released)),
        }
    }

    /// Pauses until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        *self.state() = Hold::Indefinite;
    }

    /// Pauses for at most `timeout`; the pause lapses on its own afterwards
    /// so a crashed recorder cannot stall uploads forever.
    pub fn pause_for(&self, timeout: Duration) {
        *self.state() = Hold::Until(Instant::now() + timeout);
    }

    pub fn resume(&self) {
        *self.state() = Hold::Released;
    }

    pub fn is_paused(&self) -> bool {
        let mut hold = self.state();
        match *hold {
            Hold::Released => false,
            Hold::Indefinite => true,
            Hold::Until(deadline) if Instant::now() < deadline => true,
            Hold::Until(_) => {
                *hold = Hold::Released;
                false
            }
        }
    }

    /// Returns `Err(SyncError::Paused)` while paused.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_paused() {
            Err(SyncError::Paused)
        } else {
            Ok(())
        }
    }

    fn state(&self) -> MutexGuard<'_, Hold> {
        // The guarded value is a plain enum, so a poisoned lock is still usable.
        self.hold.lock().unwrap_or_else(|e| e.into_inner())
    }
}
