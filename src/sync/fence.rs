//! Host-visible frame completion signal.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CullError, Result};
use crate::indirect::CullStats;

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    lost: bool,
    payload: CullStats,
}

/// Frame-complete fence carrying the statistics snapshot of the frame it completes.
#[derive(Debug)]
pub struct FrameFence {
    state: Mutex<FenceState>,
    condvar: Condvar,
}

impl Default for FrameFence {
    fn default() -> Self {
        Self::new_signaled()
    }
}

impl FrameFence {
    /// Signaled, so the first frame does not block.
    pub fn new_signaled() -> Self {
        Self {
            state: Mutex::new(FenceState {
                signaled: true,
                ..Default::default()
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn reset(&self) {
        self.state.lock().signaled = false;
    }

    pub fn signal(&self, payload: CullStats) {
        let mut state = self.state.lock();
        state.signaled = true;
        state.payload = payload;
        self.condvar.notify_all();
    }

    /// The producer is gone; pending and future waits fail.
    pub fn mark_lost(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        self.condvar.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    pub fn is_lost(&self) -> bool {
        self.state.lock().lost
    }

    /// Blocks until signaled and returns the carried payload.
    pub fn wait(&self, timeout: Duration) -> Result<CullStats> {
        // A deadline past the clock's range means wait without one.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if state.signaled {
                return Ok(state.payload);
            }
            if state.lost {
                return Err(CullError::DeviceLost(
                    "frame producer stopped before signaling".to_string(),
                ));
            }
            let Some(deadline) = deadline else {
                self.condvar.wait(&mut state);
                continue;
            };
            if self.condvar.wait_until(&mut state, deadline).timed_out() && !state.signaled {
                return Err(CullError::DeviceTimeout(format!(
                    "frame fence not signaled within {} ms",
                    timeout.as_millis()
                )));
            }
        }
    }
}
