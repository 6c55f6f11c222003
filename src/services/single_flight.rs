use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking mutual exclusion for periodic jobs: a tick that finds the
/// previous cycle still running is skipped instead of queued.
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the flag, or returns `None` if a cycle is already in flight.
    /// The flag is released when the guard drops, on every exit path.
    pub fn try_acquire(&self) -> Option<SingleFlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightGuard { flag: &self.running })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub struct SingleFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
