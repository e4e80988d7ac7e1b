//! Session generation tracking
//!
//! Every async completion (vote checks, push deliveries, submit
//! responses) snapshots the generation when it starts and is applied
//! only if that generation is still current. Ending the session bumps
//! the counter, which turns every in-flight completion stale without
//! any per-task bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct SessionHandle {
    generation: AtomicU64,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Invalidates all in-flight work. Returns the new generation.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}
