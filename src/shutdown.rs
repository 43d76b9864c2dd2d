//! SIGINT / SIGTERM latch
//!
//! The handler only stores into an atomic flag; all cleanup runs on the
//! thread that waits on it.

use crate::error::{RmError, RmResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared "termination requested" flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Flag that nothing has set yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM to this flag
    ///
    /// Can only be done once per process.
    pub fn install(&self) -> RmResult<()> {
        let requested = self.requested.clone();
        ctrlc::set_handler(move || {
            requested.store(true, Ordering::SeqCst);
        })
        .map_err(|e| RmError::Signal(e.to_string()))
    }

    /// Set the flag by hand
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether termination was requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Block until termination is requested, checking every `poll`
    pub fn wait(&self, poll: Duration) {
        while !self.is_requested() {
            thread::sleep(poll);
        }
    }
}
