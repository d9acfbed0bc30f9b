//! Cooperative-cancellation handle shared across every connection task
//! (§5: cancellation is checked at each suspension point rather than by
//! forcibly aborting a task).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns the shared shutdown flag a listener hands out to each accepted
/// connection. Connections poll `is_shutdown` at their own suspension
/// points and unwind with `CoreError::ConnectionAbortedError`; nothing
/// here tears down a task directly.
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        ShutdownHandle {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the shared flag, handed to each connection task.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn clones_share_the_same_flag() {
        let handle = ShutdownHandle::new();
        let cloned = handle.flag();
        assert!(!cloned.load(Ordering::Acquire));
        handle.signal();
        assert!(cloned.load(Ordering::Acquire));
    }

    #[test]
    fn drop_signals_shutdown() {
        let flag = {
            let handle = ShutdownHandle::new();
            handle.flag()
        };
        assert!(flag.load(Ordering::Acquire));
    }
}
