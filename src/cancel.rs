// src/cancel.rs

//! Cooperative cancellation
//!
//! Workers check the flag at every I/O boundary; nothing is interrupted
//! mid-syscall. A deadline, when set, trips the flag implicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

/// Shared cancellation flag with an optional whole-invocation deadline
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { flag: Arc::default(), deadline: Some(deadline) }
    }

    /// A flag sharing this one's cancellation state with a (possibly
    /// tighter) deadline; used for per-component timeouts
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Request cancellation; observed at the next boundary check
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Boundary check: error out if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flag_starts_clear() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check().is_ok());
    }

    #[test]
    fn test_cancel_is_visible_through_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        flag.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_deadline_trips_flag() {
        let flag = CancelFlag::with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_child_shares_cancellation_but_not_deadline() {
        let parent = CancelFlag::new();
        let child = parent.child_with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        parent.cancel();
        let late_child = parent.child_with_deadline(Instant::now() + Duration::from_secs(60));
        assert!(late_child.is_cancelled());
    }
}
