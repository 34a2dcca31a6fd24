//! Duplicate-bootstrap detection.
//!
//! The guard is independent of the engine's init lock so it can be queried
//! while initialization is in progress, or before it ever happened.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Lock-free counter that detects more than one engine bootstrap per
/// reset cycle.  Diagnostic only; nothing is enforced.
#[derive(Debug, Default)]
pub struct SingletonGuard {
    count: AtomicUsize,
}

impl SingletonGuard {
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Register a bootstrap.  Returns `true` only for the first caller since
    /// the last [`reset`](Self::reset).
    pub fn check(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count != 1 {
            warn!(count, "Engine bootstrapped more than once in this process");
        }
        count == 1
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_call_only() {
        let guard = SingletonGuard::new();
        assert!(guard.check());
        assert!(!guard.check());
        assert!(!guard.check());
    }

    #[test]
    fn test_reset_starts_new_cycle() {
        let guard = SingletonGuard::new();
        assert!(guard.check());
        guard.reset();
        assert!(guard.check());
        assert!(!guard.check());
    }

    #[test]
    fn test_exactly_one_winner_across_threads() {
        let guard = Arc::new(SingletonGuard::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.check())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
