//! Re-entrancy guard for pipeline execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

static GLOBAL_GUARD: LazyLock<Arc<ExecutionGuard>> = LazyLock::new(|| Arc::new(ExecutionGuard::new()));

/// Process-wide flag that forbids top-level runs while a deployment is being
/// dispatched.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    suppressed: AtomicBool,
}

impl ExecutionGuard {
    /// Creates an inactive guard.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            suppressed: AtomicBool::new(false),
        }
    }

    /// Returns the process-wide guard.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_GUARD)
    }

    /// Returns true while execution is suppressed.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Suppresses execution until the returned guard is dropped.
    ///
    /// The previous state is restored on drop, including during unwinding.
    #[must_use = "execution is only suppressed while the guard is alive"]
    pub fn suppress(&self) -> SuppressionGuard<'_> {
        let previous = self.suppressed.swap(true, Ordering::SeqCst);
        SuppressionGuard {
            guard: self,
            previous,
        }
    }
}

/// Restores the execution guard when dropped.
#[derive(Debug)]
pub struct SuppressionGuard<'a> {
    guard: &'a ExecutionGuard,
    previous: bool,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.guard.suppressed.store(self.previous, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppress_and_restore() {
        let guard = ExecutionGuard::new();
        {
            let _outer = guard.suppress();
            {
                let _inner = guard.suppress();
                assert!(guard.is_suppressed());
            }
            assert!(guard.is_suppressed());
        }
        assert!(!guard.is_suppressed());
    }

    #[test]
    fn test_restored_after_panic() {
        let guard = Arc::new(ExecutionGuard::new());
        let inner = Arc::clone(&guard);
        let result = std::panic::catch_unwind(move || {
            let _suppressed = inner.suppress();
            panic!("dispatch failed");
        });

        assert!(result.is_err());
        assert!(!guard.is_suppressed());
    }
}
