//! Mutual-exclusion gate for mutating control-plane operations.
//!
//! Create, update, delete, bulk refresh, execution and selection staging all run
//! under a gate. Acquisition waits at most the gate's timeout and then fails with
//! `LockTimeout` before any work happens. The guard releases on every exit path,
//! including unwinding.
//!
//! [`Gate::process`] is the single process-wide gate: operations on unrelated
//! containers serialize against each other too. A container may instead be given
//! its own gate (see `GateScope`).

use crate::error::{WorkflowError, WorkflowResult};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How long a mutating operation waits for the gate.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(5);

static PROCESS_GATE: LazyLock<Arc<Gate>> =
    LazyLock::new(|| Arc::new(Gate::new(DEFAULT_GATE_TIMEOUT)));

/// Re-entrant lock with a bounded wait. Released fairly, so waiters are served in
/// arrival order.
pub struct Gate {
    lock: ReentrantMutex<()>,
    timeout: Duration,
}

/// Proof of holding the gate. Dropping it releases the gate.
pub struct GateGuard<'a> {
    guard: Option<ReentrantMutexGuard<'a, ()>>,
    operation: String,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            ReentrantMutexGuard::unlock_fair(guard);
            trace!(operation = %self.operation, "Gate released");
        }
    }
}

impl Gate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock: ReentrantMutex::new(()),
            timeout,
        }
    }

    /// The shared process-wide gate.
    pub fn process() -> Arc<Gate> {
        Arc::clone(&PROCESS_GATE)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Acquire the gate, waiting at most the configured timeout.
    pub fn acquire(&self, operation: &str) -> WorkflowResult<GateGuard<'_>> {
        let start = Instant::now();
        match self.lock.try_lock_for(self.timeout) {
            Some(guard) => {
                debug!(
                    operation,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "Gate acquired"
                );
                Ok(GateGuard {
                    guard: Some(guard),
                    operation: operation.to_string(),
                })
            }
            None => {
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!(operation, waited_ms, "Gate acquisition timed out");
                Err(WorkflowError::LockTimeout {
                    operation: operation.to_string(),
                    waited_ms,
                })
            }
        }
    }

    /// Run `f` while holding the gate.
    pub fn run<T, F>(&self, operation: &str, f: F) -> WorkflowResult<T>
    where
        F: FnOnce() -> WorkflowResult<T>,
    {
        let _guard = self.acquire(operation)?;
        f()
    }
}
