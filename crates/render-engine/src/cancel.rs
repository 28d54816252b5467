//! Cooperative cancellation and internal stop signalling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::status::FailureReason;

/// Shared cancellation flag raised by the front-end.
///
/// Settable from any thread, idempotent, and observed by every blocking
/// wait in the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Internal stop request shared by the supervisor and its workers.
///
/// Distinct from [`CancelToken`]: a stop can come from a failing worker, and
/// records why. The first recorded failure wins.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    failure: Mutex<Option<FailureReason>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every worker to finish at its next claim or push.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Record a failure and stop. Returns `false` if an earlier failure was
    /// already recorded.
    pub fn fail(&self, reason: FailureReason) -> bool {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        let first = slot.is_none();
        if first {
            *slot = Some(reason);
        }
        drop(slot);
        self.stop();
        first
    }

    /// The recorded failure, if any.
    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
