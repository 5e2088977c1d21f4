//! Host-visible synchronization primitives.
//!
//! [`Semaphore`]s order work between queues on the device; [`Fence`]s let the
//! host observe when a submission has finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Queue-to-queue synchronization object.
///
/// One submission signals the semaphore and exactly one later submission on
/// another queue waits on it. Semaphores cannot be waited on from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Semaphore {
    id: u64,
}

impl Semaphore {
    /// Wraps a device semaphore id.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Unsignaled,
    Signaled,
}

/// Device-to-host completion signal for one submission.
///
/// Clones share the same state; the device signals one clone and every other
/// holder (queue bookkeeping, frame ring slot, batch handles) observes it.
#[derive(Debug, Clone)]
pub struct Fence {
    signaled: Arc<AtomicBool>,
}

impl Fence {
    pub fn new_unsignaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn new_signaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn status(&self) -> FenceStatus {
        if self.signaled.load(Ordering::Acquire) {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Non-blocking check.
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Polls the fence until it signals or `timeout` elapses.
    ///
    /// Returns `true` if the fence was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while !self.signaled.load(Ordering::Acquire) {
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    /// Marks the work guarded by this fence as complete.
    ///
    /// Called by device implementations once a submission has executed.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Returns true if both handles refer to the same fence.
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.signaled, &other.signaled)
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new_unsignaled()
    }
}
