//! Lock Module
//!
//! Per-key mutual exclusion across gateway instances. Compound verbs
//! (add, replace, cas, append/prepend, incr/decr, touch) are
//! read-then-write sequences that the backend cannot make atomic on its
//! own; the dispatcher serializes them by holding a lease named after the
//! data key for the duration of the operation.
//!
//! Leases are scoped: [`LockGuard`] releases on drop, on every exit path
//! including panics, so a failed backend step can never leak a lease.

mod memory;

pub use memory::MemoryLockService;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Prefix deriving lock names from data keys, keeping the lock namespace
/// disjoint from the data namespace
const LOCK_PREFIX: &str = "lock:";

/// The distributed mutual-exclusion collaborator.
///
/// `acquire` blocks up to `timeout` and fails with
/// `GateError::LockUnavailable` on contention past the deadline. `release`
/// is a no-op for a token that no longer holds the lease.
pub trait LockService: Send + Sync {
    /// Obtain an exclusive lease on `name`, returning an opaque token
    fn acquire(&self, name: &str, timeout: Duration) -> Result<u64>;

    /// Give up the lease identified by `token`
    fn release(&self, name: &str, token: u64);
}

/// Thin façade the dispatcher uses to serialize compound operations.
///
/// Derives the lease name from the data key and applies the configured
/// acquisition timeout uniformly.
#[derive(Clone)]
pub struct LockCoordinator {
    service: Arc<dyn LockService>,
    timeout: Duration,
}

impl LockCoordinator {
    pub fn new(service: Arc<dyn LockService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Acquire the lease guarding `key`, scoped to the returned guard
    pub fn lock(&self, key: &str) -> Result<LockGuard> {
        let name = format!("{LOCK_PREFIX}{key}");
        let token = self.service.acquire(&name, self.timeout)?;
        Ok(LockGuard {
            service: Arc::clone(&self.service),
            name,
            token,
            released: false,
        })
    }
}

/// An acquired lease, released exactly once: explicitly or on drop.
pub struct LockGuard {
    service: Arc<dyn LockService>,
    name: String,
    token: u64,
    released: bool,
}

impl LockGuard {
    /// Release the lease now rather than at end of scope
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.service.release(&self.name, self.token);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
