//! In-process lock service
//!
//! Mutex + condvar implementation of [`LockService`] for tests and the
//! standalone daemon. Holders are tracked by name with an opaque token so
//! release is idempotent and a stale token cannot free a newer lease.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{GateError, Result};
use super::LockService;

/// In-process [`LockService`]
#[derive(Default)]
pub struct MemoryLockService {
    held: Mutex<State>,
    freed: Condvar,
}

#[derive(Default)]
struct State {
    /// Lease name → holder token
    holders: HashMap<String, u64>,
    next_token: u64,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockService for MemoryLockService {
    fn acquire(&self, name: &str, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        let mut state = self.held.lock();
        while state.holders.contains_key(name) {
            if self.freed.wait_until(&mut state, deadline).timed_out() {
                return Err(GateError::LockUnavailable(format!(
                    "timed out waiting for {name}"
                )));
            }
        }
        state.next_token += 1;
        let token = state.next_token;
        state.holders.insert(name.to_string(), token);
        Ok(token)
    }

    fn release(&self, name: &str, token: u64) {
        let mut state = self.held.lock();
        if state.holders.get(name) == Some(&token) {
            state.holders.remove(name);
            self.freed.notify_all();
        }
    }
}
