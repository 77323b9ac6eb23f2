//! Dispatcher Module
//!
//! The round-trip engine: maps one decoded request onto backend
//! operations and translates the outcome into a protocol response.
//!
//! ## Atomicity model
//!
//! The backend is shared by any number of gateway instances, so memcached
//! verbs fall into two classes:
//!
//! - **Single-step** (`get`, `set`, `delete`): one backend call whose
//!   atomicity the backend itself provides. No lock.
//! - **Compound** (`add`, `replace`, `cas`, `append`/`prepend`,
//!   `incr`/`decr`, `touch`): a read followed by a conditional write.
//!   These hold the per-key lease for the whole sequence; two concurrent
//!   `add`s from different instances must have exactly one winner.
//!
//! A compound verb that fails after acquiring its lease never reports
//! success, and the lease is released on every exit path via the guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};

use crate::backend::{Backend, Item};
use crate::error::{GateError, Result};
use crate::lock::LockCoordinator;
use crate::protocol::{CounterVerb, Request, Response, StoreVerb, Value};

/// Executes requests against the backend, serializing compound verbs
/// through the lock coordinator.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    locks: LockCoordinator,
    /// CAS token source: seeded from the wall clock so tokens stay unique
    /// across restarts and instances with overwhelming probability
    cas_source: AtomicU64,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, locks: LockCoordinator) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self {
            backend,
            locks,
            cas_source: AtomicU64::new(seed),
        }
    }

    /// Execute one request, translating every failure into a response line.
    ///
    /// Never returns an error: backend and lock failures become
    /// `SERVER_ERROR`, semantic failures become `CLIENT_ERROR`. The caller
    /// decides whether `noreply` suppresses the result.
    pub fn execute(&self, request: Request) -> Response {
        let result = match request {
            Request::Get { keys, with_cas } => self.get(&keys, with_cas),
            Request::Store {
                verb,
                key,
                flags,
                exptime,
                payload,
                cas_unique,
                noreply: _,
            } => self.store(verb, &key, flags, exptime, payload, cas_unique),
            Request::Delete { key, .. } => self.delete(&key),
            Request::Counter { verb, key, delta, .. } => self.counter(verb, &key, delta),
            Request::Touch { key, exptime, .. } => self.touch(&key, exptime),
            Request::FlushAll { delay, .. } => self.flush_all(delay),
            Request::Version => Ok(Response::Version(crate::VERSION.to_string())),
            Request::Quit => Ok(Response::Ok),
        };

        result.unwrap_or_else(|e| match e {
            GateError::Client(reason) => Response::ClientError(reason),
            other => Response::ServerError(other.to_string()),
        })
    }

    /// Next CAS token; advances on every mutation of any key
    fn next_cas(&self) -> u64 {
        self.cas_source.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    // =========================================================================
    // Single-step verbs
    // =========================================================================

    fn get(&self, keys: &[String], with_cas: bool) -> Result<Response> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.backend.get(key)? {
                values.push(Value {
                    key: key.clone(),
                    flags: item.flags,
                    cas_unique: with_cas.then_some(item.cas_unique),
                    data: item.payload,
                });
            }
        }
        Ok(Response::Values(values))
    }

    fn delete(&self, key: &str) -> Result<Response> {
        Ok(if self.backend.delete(key)? {
            Response::Deleted
        } else {
            Response::NotFound
        })
    }

    fn flush_all(&self, delay: Option<u64>) -> Result<Response> {
        // Best effort only: concurrent instances may briefly observe
        // pre-flush items
        self.backend.flush(delay)?;
        Ok(Response::Ok)
    }

    // =========================================================================
    // Storage verbs
    // =========================================================================

    fn store(
        &self,
        verb: StoreVerb,
        key: &str,
        flags: u32,
        exptime: i64,
        payload: Bytes,
        cas_unique: Option<u64>,
    ) -> Result<Response> {
        // Unconditional overwrite has no read-then-write race to protect
        if verb == StoreVerb::Set {
            return self.write_item(key, flags, exptime, payload).map(|_| Response::Stored);
        }

        let guard = self.locks.lock(key)?;
        let existing = self.backend.get(key)?;

        let response = match (verb, existing) {
            (StoreVerb::Add, None) => {
                self.write_item(key, flags, exptime, payload)?;
                Response::Stored
            }
            (StoreVerb::Add, Some(_)) => Response::NotStored,

            (StoreVerb::Replace, Some(_)) => {
                self.write_item(key, flags, exptime, payload)?;
                Response::Stored
            }
            (StoreVerb::Replace, None) => Response::NotStored,

            (StoreVerb::Append, Some(prev)) | (StoreVerb::Prepend, Some(prev)) => {
                let mut data = BytesMut::with_capacity(prev.payload.len() + payload.len());
                if verb == StoreVerb::Append {
                    data.extend_from_slice(&prev.payload);
                    data.extend_from_slice(&payload);
                } else {
                    data.extend_from_slice(&payload);
                    data.extend_from_slice(&prev.payload);
                }
                // Concatenation keeps the existing flags and exptime
                self.write_item(key, prev.flags, prev.exptime, data.freeze())?;
                Response::Stored
            }
            (StoreVerb::Append, None) | (StoreVerb::Prepend, None) => Response::NotStored,

            (StoreVerb::Cas, Some(prev)) => {
                if Some(prev.cas_unique) == cas_unique {
                    self.write_item(key, flags, exptime, payload)?;
                    Response::Stored
                } else {
                    // The client's view is stale
                    Response::Exists
                }
            }
            (StoreVerb::Cas, None) => Response::NotFound,

            (StoreVerb::Set, _) => unreachable!("set handled above"),
        };

        guard.release();
        Ok(response)
    }

    fn write_item(&self, key: &str, flags: u32, exptime: i64, payload: Bytes) -> Result<()> {
        self.backend.set(
            key,
            Item {
                payload,
                flags,
                exptime,
                cas_unique: self.next_cas(),
            },
        )
    }

    // =========================================================================
    // Compound read-modify-write verbs
    // =========================================================================

    fn counter(&self, verb: CounterVerb, key: &str, delta: u64) -> Result<Response> {
        let guard = self.locks.lock(key)?;
        let Some(prev) = self.backend.get(key)? else {
            guard.release();
            return Ok(Response::NotFound);
        };

        let current: u64 = std::str::from_utf8(&prev.payload)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                GateError::Client(
                    "cannot increment or decrement non-numeric value".to_string(),
                )
            })?;

        let next = match verb {
            CounterVerb::Incr => current.wrapping_add(delta),
            // Decrement clamps at zero rather than wrapping
            CounterVerb::Decr => current.saturating_sub(delta),
        };

        self.write_item(key, prev.flags, prev.exptime, Bytes::from(next.to_string()))?;
        guard.release();
        Ok(Response::Number(next))
    }

    fn touch(&self, key: &str, exptime: i64) -> Result<Response> {
        let guard = self.locks.lock(key)?;
        let Some(prev) = self.backend.get(key)? else {
            guard.release();
            return Ok(Response::NotFound);
        };

        // Payload and flags survive; only the expiry moves, with a new token
        self.write_item(key, prev.flags, exptime, prev.payload)?;
        guard.release();
        Ok(Response::Touched)
    }
}
