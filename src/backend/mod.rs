//! Backend Module
//!
//! The shared key-value store behind the gateway. The gateway keeps no
//! cache of its own: every request round-trips to the backend, and all
//! cross-instance coordination happens through the lock service, never
//! through process memory.
//!
//! The concrete store is a collaborator behind the [`Backend`] trait;
//! [`MemoryBackend`] is a thread-safe in-process implementation used by
//! tests and by the standalone daemon.

mod memory;

pub use memory::MemoryBackend;

use bytes::Bytes;

use crate::error::Result;

/// One stored item, addressed by key in the backend.
///
/// `cas_unique` is assigned by the gateway on every mutation, since the
/// backend's native versioning is not assumed to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub payload: Bytes,
    /// Opaque client flags, stored and returned verbatim
    pub flags: u32,
    /// Expiry as supplied on the wire: 0 = never, negative = already
    /// expired, <= 30 days = seconds from now, larger = absolute epoch
    pub exptime: i64,
    pub cas_unique: u64,
}

/// The key-value store collaborator consumed by the dispatcher.
///
/// `set` must write the full item atomically (reads are never torn), and
/// connectivity failures surface as `GateError::Backend`.
pub trait Backend: Send + Sync {
    /// Fetch an item; absent keys are `Ok(None)`, not an error
    fn get(&self, key: &str) -> Result<Option<Item>>;

    /// Unconditionally write the full item
    fn set(&self, key: &str, item: Item) -> Result<()>;

    /// Remove a key, reporting whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Best-effort invalidation of all items, optionally deferred by
    /// `delay` seconds. No cross-instance atomicity is guaranteed.
    fn flush(&self, delay: Option<u64>) -> Result<()>;
}
