//! In-memory backend
//!
//! A thread-safe store with memcached-compatible expiry semantics: lazy
//! eviction on read, relative/absolute exptime interpretation, and the
//! `flush_all [delay]` watermark (items stored before the flush point are
//! invalid once it passes).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::error::Result;
use super::{Backend, Item};

/// Relative exptimes above this are absolute unix timestamps (30 days)
const RELATIVE_EXPTIME_MAX: i64 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone)]
struct Entry {
    item: Item,
    /// Absolute expiry deadline, resolved from the wire exptime at store time
    expires_at: Option<SystemTime>,
    stored_at: SystemTime,
}

/// Thread-safe in-memory [`Backend`]
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    items: HashMap<String, Entry>,
    /// `flush_all` watermark: items stored before this instant are
    /// invalid once the instant has passed
    flush_at: Option<SystemTime>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired, unflushed) items; test/debug helper
    pub fn len(&self) -> usize {
        let now = SystemTime::now();
        let inner = self.inner.read();
        inner
            .items
            .values()
            .filter(|e| !is_dead(e, inner.flush_at, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve a wire exptime to an absolute deadline at store time.
///
/// Deadlines past what `SystemTime` can represent saturate to "never".
fn resolve_exptime(exptime: i64, now: SystemTime) -> Option<SystemTime> {
    match exptime {
        0 => None,
        t if t < 0 => Some(now), // already expired
        t if t <= RELATIVE_EXPTIME_MAX => now.checked_add(Duration::from_secs(t as u64)),
        t => UNIX_EPOCH.checked_add(Duration::from_secs(t as u64)),
    }
}

fn is_dead(entry: &Entry, flush_at: Option<SystemTime>, now: SystemTime) -> bool {
    if let Some(deadline) = entry.expires_at {
        if now >= deadline {
            return true;
        }
    }
    if let Some(flush) = flush_at {
        if now >= flush && entry.stored_at < flush {
            return true;
        }
    }
    false
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Item>> {
        let now = SystemTime::now();
        {
            let inner = self.inner.read();
            match inner.items.get(key) {
                None => return Ok(None),
                Some(entry) if !is_dead(entry, inner.flush_at, now) => {
                    return Ok(Some(entry.item.clone()));
                }
                Some(_) => {}
            }
        }
        // Lazy eviction of the dead entry
        let mut inner = self.inner.write();
        let flush_at = inner.flush_at;
        let dead = inner
            .items
            .get(key)
            .is_some_and(|e| is_dead(e, flush_at, now));
        if dead {
            inner.items.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, item: Item) -> Result<()> {
        let now = SystemTime::now();
        let entry = Entry {
            expires_at: resolve_exptime(item.exptime, now),
            stored_at: now,
            item,
        };
        self.inner.write().items.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = SystemTime::now();
        let mut inner = self.inner.write();
        let flush_at = inner.flush_at;
        match inner.items.remove(key) {
            Some(entry) => Ok(!is_dead(&entry, flush_at, now)),
            None => Ok(false),
        }
    }

    fn flush(&self, delay: Option<u64>) -> Result<()> {
        let mut inner = self.inner.write();
        match delay {
            None | Some(0) => {
                inner.items.clear();
                inner.flush_at = None;
            }
            Some(secs) => {
                // A delay past what SystemTime can represent is a flush
                // that never arrives
                inner.flush_at = SystemTime::now().checked_add(Duration::from_secs(secs));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn item(payload: &[u8], exptime: i64) -> Item {
        Item {
            payload: Bytes::copy_from_slice(payload),
            flags: 0,
            exptime,
            cas_unique: 1,
        }
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let backend = MemoryBackend::new();
        backend.set("k", item(b"v", 0)).unwrap();
        assert_eq!(backend.get("k").unwrap().unwrap().payload, &b"v"[..]);
        assert!(backend.delete("k").unwrap());
        assert!(!backend.delete("k").unwrap());
        assert!(backend.get("k").unwrap().is_none());
    }

    #[test]
    fn negative_exptime_expires_immediately() {
        let backend = MemoryBackend::new();
        backend.set("k", item(b"v", -1)).unwrap();
        assert!(backend.get("k").unwrap().is_none());
    }

    #[test]
    fn flush_clears_existing_items() {
        let backend = MemoryBackend::new();
        backend.set("a", item(b"1", 0)).unwrap();
        backend.set("b", item(b"2", 0)).unwrap();
        backend.flush(None).unwrap();
        assert!(backend.get("a").unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[test]
    fn deferred_flush_spares_items_until_deadline() {
        let backend = MemoryBackend::new();
        backend.set("a", item(b"1", 0)).unwrap();
        backend.flush(Some(3600)).unwrap();
        // Deadline is an hour out; the item is still visible
        assert!(backend.get("a").unwrap().is_some());
    }

    #[test]
    fn flush_with_unrepresentable_delay_never_triggers() {
        let backend = MemoryBackend::new();
        backend.set("a", item(b"1", 0)).unwrap();
        // A delay past the end of SystemTime saturates to "never"
        backend.flush(Some(u64::MAX)).unwrap();
        assert!(backend.get("a").unwrap().is_some());
    }

    #[test]
    fn unrepresentable_absolute_exptime_never_expires() {
        let backend = MemoryBackend::new();
        backend.set("k", item(b"v", i64::MAX)).unwrap();
        assert!(backend.get("k").unwrap().is_some());
    }
}
