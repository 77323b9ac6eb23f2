//! Dispatcher Tests
//!
//! Verb semantics against the in-memory backend, plus the locking
//! properties: add mutual exclusion, lock timeouts mapping to server
//! errors, and lease release after failed backend writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use bytes::Bytes;
use memgate::backend::{Backend, Item, MemoryBackend};
use memgate::dispatch::Dispatcher;
use memgate::error::{GateError, Result};
use memgate::lock::{LockCoordinator, LockService, MemoryLockService};
use memgate::protocol::{CounterVerb, Request, Response, StoreVerb};

const LOCK_TIMEOUT: Duration = Duration::from_millis(300);

fn dispatcher() -> Dispatcher {
    dispatcher_with(Arc::new(MemoryBackend::new()), Arc::new(MemoryLockService::new()))
}

fn dispatcher_with(backend: Arc<dyn Backend>, locks: Arc<dyn LockService>) -> Dispatcher {
    Dispatcher::new(backend, LockCoordinator::new(locks, LOCK_TIMEOUT))
}

fn store(verb: StoreVerb, key: &str, payload: &[u8]) -> Request {
    Request::Store {
        verb,
        key: key.to_string(),
        flags: 0,
        exptime: 0,
        payload: Bytes::copy_from_slice(payload),
        cas_unique: None,
        noreply: false,
    }
}

fn get(key: &str) -> Request {
    Request::Get {
        keys: vec![key.to_string()],
        with_cas: false,
    }
}

fn gets(key: &str) -> Request {
    Request::Get {
        keys: vec![key.to_string()],
        with_cas: true,
    }
}

/// Extract the CAS token from a `gets` response
fn cas_of(dispatcher: &Dispatcher, key: &str) -> u64 {
    match dispatcher.execute(gets(key)) {
        Response::Values(values) => values[0].cas_unique.expect("gets returns a cas token"),
        other => panic!("expected values, got {other:?}"),
    }
}

// =============================================================================
// Single-step verbs
// =============================================================================

#[test]
fn test_set_then_get_roundtrip() {
    let d = dispatcher();
    assert_eq!(d.execute(store(StoreVerb::Set, "x", b"hello")), Response::Stored);

    match d.execute(get("x")) {
        Response::Values(values) => {
            assert_eq!(values.len(), 1);
            assert_eq!(values[0].key, "x");
            assert_eq!(values[0].data, Bytes::from_static(b"hello"));
            assert_eq!(values[0].cas_unique, None);
        }
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_get_absent_key_is_empty_not_error() {
    let d = dispatcher();
    assert_eq!(d.execute(get("missing")), Response::Values(vec![]));
}

#[test]
fn test_get_multiple_keys_skips_absent() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "a", b"1"));
    d.execute(store(StoreVerb::Set, "c", b"3"));
    match d.execute(Request::Get {
        keys: vec!["a".into(), "b".into(), "c".into()],
        with_cas: false,
    }) {
        Response::Values(values) => {
            let keys: Vec<&str> = values.iter().map(|v| v.key.as_str()).collect();
            assert_eq!(keys, vec!["a", "c"]);
        }
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_set_advances_cas() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"one"));
    let first = cas_of(&d, "x");
    d.execute(store(StoreVerb::Set, "x", b"two"));
    let second = cas_of(&d, "x");
    assert_ne!(first, second);
}

#[test]
fn test_delete_existing_and_absent() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"v"));
    assert_eq!(
        d.execute(Request::Delete { key: "x".into(), noreply: false }),
        Response::Deleted
    );
    assert_eq!(
        d.execute(Request::Delete { key: "x".into(), noreply: false }),
        Response::NotFound
    );
}

#[test]
fn test_version_reports_crate_version() {
    let d = dispatcher();
    assert_eq!(
        d.execute(Request::Version),
        Response::Version(memgate::VERSION.to_string())
    );
}

#[test]
fn test_flush_all_clears_backend() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"v"));
    assert_eq!(
        d.execute(Request::FlushAll { delay: None, noreply: false }),
        Response::Ok
    );
    assert_eq!(d.execute(get("x")), Response::Values(vec![]));
}

#[test]
fn test_flush_all_with_unrepresentable_delay_is_deferred_forever() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"v"));
    assert_eq!(
        d.execute(Request::FlushAll { delay: Some(u64::MAX), noreply: false }),
        Response::Ok
    );
    // The flush point is past the end of representable time, so it never
    // arrives and the item stays visible
    match d.execute(get("x")) {
        Response::Values(values) => assert_eq!(values[0].data, Bytes::from_static(b"v")),
        other => panic!("expected values, got {other:?}"),
    }
}

// =============================================================================
// Conditional storage verbs
// =============================================================================

#[test]
fn test_add_only_when_absent() {
    let d = dispatcher();
    assert_eq!(d.execute(store(StoreVerb::Add, "x", b"first")), Response::Stored);
    assert_eq!(d.execute(store(StoreVerb::Add, "x", b"second")), Response::NotStored);

    match d.execute(get("x")) {
        Response::Values(values) => assert_eq!(values[0].data, Bytes::from_static(b"first")),
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_replace_only_when_present() {
    let d = dispatcher();
    assert_eq!(
        d.execute(store(StoreVerb::Replace, "x", b"v")),
        Response::NotStored
    );
    d.execute(store(StoreVerb::Set, "x", b"old"));
    assert_eq!(d.execute(store(StoreVerb::Replace, "x", b"new")), Response::Stored);
}

#[test]
fn test_append_prepend_preserve_flags() {
    let d = dispatcher();
    d.execute(Request::Store {
        verb: StoreVerb::Set,
        key: "x".into(),
        flags: 7,
        exptime: 0,
        payload: Bytes::from_static(b"mid"),
        cas_unique: None,
        noreply: false,
    });

    assert_eq!(d.execute(store(StoreVerb::Append, "x", b"-end")), Response::Stored);
    assert_eq!(d.execute(store(StoreVerb::Prepend, "x", b"start-")), Response::Stored);

    match d.execute(get("x")) {
        Response::Values(values) => {
            assert_eq!(values[0].data, Bytes::from_static(b"start-mid-end"));
            // Existing flags survive concatenation
            assert_eq!(values[0].flags, 7);
        }
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_append_absent_key_not_stored() {
    let d = dispatcher();
    assert_eq!(
        d.execute(store(StoreVerb::Append, "nope", b"x")),
        Response::NotStored
    );
    assert_eq!(
        d.execute(store(StoreVerb::Prepend, "nope", b"x")),
        Response::NotStored
    );
}

#[test]
fn test_cas_stored_on_matching_token() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"v1"));
    let token = cas_of(&d, "x");

    assert_eq!(
        d.execute(Request::Store {
            verb: StoreVerb::Cas,
            key: "x".into(),
            flags: 0,
            exptime: 0,
            payload: Bytes::from_static(b"v2"),
            cas_unique: Some(token),
            noreply: false,
        }),
        Response::Stored
    );
}

#[test]
fn test_cas_stale_token_never_succeeds_again() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"v1"));
    let stale = cas_of(&d, "x");

    // Any successful mutation invalidates the old token for good
    d.execute(store(StoreVerb::Set, "x", b"v2"));

    let attempt = Request::Store {
        verb: StoreVerb::Cas,
        key: "x".into(),
        flags: 0,
        exptime: 0,
        payload: Bytes::from_static(b"v3"),
        cas_unique: Some(stale),
        noreply: false,
    };
    assert_eq!(d.execute(attempt.clone()), Response::Exists);
    assert_eq!(d.execute(attempt), Response::Exists);
}

#[test]
fn test_cas_absent_key_not_found() {
    let d = dispatcher();
    assert_eq!(
        d.execute(Request::Store {
            verb: StoreVerb::Cas,
            key: "ghost".into(),
            flags: 0,
            exptime: 0,
            payload: Bytes::from_static(b"v"),
            cas_unique: Some(1),
            noreply: false,
        }),
        Response::NotFound
    );
}

// =============================================================================
// Counter verbs
// =============================================================================

fn counter(verb: CounterVerb, key: &str, delta: u64) -> Request {
    Request::Counter {
        verb,
        key: key.to_string(),
        delta,
        noreply: false,
    }
}

#[test]
fn test_incr_adds_delta() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "n", b"3"));
    assert_eq!(d.execute(counter(CounterVerb::Incr, "n", 10)), Response::Number(13));

    match d.execute(get("n")) {
        Response::Values(values) => assert_eq!(values[0].data, Bytes::from_static(b"13")),
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_decr_saturates_at_zero() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "n", b"3"));
    assert_eq!(d.execute(counter(CounterVerb::Decr, "n", 10)), Response::Number(0));

    match d.execute(get("n")) {
        Response::Values(values) => assert_eq!(values[0].data, Bytes::from_static(b"0")),
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_counter_absent_key_not_found() {
    let d = dispatcher();
    assert_eq!(
        d.execute(counter(CounterVerb::Incr, "ghost", 1)),
        Response::NotFound
    );
}

#[test]
fn test_counter_non_numeric_is_client_error() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "s", b"not a number"));
    assert!(matches!(
        d.execute(counter(CounterVerb::Incr, "s", 1)),
        Response::ClientError(_)
    ));
    // The stored value is untouched
    match d.execute(get("s")) {
        Response::Values(values) => {
            assert_eq!(values[0].data, Bytes::from_static(b"not a number"))
        }
        other => panic!("expected values, got {other:?}"),
    }
}

// =============================================================================
// Touch
// =============================================================================

#[test]
fn test_touch_updates_expiry_and_advances_cas() {
    let d = dispatcher();
    d.execute(store(StoreVerb::Set, "x", b"v"));
    let before = cas_of(&d, "x");

    assert_eq!(
        d.execute(Request::Touch { key: "x".into(), exptime: 300, noreply: false }),
        Response::Touched
    );

    let after = cas_of(&d, "x");
    assert_ne!(before, after);
    match d.execute(get("x")) {
        Response::Values(values) => assert_eq!(values[0].data, Bytes::from_static(b"v")),
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_touch_absent_key_not_found() {
    let d = dispatcher();
    assert_eq!(
        d.execute(Request::Touch { key: "ghost".into(), exptime: 300, noreply: false }),
        Response::NotFound
    );
}

// =============================================================================
// Locking properties
// =============================================================================

#[test]
fn test_add_mutual_exclusion_under_contention() {
    let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
    let locks: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
    let dispatcher = Arc::new(dispatcher_with(backend, locks));

    const WORKERS: usize = 8;
    let barrier = Arc::new(Barrier::new(WORKERS));
    let mut handles = Vec::new();

    for i in 0..WORKERS {
        let dispatcher = Arc::clone(&dispatcher);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            let payload = format!("worker-{i}");
            dispatcher.execute(store(StoreVerb::Add, "contested", payload.as_bytes()))
        }));
    }

    let results: Vec<Response> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let stored = results.iter().filter(|r| **r == Response::Stored).count();
    let not_stored = results.iter().filter(|r| **r == Response::NotStored).count();

    // Exactly one winner; everyone else observed the key as present
    assert_eq!(stored, 1);
    assert_eq!(not_stored, WORKERS - 1);

    // The final value belongs to the winner
    match dispatcher.execute(get("contested")) {
        Response::Values(values) => {
            assert!(values[0].data.starts_with(b"worker-"));
        }
        other => panic!("expected values, got {other:?}"),
    }
}

#[test]
fn test_lock_timeout_maps_to_server_error() {
    let locks = Arc::new(MemoryLockService::new());
    let d = dispatcher_with(Arc::new(MemoryBackend::new()), locks.clone());

    // Hold the lease for the data key from "another instance"
    let token = locks.acquire("lock:busy", Duration::from_secs(5)).unwrap();

    assert!(matches!(
        d.execute(store(StoreVerb::Add, "busy", b"v")),
        Response::ServerError(_)
    ));

    locks.release("lock:busy", token);

    // With the lease free again the verb goes through
    assert_eq!(d.execute(store(StoreVerb::Add, "busy", b"v")), Response::Stored);
}

/// Backend whose writes can be switched to fail, for exercising the
/// failure paths of lock-guarded verbs
struct FlakyBackend {
    inner: MemoryBackend,
    fail_writes: AtomicBool,
}

impl FlakyBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_writes: AtomicBool::new(false),
        }
    }
}

impl Backend for FlakyBackend {
    fn get(&self, key: &str) -> Result<Option<Item>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, item: Item) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(GateError::Backend("injected write failure".to_string()));
        }
        self.inner.set(key, item)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key)
    }

    fn flush(&self, delay: Option<u64>) -> Result<()> {
        self.inner.flush(delay)
    }
}

#[test]
fn test_lock_released_after_failed_backend_write() {
    let backend = Arc::new(FlakyBackend::new());
    let locks: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
    let d = dispatcher_with(backend.clone(), locks);

    backend.fail_writes.store(true, Ordering::Relaxed);
    assert!(matches!(
        d.execute(store(StoreVerb::Add, "x", b"v")),
        Response::ServerError(_)
    ));

    // The lease must have been released on the failure path: a subsequent
    // add on the same key succeeds instead of timing out on the lock
    backend.fail_writes.store(false, Ordering::Relaxed);
    assert_eq!(d.execute(store(StoreVerb::Add, "x", b"v")), Response::Stored);
}

#[test]
fn test_counter_client_error_releases_lock() {
    let locks: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
    let d = dispatcher_with(Arc::new(MemoryBackend::new()), locks);

    d.execute(store(StoreVerb::Set, "s", b"oops"));
    assert!(matches!(
        d.execute(counter(CounterVerb::Incr, "s", 1)),
        Response::ClientError(_)
    ));

    // Error path released the lease; the next guarded verb proceeds
    d.execute(store(StoreVerb::Set, "s", b"5"));
    assert_eq!(d.execute(counter(CounterVerb::Incr, "s", 1)), Response::Number(6));
}
