//! Command definitions
//!
//! Decoded client requests. One `Request` is created per round trip and
//! dropped once its response has been written.

use bytes::Bytes;

/// Storage-family verbs sharing the `<key> <flags> <exptime> <bytes>` line shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVerb {
    /// Unconditional write
    Set,
    /// Write only if the key is absent
    Add,
    /// Write only if the key is present
    Replace,
    /// Concatenate after the existing payload
    Append,
    /// Concatenate before the existing payload
    Prepend,
    /// Write only if the supplied CAS token matches the current one
    Cas,
}

impl StoreVerb {
    /// Wire keyword for this verb
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreVerb::Set => "set",
            StoreVerb::Add => "add",
            StoreVerb::Replace => "replace",
            StoreVerb::Append => "append",
            StoreVerb::Prepend => "prepend",
            StoreVerb::Cas => "cas",
        }
    }
}

/// Counter verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterVerb {
    Incr,
    Decr,
}

/// A parsed request
#[derive(Debug, Clone)]
pub enum Request {
    /// `get <key>*` / `gets <key>*`
    Get {
        keys: Vec<String>,
        /// `gets`: include the CAS token in each VALUE header
        with_cas: bool,
    },

    /// `set`/`add`/`replace`/`append`/`prepend`/`cas`, with data block
    Store {
        verb: StoreVerb,
        key: String,
        flags: u32,
        exptime: i64,
        payload: Bytes,
        /// Present only for `cas`
        cas_unique: Option<u64>,
        noreply: bool,
    },

    /// `delete <key> [noreply]`
    Delete { key: String, noreply: bool },

    /// `incr`/`decr <key> <delta> [noreply]`
    Counter {
        verb: CounterVerb,
        key: String,
        delta: u64,
        noreply: bool,
    },

    /// `touch <key> <exptime> [noreply]`
    Touch {
        key: String,
        exptime: i64,
        noreply: bool,
    },

    /// `flush_all [delay] [noreply]`
    FlushAll { delay: Option<u64>, noreply: bool },

    /// `version`
    Version,

    /// `quit` (close the connection, no response)
    Quit,
}

impl Request {
    /// Whether the client asked for the success response to be suppressed.
    ///
    /// Framing and connection errors bypass this flag; it only governs the
    /// dispatcher's response for a successfully decoded request.
    pub fn noreply(&self) -> bool {
        match self {
            Request::Store { noreply, .. }
            | Request::Delete { noreply, .. }
            | Request::Counter { noreply, .. }
            | Request::Touch { noreply, .. }
            | Request::FlushAll { noreply, .. } => *noreply,
            Request::Get { .. } | Request::Version | Request::Quit => false,
        }
    }
}
