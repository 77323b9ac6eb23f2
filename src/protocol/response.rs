//! Response definitions
//!
//! Typed responses covering the memcached text-protocol status vocabulary.

use bytes::Bytes;

/// One item in a retrieval response, rendered as a
/// `VALUE <key> <flags> <bytes> [<cas_unique>]` header plus data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub key: String,
    pub flags: u32,
    /// CAS token, present for `gets`
    pub cas_unique: Option<u64>,
    pub data: Bytes,
}

/// A response to send to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Retrieval result: zero or more VALUE blocks followed by `END`.
    /// Absent keys are simply omitted; an empty vector is a bare `END`.
    Values(Vec<Value>),

    /// `STORED`
    Stored,
    /// `NOT_STORED`
    NotStored,
    /// `EXISTS` (stale CAS token)
    Exists,
    /// `NOT_FOUND`
    NotFound,
    /// `DELETED`
    Deleted,
    /// `TOUCHED`
    Touched,
    /// `OK`
    Ok,

    /// Counter result, rendered as a bare decimal line
    Number(u64),

    /// `VERSION <ver>`
    Version(String),

    /// `ERROR` (malformed or unknown command)
    Error,
    /// `CLIENT_ERROR <reason>`
    ClientError(String),
    /// `SERVER_ERROR <reason>`
    ServerError(String),
}

impl Response {
    /// Whether this response reports a failure the peer must always see,
    /// even when the request carried `noreply`.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Response::Error | Response::ClientError(_) | Response::ServerError(_)
        )
    }
}
