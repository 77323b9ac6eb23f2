//! Protocol codec
//!
//! Decodes one request at a time from a buffered byte stream and encodes
//! typed responses back. The decoder distinguishes three outcomes a caller
//! must branch on:
//!
//! - `Ok(Decoded::Eof)` — clean end-of-stream, zero bytes consumed; the
//!   peer closed the connection between requests.
//! - `Err(GateError::Framing(_))` — malformed request; recoverable. The
//!   caller answers `ERROR` and keeps reading. Where possible the decoder
//!   consumes input up to the next line break so the stream stays in sync.
//! - Any other error — transport failure; the connection must be closed.
//!
//! End-of-stream in the middle of a record (after at least one byte was
//! consumed) is a framing error, not a clean EOF: the next read then
//! observes the clean EOF and the connection winds down.

use std::io::{BufRead, ErrorKind, Read, Write};

use bytes::Bytes;

use crate::error::{GateError, Result};
use super::{CounterVerb, Request, Response, StoreVerb};

/// Maximum key length in bytes (memcached-compatible)
pub const MAX_KEY_LEN: usize = 250;

/// Maximum item payload size (1 MiB, memcached-compatible)
pub const MAX_ITEM_SIZE: usize = 1024 * 1024;

/// Outcome of one decode call
#[derive(Debug)]
pub enum Decoded {
    /// One complete request
    Request(Request),
    /// Clean end-of-stream: the peer closed between requests
    Eof,
}

// =============================================================================
// Request Decoding
// =============================================================================

/// Read one request from the stream.
///
/// Blocks until a full request (command line plus any data block) has been
/// consumed, or fails per the module-level error contract.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Decoded> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => return Ok(Decoded::Eof),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            // Non-UTF8 command line; consume nothing further and report it
            return Err(GateError::Framing("malformed command line".to_string()));
        }
        Err(e) => return Err(GateError::Io(e)),
    }

    if !line.ends_with('\n') {
        // Stream ended mid-line: not a clean EOF
        return Err(GateError::Framing(
            "unexpected end of stream in command line".to_string(),
        ));
    }

    // split_whitespace also strips the CRLF terminator
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = parts.split_first() else {
        return Err(GateError::Framing("empty command line".to_string()));
    };

    let request = match verb {
        "get" => decode_get(args, false)?,
        "gets" => decode_get(args, true)?,
        "set" => decode_store(StoreVerb::Set, args, reader)?,
        "add" => decode_store(StoreVerb::Add, args, reader)?,
        "replace" => decode_store(StoreVerb::Replace, args, reader)?,
        "append" => decode_store(StoreVerb::Append, args, reader)?,
        "prepend" => decode_store(StoreVerb::Prepend, args, reader)?,
        "cas" => decode_store(StoreVerb::Cas, args, reader)?,
        "delete" => decode_delete(args)?,
        "incr" => decode_counter(CounterVerb::Incr, args)?,
        "decr" => decode_counter(CounterVerb::Decr, args)?,
        "touch" => decode_touch(args)?,
        "flush_all" => decode_flush_all(args)?,
        "version" => {
            expect_args(args, 0, "version")?;
            Request::Version
        }
        "quit" => {
            expect_args(args, 0, "quit")?;
            Request::Quit
        }
        other => {
            return Err(GateError::Framing(format!("unknown verb: {other}")));
        }
    };

    Ok(Decoded::Request(request))
}

fn decode_get(args: &[&str], with_cas: bool) -> Result<Request> {
    if args.is_empty() {
        return Err(GateError::Framing("get requires at least one key".to_string()));
    }
    let mut keys = Vec::with_capacity(args.len());
    for arg in args {
        keys.push(parse_key(arg)?);
    }
    Ok(Request::Get { keys, with_cas })
}

fn decode_store<R: BufRead>(verb: StoreVerb, args: &[&str], reader: &mut R) -> Result<Request> {
    // <key> <flags> <exptime> <bytes> [<cas_unique>] [noreply]
    let fixed = if verb == StoreVerb::Cas { 5 } else { 4 };
    let noreply = parse_noreply(args, fixed)?;
    if args.len() < fixed {
        return Err(GateError::Framing(format!(
            "{} requires: key flags exptime bytes{}",
            verb.as_str(),
            if verb == StoreVerb::Cas { " cas_unique" } else { "" }
        )));
    }

    let key = parse_key(args[0])?;
    let flags: u32 = parse_num(args[1], "flags")?;
    let exptime: i64 = parse_num(args[2], "exptime")?;
    let bytes: usize = parse_num(args[3], "bytes")?;
    let cas_unique = if verb == StoreVerb::Cas {
        Some(parse_num(args[4], "cas_unique")?)
    } else {
        None
    };

    if bytes > MAX_ITEM_SIZE {
        // Swallow the oversized data block so the stream stays in sync,
        // then report the semantic failure
        let mut sink = std::io::sink();
        std::io::copy(&mut reader.take((bytes as u64).saturating_add(2)), &mut sink)?;
        return Err(GateError::Client("object too large for cache".to_string()));
    }

    let payload = read_data_block(reader, bytes)?;

    Ok(Request::Store {
        verb,
        key,
        flags,
        exptime,
        payload,
        cas_unique,
        noreply,
    })
}

/// Read exactly `len` payload bytes plus the mandatory CRLF terminator.
fn read_data_block<R: BufRead>(reader: &mut R, len: usize) -> Result<Bytes> {
    let mut payload = vec![0u8; len];
    if let Err(e) = reader.read_exact(&mut payload) {
        return Err(if e.kind() == ErrorKind::UnexpectedEof {
            GateError::Framing("unexpected end of stream in data block".to_string())
        } else {
            GateError::Io(e)
        });
    }

    let mut term = [0u8; 2];
    if let Err(e) = reader.read_exact(&mut term) {
        return Err(if e.kind() == ErrorKind::UnexpectedEof {
            GateError::Framing("unexpected end of stream in data block".to_string())
        } else {
            GateError::Io(e)
        });
    }

    if &term != b"\r\n" {
        // The declared byte count did not line up with the terminator.
        // Resynchronize on the next line break before reporting, so the
        // connection stays usable.
        if !term.contains(&b'\n') {
            let mut skipped = Vec::new();
            reader.read_until(b'\n', &mut skipped)?;
        }
        return Err(GateError::Framing("bad data chunk".to_string()));
    }

    Ok(Bytes::from(payload))
}

fn decode_delete(args: &[&str]) -> Result<Request> {
    let noreply = parse_noreply(args, 1)?;
    if args.is_empty() {
        return Err(GateError::Framing("delete requires a key".to_string()));
    }
    Ok(Request::Delete {
        key: parse_key(args[0])?,
        noreply,
    })
}

fn decode_counter(verb: CounterVerb, args: &[&str]) -> Result<Request> {
    let noreply = parse_noreply(args, 2)?;
    if args.len() < 2 {
        return Err(GateError::Framing("incr/decr requires key and delta".to_string()));
    }
    Ok(Request::Counter {
        verb,
        key: parse_key(args[0])?,
        delta: parse_num(args[1], "delta")?,
        noreply,
    })
}

fn decode_touch(args: &[&str]) -> Result<Request> {
    let noreply = parse_noreply(args, 2)?;
    if args.len() < 2 {
        return Err(GateError::Framing("touch requires key and exptime".to_string()));
    }
    Ok(Request::Touch {
        key: parse_key(args[0])?,
        exptime: parse_num(args[1], "exptime")?,
        noreply,
    })
}

fn decode_flush_all(args: &[&str]) -> Result<Request> {
    // flush_all [delay] [noreply]
    let mut rest = args;
    let mut noreply = false;
    if rest.last() == Some(&"noreply") {
        noreply = true;
        rest = &rest[..rest.len() - 1];
    }
    let delay = match rest {
        [] => None,
        [d] => Some(parse_num(d, "delay")?),
        _ => return Err(GateError::Framing("flush_all takes at most one delay".to_string())),
    };
    Ok(Request::FlushAll { delay, noreply })
}

// -----------------------------------------------------------------------------
// Field parsing helpers
// -----------------------------------------------------------------------------

fn parse_key(raw: &str) -> Result<String> {
    if raw.len() > MAX_KEY_LEN {
        return Err(GateError::Framing(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if raw.bytes().any(|b| b.is_ascii_control()) {
        return Err(GateError::Framing("key contains control characters".to_string()));
    }
    Ok(raw.to_string())
}

fn parse_num<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| GateError::Framing(format!("invalid {field} value: {raw}")))
}

/// Validate trailing tokens after the `fixed` positional arguments and
/// return whether the optional `noreply` flag is present.
fn parse_noreply(args: &[&str], fixed: usize) -> Result<bool> {
    match args.len().checked_sub(fixed) {
        None | Some(0) => Ok(false),
        Some(1) if args[fixed] == "noreply" => Ok(true),
        _ => Err(GateError::Framing("trailing arguments".to_string())),
    }
}

fn expect_args(args: &[&str], count: usize, verb: &str) -> Result<()> {
    if args.len() != count {
        return Err(GateError::Framing(format!("{verb} takes no arguments")));
    }
    Ok(())
}

// =============================================================================
// Response Encoding
// =============================================================================

/// Write one response to the stream.
///
/// Serialization itself cannot fail for well-formed `Response` values;
/// any error here is a transport failure. The caller flushes.
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    match response {
        Response::Values(values) => {
            for value in values {
                match value.cas_unique {
                    Some(cas) => write!(
                        writer,
                        "VALUE {} {} {} {}\r\n",
                        value.key,
                        value.flags,
                        value.data.len(),
                        cas
                    )?,
                    None => write!(
                        writer,
                        "VALUE {} {} {}\r\n",
                        value.key,
                        value.flags,
                        value.data.len()
                    )?,
                }
                writer.write_all(&value.data)?;
                writer.write_all(b"\r\n")?;
            }
            writer.write_all(b"END\r\n")?;
        }
        Response::Stored => writer.write_all(b"STORED\r\n")?,
        Response::NotStored => writer.write_all(b"NOT_STORED\r\n")?,
        Response::Exists => writer.write_all(b"EXISTS\r\n")?,
        Response::NotFound => writer.write_all(b"NOT_FOUND\r\n")?,
        Response::Deleted => writer.write_all(b"DELETED\r\n")?,
        Response::Touched => writer.write_all(b"TOUCHED\r\n")?,
        Response::Ok => writer.write_all(b"OK\r\n")?,
        Response::Number(n) => write!(writer, "{n}\r\n")?,
        Response::Version(ver) => write!(writer, "VERSION {ver}\r\n")?,
        Response::Error => writer.write_all(b"ERROR\r\n")?,
        Response::ClientError(reason) => write!(writer, "CLIENT_ERROR {reason}\r\n")?,
        Response::ServerError(reason) => write!(writer, "SERVER_ERROR {reason}\r\n")?,
    }
    Ok(())
}
