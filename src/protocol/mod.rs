//! Protocol Module
//!
//! The memcached text wire protocol: line-oriented, whitespace-delimited
//! command lines, CRLF-terminated data blocks.
//!
//! ## Request Format
//! ```text
//! <verb> <key> [<flags> <exptime> <bytes> [<cas_unique>]] [noreply]\r\n
//! [<bytes> bytes of payload]\r\n
//! ```
//!
//! ## Response Tokens
//! - `STORED` / `NOT_STORED` / `EXISTS` / `NOT_FOUND` / `DELETED` / `TOUCHED`
//! - `VALUE <key> <flags> <bytes> [<cas_unique>]` + data, terminated by `END`
//! - `OK`, `VERSION <ver>`, numeric counter results
//! - `ERROR`, `CLIENT_ERROR <reason>`, `SERVER_ERROR <reason>`

mod command;
mod response;
mod codec;

pub use command::{CounterVerb, Request, StoreVerb};
pub use response::{Response, Value};
pub use codec::{read_request, write_response, Decoded, MAX_ITEM_SIZE, MAX_KEY_LEN};
