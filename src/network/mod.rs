//! Network Module
//!
//! TCP accept loop and per-connection workers.
//!
//! ## Architecture
//! - Single acceptor thread, gated on a shutdown flag
//! - One worker thread per client connection
//! - Workers share nothing in-process; every request goes through the
//!   Dispatcher to the backend
//! - Shutdown drains in-flight connections for a bounded grace period,
//!   then force-closes their sockets

mod server;
mod connection;

pub use server::Server;
pub use connection::Connection;
