//! # memgate
//!
//! A memcached text-protocol gateway over a shared key-value backend:
//! - Speaks the memcached text wire protocol to clients
//! - Translates every command into operations on a remote key-value store
//! - Uses a distributed lock service to make compound operations
//!   (add, cas, incr/decr, ...) atomic across gateway instances
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │              (one worker per connection)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ read_request / write_response
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Dispatcher                                │
//! │        (verb → backend ops, lock-guarded when compound)      │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!     ┌─────────────┐               ┌──────────────┐
//!     │   Backend   │               │ Lock Service │
//!     │ (shared KV) │               │ (per-key)    │
//!     └─────────────┘               └──────────────┘
//! ```
//!
//! The gateway holds no cache of its own; the backend is the single source
//! of truth, and the only serialization point between gateway instances is
//! the per-key lock lease.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod backend;
pub mod lock;
pub mod dispatch;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{GateError, Result};
pub use config::Config;
pub use dispatch::Dispatcher;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of memgate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
