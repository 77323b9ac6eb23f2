//! memgate Server Binary
//!
//! Starts the gateway daemon: memcached text protocol on the listen
//! address, backed by the bundled in-memory store and lock service.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use memgate::backend::MemoryBackend;
use memgate::lock::{LockCoordinator, MemoryLockService};
use memgate::network::Server;
use memgate::{Config, Dispatcher};

/// memgate Server
#[derive(Parser, Debug)]
#[command(name = "memgate-server")]
#[command(about = "memcached text-protocol gateway over a shared key-value backend")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:11211", env = "MEMGATE_LISTEN")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Lock acquisition timeout in milliseconds
    #[arg(long, default_value = "2000")]
    lock_timeout_ms: u64,

    /// Shutdown drain grace period in milliseconds
    #[arg(long, default_value = "1000")]
    drain_grace_ms: u64,

    /// Verbose per-request error logging
    #[arg(short, long, env = "MEMGATE_DEBUG")]
    debug: bool,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,memgate=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("memgate v{}", memgate::VERSION);
    tracing::info!("listen address: {}", args.listen);

    let config = Config::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .lock_timeout_ms(args.lock_timeout_ms)
        .drain_grace_ms(args.drain_grace_ms)
        .debug(args.debug)
        .build();

    let backend = Arc::new(MemoryBackend::new());
    let locks = LockCoordinator::new(Arc::new(MemoryLockService::new()), config.lock_timeout());
    let dispatcher = Arc::new(Dispatcher::new(backend, locks));

    let mut server = match Server::bind(config, dispatcher) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to bind: {e}");
            std::process::exit(1);
        }
    };

    // SIGINT/SIGTERM raise the shutdown flag; the accept loop and the
    // connection watchdogs take it from there
    let shutdown = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("signal caught, initiating shutdown");
        shutdown.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!("could not install signal handler: {e}");
    }

    if let Err(e) = server.run() {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }

    tracing::info!("exited");
}
