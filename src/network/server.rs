//! TCP Server
//!
//! Accepts connections and hands each one to a worker thread. Shutdown is
//! cooperative: the accept loop stops admitting connections as soon as the
//! flag is raised, in-flight workers get the configured drain grace, and
//! their watchdogs force-close anything still blocked after that.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{GateError, Result};
use super::Connection;

/// How long the accept loop dozes when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// TCP server for the gateway
pub struct Server {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listen socket without starting to serve
    pub fn bind(config: Config, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        // Non-blocking accept so the loop can observe the shutdown flag
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            dispatcher,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address the listener actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops the accept loop and begins the drain
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Serve until shutdown is signalled (blocking).
    ///
    /// Fatal listener errors end the loop; per-connection errors only end
    /// their own worker.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!("listening on {}", self.config.listen_addr);

        let grace = self.config.drain_grace();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    workers.retain(|h| !h.is_finished());
                    if workers.len() >= self.config.max_connections {
                        tracing::warn!("connection limit reached, refusing {peer}");
                        drop(stream);
                        continue;
                    }

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let shutdown = Arc::clone(&self.shutdown);
                    let debug = self.config.debug;
                    let handle = std::thread::Builder::new()
                        .name(format!("memgate-conn-{peer}"))
                        .spawn(move || {
                            match Connection::new(stream, dispatcher, shutdown, grace, debug) {
                                Ok(mut conn) => {
                                    if let Err(e) = conn.handle() {
                                        tracing::warn!("connection error: {} {}", conn.peer_addr(), e);
                                    }
                                }
                                Err(e) => tracing::warn!("failed to set up connection: {e}"),
                            }
                        })
                        .map_err(GateError::Io)?;
                    workers.push(handle);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::error!("listener failed: {e}");
                    self.shutdown.store(true, Ordering::Relaxed);
                    self.drain(workers);
                    return Err(GateError::Io(e));
                }
            }
        }

        tracing::info!("shutting down, draining {} connection(s)", workers.len());
        self.drain(workers);
        Ok(())
    }

    /// Wait for workers to finish, bounded by the grace period plus the
    /// watchdogs' force-close margin.
    fn drain(&self, workers: Vec<JoinHandle<()>>) {
        let deadline = Instant::now() + self.config.drain_grace() + Duration::from_secs(1);
        for handle in workers {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("worker did not stop within the drain window");
            }
        }
        tracing::info!("drain complete");
    }
}
