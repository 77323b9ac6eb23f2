//! Connection Handler
//!
//! One worker per client connection: decode a request, dispatch it, write
//! the response, repeat until clean EOF, an unrecoverable transport error,
//! `quit`, or shutdown.

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::dispatch::Dispatcher;
use crate::error::{GateError, Result};
use crate::protocol::{read_request, write_response, Decoded, Request, Response};

/// How often the watchdog re-checks its flags
const WATCHDOG_POLL: Duration = Duration::from_millis(100);

/// Handles a single client connection
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,

    dispatcher: Arc<Dispatcher>,

    /// Process-wide shutdown flag, observed between requests
    shutdown: Arc<AtomicBool>,

    /// Raised when this connection is finished, retiring its watchdog
    done: Arc<AtomicBool>,

    /// Peer address for logging
    peer_addr: String,

    /// Verbose per-request error logging
    debug: bool,
}

impl Connection {
    /// Create a new connection handler.
    ///
    /// Spawns a watchdog that force-closes the socket `grace` after the
    /// shutdown flag is raised, so a worker blocked on a read cannot
    /// outlive the drain period.
    pub fn new(
        stream: TcpStream,
        dispatcher: Arc<Dispatcher>,
        shutdown: Arc<AtomicBool>,
        grace: Duration,
        debug: bool,
    ) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        let done = Arc::new(AtomicBool::new(false));
        spawn_watchdog(
            read_stream.try_clone()?,
            Arc::clone(&shutdown),
            Arc::clone(&done),
            grace,
            peer_addr.clone(),
        );

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            dispatcher,
            shutdown,
            done,
            peer_addr,
            debug,
        })
    }

    /// Serve the connection until it ends (blocking).
    ///
    /// Returns `Ok(())` for every orderly outcome: clean EOF, `quit`, or
    /// shutdown. Only unexpected transport failures surface as errors.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("connected: {}", self.peer_addr);

        loop {
            let request = match read_request(&mut self.reader) {
                Ok(Decoded::Request(req)) => req,
                Ok(Decoded::Eof) => {
                    tracing::debug!("disconnected: {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    // Framing or client error: answer and keep reading
                    if self.debug {
                        tracing::debug!("read error: {} {}", self.peer_addr, e);
                    }
                    let reply = match e {
                        GateError::Client(reason) => Response::ClientError(reason),
                        _ => Response::Error,
                    };
                    self.send(&reply)?;
                    continue;
                }
                Err(e) => {
                    // Forced close during shutdown arrives here as an I/O error
                    if self.shutdown.load(Ordering::Relaxed) {
                        tracing::debug!("closed during shutdown: {}", self.peer_addr);
                        return Ok(());
                    }
                    return Err(e);
                }
            };

            if self.shutdown.load(Ordering::Relaxed) {
                self.send(&Response::ServerError("shutting down".to_string()))?;
                return Ok(());
            }

            if matches!(request, Request::Quit) {
                tracing::debug!("quit: {}", self.peer_addr);
                return Ok(());
            }

            let noreply = request.noreply();
            let response = self.dispatcher.execute(request);

            if noreply {
                // The noreply contract suppresses the response entirely;
                // keep a trace of swallowed failures for diagnosis
                if self.debug && response.is_error() {
                    tracing::debug!(
                        "suppressed error for {}: {:?}",
                        self.peer_addr,
                        response
                    );
                }
                continue;
            }

            self.send(&response)?;
        }
    }

    fn send(&mut self, response: &Response) -> Result<()> {
        write_response(&mut self.writer, response)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
    }
}

/// Watchdog thread: once shutdown is signalled, give in-flight work the
/// grace period, then tear the socket down so blocked reads return.
/// Retires quietly when the connection finishes on its own.
fn spawn_watchdog(
    stream: TcpStream,
    shutdown: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    grace: Duration,
    peer: String,
) {
    std::thread::Builder::new()
        .name("memgate-watchdog".to_string())
        .spawn(move || loop {
            if done.load(Ordering::Relaxed) {
                return;
            }
            if shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(grace);
                if !done.load(Ordering::Relaxed) {
                    tracing::debug!("force-closing {} after drain grace", peer);
                    let _ = stream.shutdown(Shutdown::Both);
                }
                return;
            }
            std::thread::sleep(WATCHDOG_POLL);
        })
        .ok();
}
