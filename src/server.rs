//! Listener orchestration.
//!
//! The accept loop polls a non-blocking listener so it can notice a
//! termination request between connections, then hands each accepted
//! stream to the [`Pipeline`].

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::metrics::CONNECTIONS_ACCEPTED;
use crate::pipeline::Pipeline;
use crate::pool::Connection;

/// Counts termination requests.
///
/// The first request asks the accept loop to stop. What happens on later
/// ones is up to the signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicUsize>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request and return how many came before it.
    pub fn request(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

/// Route SIGINT/SIGTERM into `signal`.
///
/// The first signal starts a graceful shutdown. A second one exits the
/// process immediately.
pub fn install_signal_handler(signal: ShutdownSignal) -> Result<()> {
    ctrlc::set_handler(move || {
        if signal.request() == 0 {
            warn!("termination request accepted. Closing server...");
        } else {
            warn!("Server force terminated");
            std::process::exit(0);
        }
    })?;
    Ok(())
}

/// Accepts client connections and feeds them to a pipeline.
#[derive(Debug)]
pub struct ProxyServer {
    listener: TcpListener,
    poll_interval: Duration,
    connection_limit: Option<usize>,
    next_id: u64,
}

impl ProxyServer {
    /// Bind a listener on `addr`.
    pub fn bind(addr: SocketAddr, poll_interval: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            poll_interval,
            connection_limit: None,
            next_id: 0,
        })
    }

    /// Bind using the listen address and polling settings from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::bind(config.listen, config.pool.accept_poll())?
            .with_connection_limit(config.pool.connection_limit))
    }

    /// Stop accepting after `limit` connections.
    pub fn with_connection_limit(mut self, limit: Option<usize>) -> Self {
        self.connection_limit = limit;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `signal` is raised or the connection
    /// limit is reached. Returns the number of connections accepted.
    pub fn serve(&mut self, pipeline: &mut Pipeline, signal: &ShutdownSignal) -> usize {
        let addr = self.local_addr().ok();
        info!(?addr, "accepting connections");

        let mut accepted = 0usize;
        while !signal.is_requested() {
            if self.connection_limit.is_some_and(|limit| accepted >= limit) {
                info!(accepted, "connection limit reached");
                break;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // Workers rely on blocking reads with timeouts.
                    if let Err(err) = stream.set_nonblocking(false) {
                        warn!(%peer, %err, "dropping connection");
                        continue;
                    }

                    let id = self.next_id;
                    self.next_id += 1;
                    accepted += 1;
                    metrics::counter!(CONNECTIONS_ACCEPTED).increment(1);
                    debug!(id, %peer, "connection accepted");

                    if let Err(connection) = pipeline.submit(Connection::new(id, stream, peer)) {
                        warn!(id, "pipeline refused connection");
                        connection.close();
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.poll_interval);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(%err, "accept failed");
                    thread::sleep(self.poll_interval);
                }
            }
        }

        info!(accepted, "stopped accepting connections");
        accepted
    }
}
