//! Worker pool serving proxied connections.
//!
//! Each worker loops on the shared connection queue: pop a connection, read
//! the request, check the host against the blacklist, then either serve the
//! blocked page or relay the upstream response. Every step is mirrored into
//! the log queue. Failures only ever abandon the connection at hand.
//!
//! The pool grows one worker at a time, when a connection arrives and no
//! worker looks idle, up to a fixed maximum. Workers never retire before
//! shutdown. The idle check reads each worker's `busy` flag without
//! synchronization, so the pool may occasionally grow one worker too many or
//! too few; only the queue carries correctness.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::blacklist::DomainBlacklist;
use crate::buffer::ByteAccumulator;
use crate::http::{MAX_LINE, RequestError, RequestLine, Target, blocked_response};
use crate::metrics::{REQUEST_FAILURES, REQUESTS_BLOCKED, REQUESTS_FORWARDED, WORKERS};
use crate::queue::BoundedQueue;
use crate::record::LogRecord;

/// An accepted client connection waiting to be served.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub const fn new(id: u64, stream: TcpStream, peer: SocketAddr) -> Self {
        Self { id, stream, peer }
    }

    #[inline]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Shut the socket down in both directions and release it.
    pub fn close(self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(id = self.id, %err, "connection already closed");
        }
    }
}

/// Reasons a connection is abandoned.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad request: {0}")]
    Request(#[from] RequestError),

    #[error("method {0} not implemented")]
    NotImplemented(String),

    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// How a connection was served.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Served {
    Blocked { uri: String },
    Forwarded { uri: String },
}

/// Everything a worker shares with the rest of the pipeline.
#[derive(Clone)]
pub struct WorkerContext {
    pub connections: Arc<BoundedQueue<Connection>>,
    pub logs: Arc<BoundedQueue<LogRecord>>,
    pub blacklist: Arc<DomainBlacklist>,
    /// Read/write timeout applied to client and upstream sockets.
    pub io_timeout: Duration,
}

impl WorkerContext {
    /// Queue a record for the loggers. Records refused by an exited queue
    /// are dropped.
    fn log(&self, record: LogRecord) {
        if let Err(record) = self.logs.push(record) {
            debug!(message = %record.message(), "log queue closed, record dropped");
        }
    }
}

struct Worker {
    uuid: u64,
    index: usize,
    busy: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A monotonically growing set of worker threads.
pub struct WorkerPool {
    context: WorkerContext,
    workers: Vec<Worker>,
    max_workers: usize,
    next_uuid: u64,
}

impl WorkerPool {
    /// Create an empty pool of at most `max_workers` workers.
    pub fn new(context: WorkerContext, max_workers: usize) -> Self {
        Self {
            context,
            workers: Vec::with_capacity(max_workers),
            max_workers,
            next_uuid: 0,
        }
    }

    /// Start one more worker.
    ///
    /// Returns `Ok(false)` when the pool is already at its maximum size.
    pub fn spawn(&mut self) -> io::Result<bool> {
        if self.workers.len() >= self.max_workers {
            return Ok(false);
        }

        let uuid = self.next_uuid;
        let index = self.workers.len();
        let busy = Arc::new(AtomicBool::new(false));

        let handle = {
            let context = self.context.clone();
            let busy = Arc::clone(&busy);
            thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || run_worker(uuid, index, &busy, &context))?
        };

        self.next_uuid += 1;
        self.workers.push(Worker {
            uuid,
            index,
            busy,
            handle,
        });

        metrics::gauge!(WORKERS).set(self.workers.len() as f64);
        debug!(uuid, index, "worker spawned");
        Ok(true)
    }

    /// Whether some worker is currently waiting for a connection.
    ///
    /// This is a racy snapshot: a worker may pick up or finish work right
    /// after its flag was read.
    pub fn has_idle_worker(&self) -> bool {
        self.workers
            .iter()
            .any(|worker| !worker.busy.load(Ordering::Relaxed))
    }

    /// Spawn a single worker if none looks idle and the pool may still grow.
    pub fn ensure_capacity(&mut self) -> io::Result<bool> {
        if self.has_idle_worker() {
            return Ok(false);
        }
        self.spawn()
    }

    /// Number of workers started so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    #[inline]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Wait for every worker to exit.
    ///
    /// Workers only exit once the connection queue stops handing out work,
    /// so the queue must have been exited first. Returns the number of
    /// workers joined.
    pub fn join(self) -> usize {
        let count = self.workers.len();
        for worker in self.workers {
            if worker.handle.join().is_err() {
                warn!(uuid = worker.uuid, index = worker.index, "worker panicked");
            }
        }
        metrics::gauge!(WORKERS).set(0.0);
        count
    }
}

fn run_worker(uuid: u64, index: usize, busy: &AtomicBool, context: &WorkerContext) {
    context.log(LogRecord::new(format!(
        "Worker {uuid} in worker queue {index} created"
    )));

    let mut acc = ByteAccumulator::new(256);

    loop {
        busy.store(false, Ordering::Relaxed);
        let Some(connection) = context.connections.pop() else {
            break;
        };
        busy.store(true, Ordering::Relaxed);

        handle_connection(context, connection, &mut acc);
    }

    context.log(LogRecord::new(format!(
        "Worker {uuid} in worker queue {index} exiting"
    )));
    busy.store(false, Ordering::Relaxed);
}

fn handle_connection(context: &WorkerContext, connection: Connection, acc: &mut ByteAccumulator) {
    let id = connection.id();
    let peer = connection.peer();

    context.log(LogRecord::new(format!("Got work for {id}")).with_peer(peer.ip()));
    context.log(
        LogRecord::new(format!(
            "Accepted connection from ({}, {})",
            peer.ip(),
            peer.port()
        ))
        .with_peer(peer.ip()),
    );

    let outcome = serve(context, &connection, acc);
    connection.close();

    match outcome {
        Ok(Served::Blocked { uri }) => {
            metrics::counter!(REQUESTS_BLOCKED).increment(1);
            context.log(
                LogRecord::new(format!("completed request {id}"))
                    .with_peer(peer.ip())
                    .with_uri(uri),
            );
        }
        Ok(Served::Forwarded { uri }) => {
            metrics::counter!(REQUESTS_FORWARDED).increment(1);
            context.log(
                LogRecord::new(format!("completed request {id}"))
                    .with_peer(peer.ip())
                    .with_uri(uri),
            );
        }
        Err(err) => {
            metrics::counter!(REQUEST_FAILURES).increment(1);
            debug!(id, %peer, error = %err, "request abandoned");
            context.log(
                LogRecord::new(format!("encountered issues with request {id}"))
                    .with_peer(peer.ip()),
            );
        }
    }
}

fn serve(
    context: &WorkerContext,
    connection: &Connection,
    acc: &mut ByteAccumulator,
) -> Result<Served, WorkerError> {
    let id = connection.id();
    let peer = connection.peer().ip();
    let mut client = &connection.stream;

    client.set_read_timeout(Some(context.io_timeout))?;
    client.set_write_timeout(Some(context.io_timeout))?;

    let mut reader = BufReader::new(client);
    let mut request_line = String::new();
    read_client_line(&mut reader, &mut request_line)?;
    let request = RequestLine::parse(&request_line)?;

    if !request.is_get() {
        context.log(
            LogRecord::new(format!("Method {} not implemented", request.method)).with_peer(peer),
        );
        return Err(WorkerError::NotImplemented(request.method));
    }

    // Headers are consumed and dropped; the upstream request is rebuilt.
    let mut header = String::new();
    loop {
        header.clear();
        if read_client_line(&mut reader, &mut header)? <= 2 {
            break;
        }
    }

    context.log(LogRecord::new(format!("Request headers: \n{request_line}")).with_peer(peer));

    let target = Target::parse(&request.uri)?;

    if let Some(rule) = context.blacklist.blocked_by(&target.host) {
        context.log(
            LogRecord::new(format!(
                "Blacklisted {} for our client {id} due to rule: {rule}",
                target.host
            ))
            .with_peer(peer),
        );
        client.write_all(blocked_response(&target.host).as_bytes())?;
        return Ok(Served::Blocked { uri: request.uri });
    }

    let upstream = match connect(&target, context.io_timeout) {
        Ok(upstream) => upstream,
        Err(source) => {
            context.log(
                LogRecord::new(format!(
                    "Cannot establish connection to {} for our client {id}. Reason: {source}",
                    target.host
                ))
                .with_peer(peer),
            );
            return Err(WorkerError::Connect {
                host: target.host,
                port: target.port,
                source,
            });
        }
    };

    context.log(
        LogRecord::new(format!(
            "Established connection to {} for our client {id}",
            target.host
        ))
        .with_peer(peer),
    );

    acc.reset();
    target.write_request(acc);
    (&upstream).write_all(&acc.flatten())?;

    acc.reset();
    let mut upstream_reader = BufReader::new(&upstream);
    let mut line = Vec::new();
    loop {
        line.clear();
        if upstream_reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        acc.append(&line);
        client.write_all(&line)?;
    }

    context.log(
        LogRecord::new(format!("sending payload for {id}"))
            .with_peer(peer)
            .with_uri(request.uri.as_str()),
    );
    context.log(
        LogRecord::from_bytes(acc.flatten())
            .with_peer(peer)
            .with_uri(request.uri.as_str())
            .with_payload_size(acc.len()),
    );

    Ok(Served::Forwarded { uri: request.uri })
}

/// Read one line of at most [`MAX_LINE`] bytes from the client.
fn read_client_line<R: BufRead>(reader: &mut R, line: &mut String) -> Result<usize, WorkerError> {
    let read = reader.by_ref().take(MAX_LINE as u64).read_line(line)?;
    if read == MAX_LINE && !line.ends_with('\n') {
        return Err(RequestError::LineTooLong(MAX_LINE).into());
    }
    Ok(read)
}

/// Open the upstream connection, trying every resolved address in turn.
fn connect(target: &Target, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;

    for addr in (target.host.as_str(), target.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return Ok(stream);
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
    }))
}
