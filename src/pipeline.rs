//! Three-stage processing pipeline.
//!
//! ```text
//! connections ──▶ [worker pool] ──▶ logs ──▶ [loggers] ──▶ writes ──▶ [file writer]
//! ```
//!
//! Each arrow is a [`BoundedQueue`]. Consumers stop when their queue hands
//! out `None`, and loggers and the file writer leave a final line in the
//! persisted log when they do.
//!
//! [`Pipeline::shutdown`] tears the stages down upstream first, so no queue
//! is exited while something may still push into it:
//!
//! 1. the caller has stopped accepting connections
//! 2. exit the connection queue, waiting up to the drain timeout, and close
//!    every connection left in it
//! 3. join the workers
//! 4. exit the log queue once drained
//! 5. join the loggers
//! 6. exit the write queue once drained
//! 7. join the file writer
//! 8. release the three queues

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::blacklist::DomainBlacklist;
use crate::buffer::ByteAccumulator;
use crate::config::PoolSettings;
use crate::metrics::CONNECTIONS_ABANDONED;
use crate::pool::{Connection, WorkerContext, WorkerPool};
use crate::queue::{BoundedQueue, DrainPolicy};
use crate::record::{FileWriteRecord, LogRecord};

/// Final line written by the file writer.
pub const WRITER_EXITED: &str = "end of write log\n";

/// Sizing and timing of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub max_workers: usize,
    pub loggers: usize,
    pub drain_timeout: Duration,
    pub io_timeout: Duration,
}

impl From<&PoolSettings> for PipelineSettings {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            max_workers: settings.max_workers,
            loggers: settings.loggers,
            drain_timeout: settings.drain_timeout(),
            io_timeout: settings.io_timeout(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

/// What [`Pipeline::shutdown`] found while tearing down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued connections closed without being served.
    pub abandoned: usize,
    /// Workers joined.
    pub workers: usize,
    /// Loggers joined.
    pub loggers: usize,
    /// Bytes persisted by the file writer.
    pub bytes_written: u64,
}

/// The running connection, logging and writing stages.
pub struct Pipeline {
    connections: Arc<BoundedQueue<Connection>>,
    logs: Arc<BoundedQueue<LogRecord>>,
    writes: Arc<BoundedQueue<FileWriteRecord>>,
    workers: WorkerPool,
    loggers: Vec<JoinHandle<()>>,
    writer: JoinHandle<u64>,
    drain_timeout: Duration,
}

impl Pipeline {
    /// Start the file writer, the loggers and a first worker.
    ///
    /// Everything the loggers produce is written to `sink`.
    pub fn start<W>(
        settings: PipelineSettings,
        blacklist: Arc<DomainBlacklist>,
        sink: W,
    ) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let connections = Arc::new(BoundedQueue::new(settings.queue_capacity));
        let logs = Arc::new(BoundedQueue::new(settings.queue_capacity));
        let writes = Arc::new(BoundedQueue::new(settings.queue_capacity));

        let writer = {
            let writes = Arc::clone(&writes);
            thread::Builder::new()
                .name("file-writer".into())
                .spawn(move || run_file_writer(&writes, sink))?
        };

        let mut loggers = Vec::with_capacity(settings.loggers);
        for index in 0..settings.loggers {
            let spawned = {
                let logs = Arc::clone(&logs);
                let writes = Arc::clone(&writes);
                thread::Builder::new()
                    .name(format!("logger-{index}"))
                    .spawn(move || run_logger(index, &logs, &writes))
            };
            match spawned {
                Ok(logger) => loggers.push(logger),
                Err(err) => {
                    stop_started(&logs, &writes, loggers, writer);
                    return Err(err);
                }
            }
        }

        let mut workers = WorkerPool::new(
            WorkerContext {
                connections: Arc::clone(&connections),
                logs: Arc::clone(&logs),
                blacklist,
                io_timeout: settings.io_timeout,
            },
            settings.max_workers,
        );
        if let Err(err) = workers.spawn() {
            connections.exit(DrainPolicy::Immediate);
            stop_started(&logs, &writes, loggers, writer);
            return Err(err);
        }

        info!(
            loggers = settings.loggers,
            max_workers = settings.max_workers,
            queue_capacity = settings.queue_capacity,
            "pipeline started"
        );

        Ok(Self {
            connections,
            logs,
            writes,
            workers,
            loggers,
            writer,
            drain_timeout: settings.drain_timeout,
        })
    }

    /// Hand a connection to the workers, growing the pool first when every
    /// worker looks busy.
    ///
    /// Blocks while the connection queue is full. The connection is handed
    /// back if the queue no longer accepts work.
    pub fn submit(&mut self, connection: Connection) -> Result<(), Connection> {
        match self.workers.ensure_capacity() {
            Ok(true) => info!(workers = self.workers.len(), "worker pool grown"),
            Ok(false) => {}
            Err(err) => warn!(%err, "failed to spawn worker"),
        }
        self.connections.push(connection)
    }

    /// Queue a record for the loggers.
    pub fn log(&self, record: LogRecord) {
        if let Err(record) = self.logs.push(record) {
            debug!(message = %record.message(), "log queue closed, record dropped");
        }
    }

    /// Queue raw bytes for the file writer, bypassing the loggers.
    pub fn write(&self, record: impl Into<FileWriteRecord>) {
        if self.writes.push(record.into()).is_err() {
            debug!("write queue closed, record dropped");
        }
    }

    /// Number of workers started so far.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Connections waiting for a worker.
    pub fn pending_connections(&self) -> usize {
        self.connections.len()
    }

    /// Tear the pipeline down stage by stage.
    pub fn shutdown(self) -> ShutdownReport {
        let Self {
            connections,
            logs,
            writes,
            workers,
            loggers,
            writer,
            drain_timeout,
        } = self;

        info!(
            pending = connections.len(),
            timeout_ms = drain_timeout.as_millis() as u64,
            "waiting for connections to finish"
        );
        let leftovers = connections.exit(DrainPolicy::Timeout(drain_timeout));
        let abandoned = leftovers.len();
        if abandoned > 0 {
            info!(abandoned, "closing remaining connections");
            metrics::counter!(CONNECTIONS_ABANDONED).increment(abandoned as u64);
        }
        for connection in leftovers {
            connection.close();
        }

        let worker_count = workers.join();
        info!(workers = worker_count, "workers exited");

        let logger_count = loggers.len();
        info!(loggers = logger_count, "closing loggers");
        drop_unlogged(logs.exit(DrainPolicy::Infinite));
        for logger in loggers {
            if logger.join().is_err() {
                warn!("logger panicked");
            }
        }

        info!("closing file writer");
        let unwritten = writes.exit(DrainPolicy::Infinite);
        if !unwritten.is_empty() {
            warn!(records = unwritten.len(), "records left unwritten");
        }
        let bytes_written = writer.join().unwrap_or_else(|_| {
            warn!("file writer panicked");
            0
        });

        for released in [connections.release(), logs.release(), writes.release()] {
            if let Err(err) = released {
                warn!(%err, "queue release refused");
            }
        }

        info!(abandoned, bytes_written, "pipeline stopped");
        ShutdownReport {
            abandoned,
            workers: worker_count,
            loggers: logger_count,
            bytes_written,
        }
    }
}

/// Stop the loggers and file writer launched by a [`Pipeline::start`] that
/// failed halfway.
fn stop_started(
    logs: &BoundedQueue<LogRecord>,
    writes: &BoundedQueue<FileWriteRecord>,
    loggers: Vec<JoinHandle<()>>,
    writer: JoinHandle<u64>,
) {
    warn!(loggers = loggers.len(), "pipeline start failed, stopping started stages");

    drop_unlogged(logs.exit(DrainPolicy::Immediate));
    for logger in loggers {
        if logger.join().is_err() {
            warn!("logger panicked");
        }
    }

    writes.exit(DrainPolicy::Infinite);
    if writer.join().is_err() {
        warn!("file writer panicked");
    }
}

fn drop_unlogged(records: Vec<LogRecord>) {
    if !records.is_empty() {
        warn!(records = records.len(), "log records dropped at shutdown");
    }
}

fn run_logger(
    index: usize,
    logs: &BoundedQueue<LogRecord>,
    writes: &BoundedQueue<FileWriteRecord>,
) {
    let forward = |record: FileWriteRecord| {
        if writes.push(record).is_err() {
            debug!(index, "write queue closed, entry dropped");
        }
    };

    forward(FileWriteRecord::from(format!("logger {index} started\n")));

    let mut acc = ByteAccumulator::new(256);
    while let Some(record) = logs.pop() {
        forward(record.render(&mut acc));
    }

    forward(FileWriteRecord::from(format!("logger {index} exited\n")));
    debug!(index, "logger exited");
}

fn run_file_writer<W: Write>(writes: &BoundedQueue<FileWriteRecord>, mut sink: W) -> u64 {
    let mut written = 0u64;
    let mut persist = |bytes: &[u8]| match sink.write_all(bytes).and_then(|()| sink.flush()) {
        Ok(()) => written += bytes.len() as u64,
        Err(err) => warn!(%err, "failed to write log entry"),
    };

    while let Some(record) = writes.pop() {
        persist(record.bytes());
    }
    persist(WRITER_EXITED.as_bytes());

    debug!(written, "file writer exited");
    written
}
