//! Records flowing through the logging pipeline.
//!
//! Workers produce [`LogRecord`]s; loggers render them into
//! [`FileWriteRecord`]s, which the file writer persists verbatim.
//!
//! # Entry format
//!
//! ```text
//! [Sun 27 Oct 2002 02:51:02 +00:00] 128.2.111.38 http://www.example.com/ [payload size: 34314] message
//! ```
//!
//! The peer address, URI and payload size are only present when set.
//! Multi-line messages are written as one indented continuation line per
//! message line:
//!
//! ```text
//! [Sun 27 Oct 2002 02:51:02 +00:00] 128.2.111.38
//!  -  Request headers:
//!  -  GET http://www.example.com/ HTTP/1.1
//! ```

use std::borrow::Cow;
use std::fmt::Write as _;
use std::net::IpAddr;

use chrono::{DateTime, Local};

use crate::buffer::ByteAccumulator;

/// Timestamp layout of a persisted log entry.
pub const TIMESTAMP_FORMAT: &str = "%a %d %b %Y %H:%M:%S %Z";

const CONTINUATION: &str = "\n -  ";

/// A single activity record produced by a worker or the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    message: Vec<u8>,
    timestamp: DateTime<Local>,
    peer: Option<IpAddr>,
    uri: Option<String>,
    payload_size: Option<usize>,
}

impl LogRecord {
    /// Create a record stamped with the current local time.
    pub fn new(message: impl Into<String>) -> Self {
        Self::from_bytes(message.into().into_bytes())
    }

    /// Create a record whose message is raw bytes, such as a relayed
    /// response. The bytes are persisted unchanged.
    pub fn from_bytes(message: impl Into<Vec<u8>>) -> Self {
        Self {
            message: message.into(),
            timestamp: Local::now(),
            peer: None,
            uri: None,
            payload_size: None,
        }
    }

    /// Attach the client address.
    #[must_use]
    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Attach the request URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Attach the size of the relayed payload.
    #[must_use]
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = Some(size);
        self
    }

    /// Override the creation time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The message, with invalid UTF-8 replaced.
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    pub fn message_bytes(&self) -> &[u8] {
        &self.message
    }

    pub const fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub const fn peer(&self) -> Option<IpAddr> {
        self.peer
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub const fn payload_size(&self) -> Option<usize> {
        self.payload_size
    }

    /// Render the persisted entry into `acc`.
    pub fn format_into(&self, acc: &mut ByteAccumulator) {
        // Writing into an accumulator never fails.
        let _ = write!(acc, "[{}]", self.timestamp.format(TIMESTAMP_FORMAT));

        if let Some(peer) = self.peer {
            let _ = write!(acc, " {peer}");
        }
        if let Some(uri) = &self.uri {
            acc.append_str(" ");
            acc.append_str(uri);
        }
        acc.append_str(" ");

        if let Some(size) = self.payload_size.filter(|&size| size > 0) {
            let _ = write!(acc, "[payload size: {size}] ");
        }

        if !self.message.contains(&b'\n') {
            acc.append(&self.message);
            acc.append_str("\n");
            return;
        }

        // A trailing newline does not open an extra continuation line.
        let body = self.message.strip_suffix(b"\n").unwrap_or(&self.message);
        for line in body.split(|&b| b == b'\n') {
            acc.append_str(CONTINUATION);
            acc.append(line);
        }
        acc.append_str("\n");
    }

    /// Render the persisted entry as a [`FileWriteRecord`], reusing `acc`.
    pub fn render(&self, acc: &mut ByteAccumulator) -> FileWriteRecord {
        acc.reset();
        self.format_into(acc);
        FileWriteRecord::new(acc.flatten())
    }
}

/// A chunk of bytes bound for the persisted log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWriteRecord {
    content: Vec<u8>,
    /// Number of bytes to write. Zero means the whole content.
    length: usize,
}

impl FileWriteRecord {
    /// Write all of `content`.
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            length: 0,
        }
    }

    /// Write only the first `length` bytes of `content`.
    pub fn with_length(content: impl Into<Vec<u8>>, length: usize) -> Self {
        Self {
            content: content.into(),
            length,
        }
    }

    /// The bytes to persist.
    pub fn bytes(&self) -> &[u8] {
        match self.length {
            0 => &self.content,
            length => &self.content[..length.min(self.content.len())],
        }
    }
}

impl From<String> for FileWriteRecord {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for FileWriteRecord {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}
