//! Minimal HTTP/1.x helpers for the forwarding path.
//!
//! Only what a GET-forwarding proxy needs: parsing the request line and the
//! absolute URI it carries, rebuilding the upstream request, and the page
//! served for blocked hosts.

use std::fmt::Write as _;

use crate::buffer::ByteAccumulator;

/// User agent announced to upstream servers.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3";

/// Port used when the URI does not name one.
pub const DEFAULT_PORT: u16 = 80;

/// Longest request or header line accepted from a client.
pub const MAX_LINE: usize = 8192;

const SCHEME: &str = "http://";
const HOST_TERMINATORS: &[char] = &[' ', ':', '/', '\r', '\n'];

/// Errors raised while reading a client request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("empty request line")]
    EmptyRequestLine,

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("unsupported URI (only absolute http:// URIs are proxied): {0:?}")]
    UnsupportedUri(String),

    #[error("URI has no host: {0:?}")]
    MissingHost(String),

    #[error("invalid port in URI: {0:?}")]
    InvalidPort(String),

    #[error("request line longer than {0} bytes")]
    LineTooLong(usize),
}

/// The first line of an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

impl RequestLine {
    /// Split `METHOD URI VERSION`. A missing version is tolerated.
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let mut parts = line.split_whitespace();

        let method = parts.next().ok_or(RequestError::EmptyRequestLine)?;
        let uri = parts
            .next()
            .ok_or_else(|| RequestError::MalformedRequestLine(line.trim_end().to_string()))?;
        let version = parts.next().unwrap_or_default();

        Ok(Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
        })
    }

    #[inline]
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// Where a proxied request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Lowercased host name.
    pub host: String,
    pub port: u16,
    /// Path and query, always starting with `/`.
    pub path: String,
}

impl Target {
    /// Parse an absolute `http://host[:port][/path]` URI.
    ///
    /// # Example
    ///
    /// ```
    /// use bluegate::http::Target;
    ///
    /// let target = Target::parse("HTTP://Example.COM:8080/a?b=c").unwrap();
    /// assert_eq!(target.host, "example.com");
    /// assert_eq!(target.port, 8080);
    /// assert_eq!(target.path, "/a?b=c");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, RequestError> {
        let rest = uri
            .get(..SCHEME.len())
            .filter(|scheme| scheme.eq_ignore_ascii_case(SCHEME))
            .map(|_| &uri[SCHEME.len()..])
            .ok_or_else(|| RequestError::UnsupportedUri(uri.to_string()))?;

        let host_end = rest.find(HOST_TERMINATORS).unwrap_or(rest.len());
        let host = &rest[..host_end];
        if host.is_empty() {
            return Err(RequestError::MissingHost(uri.to_string()));
        }

        let port = match rest[host_end..].strip_prefix(':') {
            Some(after) => {
                let digits = after
                    .find(|c: char| !c.is_ascii_digit())
                    .map_or(after, |end| &after[..end]);
                digits
                    .parse()
                    .map_err(|_| RequestError::InvalidPort(uri.to_string()))?
            }
            None => DEFAULT_PORT,
        };

        let path = rest
            .find('/')
            .map_or("/", |start| rest[start..].trim_end_matches(['\r', '\n']));

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
            path: path.to_string(),
        })
    }

    /// `host` or `host:port` when the port is not the default one.
    pub fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Append the HTTP/1.0 request sent upstream.
    pub fn write_request(&self, acc: &mut ByteAccumulator) {
        let _ = write!(acc, "GET {} HTTP/1.0\r\n", self.path);
        let _ = write!(acc, "Host: {}\r\n", self.authority());
        let _ = write!(acc, "User-Agent: {USER_AGENT}\r\n");
        acc.append_str("Connection: close\r\n");
        acc.append_str("Proxy-Connection: close\r\n\r\n");
    }
}

/// Build the full HTTP response served in place of a blocked host.
pub fn blocked_response(host: &str) -> String {
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>\nBlocked\n</title>\n</head>\n<body>\n{host} has been blocked by the proxy server\n</body>\n</html>\n"
    );
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{html}",
        html.len()
    )
}
