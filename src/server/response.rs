//! Response writing.
//!
//! [`ResponseWriter`] buffers status and headers until the first body byte
//! is written, then emits the head exactly once. It can target a live
//! connection or an in-memory buffer, which is what the dispatch tests use.

use crate::error::{Error, Result};
use may::net::TcpStream;
use std::io::{self, Write};

enum Target {
    Stream(TcpStream),
    Buffer(Vec<u8>),
    /// Stream handed over to a WebSocket upgrade.
    Taken,
}

pub struct ResponseWriter {
    target: Target,
    status: u16,
    headers: Vec<(String, String)>,
    head_written: bool,
}

impl ResponseWriter {
    /// Writer backed by a live connection.
    #[must_use]
    pub fn stream(stream: TcpStream) -> Self {
        Self::with_target(Target::Stream(stream))
    }

    /// Writer backed by an in-memory buffer, for tests and dry runs.
    #[must_use]
    pub fn buffer() -> Self {
        Self::with_target(Target::Buffer(Vec::new()))
    }

    fn with_target(target: Target) -> Self {
        ResponseWriter {
            target,
            status: 200,
            headers: Vec::new(),
            head_written: false,
        }
    }

    /// Set the response status. Ignored once the head has been written.
    pub fn set_status(&mut self, status: u16) {
        if !self.head_written {
            self.status = status;
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// True once status and headers have hit the wire.
    #[must_use]
    pub fn committed(&self) -> bool {
        self.head_written
    }

    /// Replace a header, or set it if absent.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            existing.1 = value.to_string();
        } else {
            self.add_header(name, value);
        }
    }

    /// Append a header, keeping any existing values with the same name.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Take the underlying stream for a protocol upgrade.
    ///
    /// Fails if the response head already went out or the writer is not
    /// backed by a connection.
    pub fn take_stream(&mut self) -> Result<TcpStream> {
        if self.head_written {
            return Err(Error::UpgradeRejected(
                "response already committed".to_string(),
            ));
        }
        match std::mem::replace(&mut self.target, Target::Taken) {
            Target::Stream(stream) => Ok(stream),
            other => {
                self.target = other;
                Err(Error::UpgradeRejected(
                    "no connection to upgrade".to_string(),
                ))
            }
        }
    }

    /// Write the head if it has not gone out yet. Called at the end of the
    /// lifecycle so header-only responses still produce a valid reply.
    pub fn finish(&mut self) -> io::Result<()> {
        self.ensure_head()?;
        self.flush()
    }

    /// Response bytes accumulated so far, for buffer-backed writers.
    #[must_use]
    pub fn buffered(&self) -> Option<&[u8]> {
        match &self.target {
            Target::Buffer(buf) => Some(buf),
            _ => None,
        }
    }

    fn ensure_head(&mut self) -> io::Result<()> {
        if self.head_written {
            return Ok(());
        }
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            status_reason(self.status)
        );
        if !self.has_header("content-type") {
            head.push_str("Content-Type: text/html; charset=utf-8\r\n");
        }
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        // Bodies are close-delimited; no Content-Length, no keep-alive.
        head.push_str("Connection: close\r\n\r\n");
        self.head_written = true;
        self.write_raw(head.as_bytes())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.target {
            Target::Stream(stream) => stream.write_all(bytes),
            Target::Buffer(buf) => {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            Target::Taken => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection was upgraded",
            )),
        }
    }
}

impl Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_head()?;
        self.write_raw(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.target {
            Target::Stream(stream) => stream.flush(),
            _ => Ok(()),
        }
    }
}

#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
