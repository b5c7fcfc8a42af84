//! Origin fetch client.
//!
//! One request per connection: `GET` with only a `Host` header, read until
//! the origin closes, take everything after the first blank line as the
//! body. Status codes and response headers are not interpreted.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{CacheError, Result};
use crate::origin::OriginAddr;

/// Allowance for the status line and headers on top of the size limit.
pub const MAX_HEADER_BYTES: u64 = 8192;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

// == Origin Client ==
#[derive(Debug, Clone, Default)]
pub struct OriginClient {
    /// Connect and read timeout; `None` blocks indefinitely
    timeout: Option<Duration>,
}

impl OriginClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    // == Fetch ==
    /// Fetches `resource_path` from `origin` and returns the response body.
    pub fn fetch(
        &self,
        origin: &OriginAddr,
        resource_path: &str,
        size_limit: u64,
    ) -> Result<Vec<u8>> {
        let addrs: Vec<SocketAddr> = (origin.host.as_str(), origin.port)
            .to_socket_addrs()
            .map_err(|e| {
                CacheError::OriginUnreachable(format!("cannot resolve {}: {}", origin.host, e))
            })?
            .collect();
        if addrs.is_empty() {
            return Err(CacheError::OriginUnreachable(format!("no addresses for {}", origin.host)));
        }

        let mut stream = self.connect(origin, &addrs)?;
        stream.set_read_timeout(self.timeout).map_err(|e| {
            CacheError::OriginUnreachable(format!("cannot configure socket: {}", e))
        })?;

        let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", resource_path, origin.raw);
        debug!("Requesting {} from origin {}", resource_path, origin);
        stream.write_all(request.as_bytes()).map_err(|e| {
            CacheError::OriginUnreachable(format!("cannot send request to {}: {}", origin, e))
        })?;

        let bound = size_limit.saturating_add(MAX_HEADER_BYTES);
        let mut response = Vec::new();
        let read = (&mut stream).take(bound + 1).read_to_end(&mut response);
        let _ = stream.shutdown(Shutdown::Both);
        read.map_err(|e| read_error(origin, e))?;

        if response.len() as u64 > bound {
            return Err(CacheError::TooLarge {
                size: response.len() as u64,
                limit: size_limit,
            });
        }

        if let Some(status) = response.split(|&b| b == b'\n').next() {
            debug!(
                "Origin {} answered '{}' ({} bytes)",
                origin,
                String::from_utf8_lossy(status).trim_end(),
                response.len()
            );
        }

        let body = split_body(&response)?;
        if body.len() as u64 > size_limit {
            return Err(CacheError::TooLarge {
                size: body.len() as u64,
                limit: size_limit,
            });
        }
        Ok(body.to_vec())
    }

    fn connect(&self, origin: &OriginAddr, addrs: &[SocketAddr]) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.timeout {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }

        Err(CacheError::OriginUnreachable(match last_err {
            Some(err) => format!("cannot connect to {}: {}", origin, err),
            None => format!("cannot connect to {}", origin),
        }))
    }
}

fn read_error(origin: &OriginAddr, err: io::Error) -> CacheError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            CacheError::OriginUnreachable(format!("timed out reading from {}", origin))
        }
        _ => CacheError::ProtocolError(format!("failed reading from {}: {}", origin, err)),
    }
}

// == Split Body ==
/// Returns the bytes after the first `\r\n\r\n`.
///
/// A missing boundary or an empty body is a protocol error.
pub fn split_body(response: &[u8]) -> Result<&[u8]> {
    let start = response
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
        .ok_or_else(|| {
            CacheError::ProtocolError("response has no header/body boundary".to_string())
        })?;

    let body = &response[start..];
    if body.is_empty() {
        return Err(CacheError::ProtocolError("response body is empty".to_string()));
    }
    Ok(body)
}
