//! Flow-Network Ports
//!
//! Components exchange IPs over named ports. Input ports deliver raw frame
//! sequences in arrival order and report when every upstream peer has gone;
//! output ports accept IPs and keep batches contiguous on the wire.

mod tcp;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::ip::{CodecError, Ip};

pub use tcp::{PortStatus, TcpInputPort, TcpOutputPort};

/// Raw frames of one transport message
pub type Message = Vec<Bytes>;

/// Error type for port operations
#[derive(Debug)]
pub enum PortError {
    /// Endpoint string is not `tcp://host:port`
    InvalidEndpoint(String),
    /// Socket error
    Io(std::io::Error),
    /// Peer sent bytes that are not a transport message
    Codec(CodecError),
    /// Port is closed
    Closed,
    /// Peer did not show up in time
    Timeout,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::InvalidEndpoint(e) => write!(f, "Invalid endpoint: {}", e),
            PortError::Io(e) => write!(f, "IO error: {}", e),
            PortError::Codec(e) => write!(f, "Codec error: {}", e),
            PortError::Closed => write!(f, "Port closed"),
            PortError::Timeout => write!(f, "Port connection timed out"),
        }
    }
}

impl std::error::Error for PortError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PortError::Io(e) => Some(e),
            PortError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PortError {
    fn from(e: std::io::Error) -> Self {
        PortError::Io(e)
    }
}

impl From<CodecError> for PortError {
    fn from(e: CodecError) -> Self {
        PortError::Codec(e)
    }
}

/// Receiving side of a port
#[async_trait]
pub trait InputPort: Send {
    /// Port name used in logs
    fn name(&self) -> &str;

    /// Next message; `Ok(None)` once the port is closed
    async fn recv(&mut self) -> Result<Option<Message>, PortError>;

    /// Stop receiving; later `recv` calls return `Ok(None)`
    fn close(&mut self);
}

/// Sending side of a port
#[async_trait]
pub trait OutputPort: Send + Sync {
    /// Port name used in logs
    fn name(&self) -> &str;

    /// Send a single IP
    async fn send(&self, ip: Ip) -> Result<(), PortError> {
        self.send_batch(vec![ip]).await
    }

    /// Send IPs back to back with nothing interleaved
    async fn send_batch(&self, batch: Vec<Ip>) -> Result<(), PortError>;
}

/// Resolve `tcp://host:port` into a `host:port` socket address string
pub fn parse_endpoint(endpoint: &str) -> Result<String, PortError> {
    let url = Url::parse(endpoint)
        .map_err(|e| PortError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    if url.scheme() != "tcp" {
        return Err(PortError::InvalidEndpoint(format!(
            "{}: only tcp:// endpoints are supported",
            endpoint
        )));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PortError::InvalidEndpoint(format!("{}: missing host", endpoint)))?;
    let port = url
        .port()
        .ok_or_else(|| PortError::InvalidEndpoint(format!("{}: missing port", endpoint)))?;

    Ok(format!("{}:{}", host, port))
}
