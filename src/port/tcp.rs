//! TCP Ports
//!
//! Input ports bind their endpoint and accept any number of upstream peers.
//! Output ports dial the downstream endpoint and own the socket through a
//! writer task, so queued batches are written whole and in order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{parse_endpoint, InputPort, Message, OutputPort, PortError};
use crate::config::PortsConfig;
use crate::ip::{encode_message, FrameDecoder, Ip};

/// Delay between dial attempts while the downstream peer is not listening
const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Event reported by the accept and reader tasks of an input port
#[derive(Debug)]
enum PortEvent {
    Connected(SocketAddr),
    Disconnected(SocketAddr),
    Message(Message),
    Error(PortError),
}

/// Input port listening on a TCP endpoint
pub struct TcpInputPort {
    name: String,
    local_addr: SocketAddr,
    events: mpsc::Receiver<PortEvent>,
    acceptor: JoinHandle<()>,
    /// Currently connected peers
    peers: usize,
    /// Whether any peer ever connected
    seen_peer: bool,
    /// Keep receiving after every peer has left
    persistent: bool,
    closed: bool,
}

impl TcpInputPort {
    /// Bind the endpoint and start accepting peers
    ///
    /// The port reports closed once every peer that connected has left.
    pub async fn bind(name: &str, endpoint: &str, config: &PortsConfig) -> Result<Self, PortError> {
        Self::bind_with(name, endpoint, config, false).await
    }

    /// Bind a port that stays open when peers leave; only `close` ends it
    pub async fn bind_persistent(
        name: &str,
        endpoint: &str,
        config: &PortsConfig,
    ) -> Result<Self, PortError> {
        Self::bind_with(name, endpoint, config, true).await
    }

    async fn bind_with(
        name: &str,
        endpoint: &str,
        config: &PortsConfig,
        persistent: bool,
    ) -> Result<Self, PortError> {
        let addr = parse_endpoint(endpoint)?;
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Port '{}': listening on {}", name, local_addr);

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let decoder = FrameDecoder::new().with_max_message_size(config.max_message_size);
        let acceptor = tokio::spawn(accept_loop(name.to_string(), listener, tx, decoder));

        Ok(Self {
            name: name.to_string(),
            local_addr,
            events: rx,
            acceptor,
            peers: 0,
            seen_peer: false,
            persistent,
            closed: false,
        })
    }

    /// Address the port is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected upstream peers
    pub fn peer_count(&self) -> usize {
        self.peers
    }

    /// Wait until the first upstream peer connects
    pub async fn wait_for_peer(&mut self, timeout: Duration) -> Result<(), PortError> {
        let wait = async {
            while !self.seen_peer {
                match self.events.recv().await {
                    Some(PortEvent::Connected(addr)) => self.on_connected(addr),
                    Some(PortEvent::Error(e)) => {
                        warn!("Port '{}': {}", self.name, e);
                    }
                    // Only the first peer's connect can precede its traffic
                    Some(_) => {}
                    None => return Err(PortError::Closed),
                }
            }
            Ok(())
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PortError::Timeout)?
    }

    fn on_connected(&mut self, addr: SocketAddr) {
        self.peers += 1;
        self.seen_peer = true;
        debug!("Port '{}': peer {} connected ({} total)", self.name, addr, self.peers);
    }
}

#[async_trait]
impl InputPort for TcpInputPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recv(&mut self) -> Result<Option<Message>, PortError> {
        loop {
            if self.closed {
                return Ok(None);
            }

            let event = match self.events.recv().await {
                Some(event) => event,
                None => {
                    self.closed = true;
                    return Ok(None);
                }
            };

            match event {
                PortEvent::Message(message) => return Ok(Some(message)),
                PortEvent::Error(e) => return Err(e),
                PortEvent::Connected(addr) => self.on_connected(addr),
                PortEvent::Disconnected(addr) => {
                    self.peers = self.peers.saturating_sub(1);
                    debug!(
                        "Port '{}': peer {} disconnected ({} left)",
                        self.name, addr, self.peers
                    );
                    if !self.persistent && self.seen_peer && self.peers == 0 {
                        info!("Port '{}': all peers disconnected", self.name);
                        self.closed = true;
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Port '{}': closed", self.name);
        }
        self.closed = true;
        self.acceptor.abort();
        self.events.close();
    }
}

impl Drop for TcpInputPort {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(
    name: String,
    listener: TcpListener,
    tx: mpsc::Sender<PortEvent>,
    decoder: FrameDecoder,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Port '{}': set_nodelay failed for {}: {}", name, addr, e);
                }
                if tx.send(PortEvent::Connected(addr)).await.is_err() {
                    return;
                }
                tokio::spawn(read_loop(
                    name.clone(),
                    stream,
                    addr,
                    tx.clone(),
                    decoder.clone(),
                ));
            }
            Err(e) => {
                error!("Port '{}': failed to accept connection: {}", name, e);
            }
        }
    }
}

async fn read_loop(
    name: String,
    mut stream: TcpStream,
    addr: SocketAddr,
    tx: mpsc::Sender<PortEvent>,
    decoder: FrameDecoder,
) {
    let mut buf = BytesMut::with_capacity(4096);

    'read: loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => loop {
                match decoder.decode(&mut buf) {
                    Ok(Some(message)) => {
                        if tx.send(PortEvent::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // The stream cannot be resynchronized after a bad frame
                        warn!("Port '{}': dropping peer {}: {}", name, addr, e);
                        let _ = tx.send(PortEvent::Error(e.into())).await;
                        break 'read;
                    }
                }
            },
            Err(e) => {
                debug!("Port '{}': read error from {}: {}", name, addr, e);
                break;
            }
        }
    }

    let _ = tx.send(PortEvent::Disconnected(addr)).await;
}

/// Connection status of an output port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Connected,
    Closed,
}

/// Output port connected to a downstream TCP endpoint
pub struct TcpOutputPort {
    name: String,
    tx: mpsc::Sender<Vec<Ip>>,
    status: Arc<RwLock<PortStatus>>,
    writer: JoinHandle<()>,
}

impl TcpOutputPort {
    /// Dial the endpoint, retrying until `timeout` elapses
    pub async fn connect(
        name: &str,
        endpoint: &str,
        config: &PortsConfig,
        timeout: Duration,
    ) -> Result<Self, PortError> {
        let addr = parse_endpoint(endpoint)?;

        let dial = async {
            loop {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => return stream,
                    Err(e) => {
                        debug!("Port '{}': dial {} failed: {}", name, addr, e);
                        tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
                    }
                }
            }
        };
        let stream = tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| PortError::Timeout)?;
        stream.set_nodelay(true)?;
        info!("Port '{}': connected to {}", name, addr);

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let status = Arc::new(RwLock::new(PortStatus::Connected));
        let writer = tokio::spawn(write_loop(name.to_string(), stream, rx, status.clone()));

        Ok(Self {
            name: name.to_string(),
            tx,
            status,
            writer,
        })
    }

    pub fn status(&self) -> PortStatus {
        *self.status.read()
    }

    /// Flush queued IPs and close the connection
    pub async fn close(self, grace: Duration) {
        let Self {
            name, tx, writer, ..
        } = self;
        drop(tx);
        if tokio::time::timeout(grace, writer).await.is_err() {
            warn!("Port '{}': pending IPs dropped on close", name);
        }
    }
}

#[async_trait]
impl OutputPort for TcpOutputPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, batch: Vec<Ip>) -> Result<(), PortError> {
        if self.status() == PortStatus::Closed {
            return Err(PortError::Closed);
        }
        self.tx.send(batch).await.map_err(|_| PortError::Closed)
    }
}

async fn write_loop(
    name: String,
    mut stream: TcpStream,
    mut rx: mpsc::Receiver<Vec<Ip>>,
    status: Arc<RwLock<PortStatus>>,
) {
    let mut buf = BytesMut::with_capacity(4096);

    while let Some(batch) = rx.recv().await {
        buf.clear();
        let encoded = batch
            .into_iter()
            .try_for_each(|ip| encode_message(&ip.into_frames(), &mut buf));
        if let Err(e) = encoded {
            warn!("Port '{}': dropping batch: {}", name, e);
            continue;
        }

        if let Err(e) = stream.write_all(&buf).await {
            error!("Port '{}': write failed: {}", name, e);
            *status.write() = PortStatus::Closed;
            return;
        }
    }

    let _ = stream.shutdown().await;
    *status.write() = PortStatus::Closed;
    debug!("Port '{}': writer finished", name);
}
