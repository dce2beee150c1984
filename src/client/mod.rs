//! Broker Client Abstraction
//!
//! Traits for the MQTT broker collaborator used by both bridge directions.
//! The bridges only ever connect, publish, subscribe and disconnect; the
//! session, keep-alive and acknowledgment machinery lives behind these
//! traits.
//!
//! The shipped implementation is [`MqttConnector`], backed by `rumqttc`.

mod mqtt;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::uri::ConnectionDescriptor;

pub use mqtt::{MqttConnector, MqttSession};

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A message received from the broker on an active subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
}

/// Stream of broker deliveries for a subscription
pub type Deliveries = mpsc::Receiver<Delivery>;

/// Error type for broker operations
#[derive(Debug)]
pub enum BrokerError {
    /// Broker could not be reached or the connection dropped
    ConnectionLost(String),
    /// Broker refused the connection or the subscription
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Request could not be queued on the client
    Request(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            BrokerError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            BrokerError::Timeout => write!(f, "Operation timed out"),
            BrokerError::Request(msg) => write!(f, "Request failed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Establishes broker sessions from a parsed connection descriptor
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Dial the broker and complete the connection handshake
    async fn connect(&self, descriptor: &ConnectionDescriptor)
        -> Result<Self::Session, BrokerError>;
}

/// A live broker session, exclusively owned by one bridge
///
/// `disconnect` consumes the session, so nothing can be published or
/// subscribed once shutdown has started.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError>;

    /// Subscribe to a topic filter and return the delivery stream
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<Deliveries, BrokerError>;

    /// Disconnect, waiting at most `grace` for the broker to acknowledge
    async fn disconnect(self, grace: Duration) -> Result<(), BrokerError>;
}
