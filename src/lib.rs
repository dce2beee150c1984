//! vibemq-flow - MQTT bridge components for flow-based networks
//!
//! Two components connect a flow network to an MQTT broker:
//! `mqtt-pub` publishes the IPs it receives, `mqtt-sub` emits the messages
//! of a subscription. Both are configured at runtime by a connection URI
//! delivered on their OPTIONS port.

pub mod bridge;
pub mod client;
pub mod component;
pub mod config;
pub mod error;
pub mod ip;
pub mod port;
pub mod uri;

pub use bridge::{Publisher, Router, Subscriber};
pub use client::{Connector, MqttConnector, QoS, Session};
pub use config::Settings;
pub use error::{Error, Result};
pub use ip::{Ip, Packet};
pub use port::{InputPort, OutputPort, TcpInputPort, TcpOutputPort};
pub use uri::ConnectionDescriptor;
