//! Outbound Bridge
//!
//! Routes IPs from the IN port to broker topics and publishes them.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::{QoS, Session};
use crate::error::{Error, Result};
use crate::ip::Ip;
use crate::port::{InputPort, Message};
use crate::uri::ConnectionDescriptor;

/// Bracket tracking state of the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteState {
    /// Outside any group
    Idle,
    /// Open bracket seen; the next packet names the group's topic
    AwaitOverride,
    /// Inside a group publishing to the given topic
    Active(String),
}

/// A payload ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub topic: String,
    pub payload: Bytes,
}

/// Maps incoming IPs to publish destinations
///
/// ```text
/// d "payload"                      -> default topic
/// d "topic" "payload"              -> "topic" ("" falls back to default)
/// [ d "topic" d "p1" d "p2" ]      -> "topic" for p1 and p2
/// ```
#[derive(Debug)]
pub struct Router {
    default_topic: String,
    state: RouteState,
}

impl Router {
    pub fn new(default_topic: impl Into<String>) -> Self {
        Self {
            default_topic: default_topic.into(),
            state: RouteState::Idle,
        }
    }

    pub fn state(&self) -> &RouteState {
        &self.state
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    /// Feed one IP; returns what to publish, if anything
    pub fn route(&mut self, ip: Ip) -> Option<Route> {
        match ip {
            Ip::OpenBracket => {
                if self.state == RouteState::Idle {
                    self.state = RouteState::AwaitOverride;
                } else {
                    warn!("Nested open bracket ignored (state={:?})", self.state);
                }
                None
            }
            Ip::CloseBracket => {
                if self.state == RouteState::Idle {
                    warn!("Close bracket without matching open ignored");
                }
                self.state = RouteState::Idle;
                None
            }
            Ip::Packet(packet) => match &self.state {
                RouteState::Idle => {
                    let topic = packet
                        .topic()
                        .filter(|t| !t.is_empty())
                        .map(|t| topic_from_bytes(t))
                        .unwrap_or_else(|| self.default_topic.clone());
                    Some(Route {
                        topic,
                        payload: packet.into_payload(),
                    })
                }
                RouteState::AwaitOverride => {
                    let head = packet.head();
                    let topic = if head.is_empty() {
                        self.default_topic.clone()
                    } else {
                        topic_from_bytes(head)
                    };
                    debug!("Group topic set to '{}'", topic);
                    self.state = RouteState::Active(topic);
                    None
                }
                RouteState::Active(topic) => Some(Route {
                    topic: topic.clone(),
                    payload: packet.into_payload(),
                }),
            },
        }
    }
}

fn topic_from_bytes(bytes: &Bytes) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Outbound bridge: IN port to broker
pub struct Publisher<S: Session> {
    name: String,
    session: S,
    router: Router,
    qos: QoS,
    grace: Duration,
}

impl<S: Session> Publisher<S> {
    pub fn new(name: &str, session: S, descriptor: &ConnectionDescriptor, grace: Duration) -> Self {
        Self {
            name: name.to_string(),
            session,
            router: Router::new(descriptor.destination.clone()),
            qos: descriptor.qos,
            grace,
        }
    }

    /// Publish until IN closes or shutdown is signalled, then disconnect
    pub async fn run(
        mut self,
        input: &mut dyn InputPort,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(
            "Bridge '{}': publishing from {} (default topic='{}')",
            self.name,
            input.name(),
            self.router.default_topic()
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Bridge '{}': shutdown requested", self.name);
                    break;
                }

                result = input.recv() => match result {
                    Ok(Some(message)) => self.handle(message).await,
                    Ok(None) => {
                        info!("Bridge '{}': IN port is closed", self.name);
                        break;
                    }
                    Err(e) => warn!("Bridge '{}': {}", self.name, Error::TransportRead(e)),
                },
            }
        }

        self.session
            .disconnect(self.grace)
            .await
            .map_err(Error::Connection)
    }

    async fn handle(&mut self, message: Message) {
        let ip = match Ip::from_frames(message) {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Bridge '{}': {}", self.name, Error::InvalidIp(e));
                return;
            }
        };

        let Some(route) = self.router.route(ip) else {
            return;
        };

        debug!(
            "Bridge '{}': publishing {} bytes to '{}'",
            self.name,
            route.payload.len(),
            route.topic
        );
        if let Err(e) = self
            .session
            .publish(&route.topic, route.payload, self.qos)
            .await
        {
            warn!(
                "Bridge '{}': publish to '{}' failed: {}",
                self.name, route.topic, e
            );
        }
    }
}
