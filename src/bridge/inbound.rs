//! Inbound Bridge
//!
//! Subscribes to the configured topic and frames every delivery as a
//! bracketed `[ topic payload ]` group on the OUT port.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::client::{Deliveries, Delivery, QoS, Session};
use crate::error::{Error, Result};
use crate::ip::Ip;
use crate::port::{OutputPort, PortError};
use crate::uri::ConnectionDescriptor;

/// The four IPs emitted for one broker delivery
pub fn frame_delivery(delivery: Delivery) -> Vec<Ip> {
    vec![
        Ip::OpenBracket,
        Ip::packet(delivery.topic),
        Ip::packet(delivery.payload),
        Ip::CloseBracket,
    ]
}

/// Inbound bridge: broker to OUT port
pub struct Subscriber<S: Session> {
    name: String,
    session: S,
    filter: String,
    qos: QoS,
    grace: Duration,
}

impl<S: Session> Subscriber<S> {
    pub fn new(name: &str, session: S, descriptor: &ConnectionDescriptor, grace: Duration) -> Self {
        Self {
            name: name.to_string(),
            session,
            filter: descriptor.destination.clone(),
            qos: descriptor.qos,
            grace,
        }
    }

    /// Subscribe and forward deliveries until shutdown, then disconnect
    ///
    /// Forwarding also stops when the delivery stream ends or OUT closes.
    ///
    /// A refused subscription is fatal and returned as
    /// [`Error::Subscription`] after the session is closed.
    pub async fn run(
        mut self,
        output: Arc<dyn OutputPort>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let deliveries = match self.session.subscribe(&self.filter, self.qos).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                if let Err(e) = self.session.disconnect(self.grace).await {
                    debug!("Bridge '{}': disconnect after failed subscribe: {}", self.name, e);
                }
                return Err(Error::Subscription(e));
            }
        };
        info!(
            "Bridge '{}': forwarding '{}' to {}",
            self.name,
            self.filter,
            output.name()
        );

        let mut forwarder = tokio::spawn(forward(self.name.clone(), deliveries, output));

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Bridge '{}': shutdown requested", self.name);
                // A batch is queued whole or not at all
                forwarder.abort();
                let _ = (&mut forwarder).await;
            }
            _ = &mut forwarder => {
                warn!("Bridge '{}': forwarding stopped", self.name);
            }
        }

        self.session
            .disconnect(self.grace)
            .await
            .map_err(Error::Connection)
    }
}

async fn forward(name: String, mut deliveries: Deliveries, output: Arc<dyn OutputPort>) {
    while let Some(delivery) = deliveries.recv().await {
        debug!(
            "Bridge '{}': received {} bytes on '{}'",
            name,
            delivery.payload.len(),
            delivery.topic
        );
        match output.send_batch(frame_delivery(delivery)).await {
            Ok(()) => {}
            Err(PortError::Closed) => {
                error!("Bridge '{}': {} is closed", name, output.name());
                return;
            }
            Err(e) => warn!("Bridge '{}': failed to emit on {}: {}", name, output.name(), e),
        }
    }
    debug!("Bridge '{}': delivery stream ended", name);
}
