//! MQTT Broker Client
//!
//! [`Connector`] and [`Session`] on top of `rumqttc`. The client event loop
//! runs in its own task for the lifetime of the session; it forwards
//! publishes to the active subscription and subscription acknowledgments to
//! the waiting `subscribe` call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{BrokerError, Connector, Deliveries, Delivery, QoS, Session};
use crate::config::BrokerConfig;
use crate::uri::ConnectionDescriptor;

/// Sender for the active subscription, if any
type DeliverySlot = Arc<Mutex<Option<mpsc::Sender<Delivery>>>>;

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Connector producing `rumqttc` sessions
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: BrokerConfig,
}

impl MqttConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    fn options(&self, descriptor: &ConnectionDescriptor) -> MqttOptions {
        let mut options = MqttOptions::new(
            descriptor.client_id.clone(),
            descriptor.dial_host(),
            descriptor.dial_port(),
        );
        options.set_keep_alive(self.config.keep_alive_duration());
        options.set_clean_session(descriptor.clean_session);
        options.set_max_packet_size(self.config.max_packet_size, self.config.max_packet_size);

        if let Some(credentials) = &descriptor.credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.password.clone().unwrap_or_default(),
            );
        }
        options
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Session = MqttSession;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<MqttSession, BrokerError> {
        let address = descriptor.address();
        debug!(
            "Broker {}: connecting as '{}' (clean_session={})",
            address, descriptor.client_id, descriptor.clean_session
        );

        let (client, mut eventloop) =
            AsyncClient::new(self.options(descriptor), self.config.delivery_capacity);

        timeout(
            self.config.connect_timeout_duration(),
            wait_for_connack(&mut eventloop),
        )
        .await
        .map_err(|_| BrokerError::Timeout)??;

        info!("Broker {}: connected", address);

        let deliveries: DeliverySlot = Arc::new(Mutex::new(None));
        let (suback_tx, suback_rx) = mpsc::channel(4);
        let events = tokio::spawn(run_event_loop(
            address.clone(),
            eventloop,
            deliveries.clone(),
            suback_tx,
            self.config.reconnect_delay_duration(),
        ));

        Ok(MqttSession {
            address,
            client,
            events: Some(events),
            deliveries,
            subacks: suback_rx,
            delivery_capacity: self.config.delivery_capacity,
            max_packet_size: self.config.max_packet_size,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(BrokerError::Rejected(format!("{:?}", code))),
                };
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(BrokerError::Rejected(format!("{:?}", code)));
            }
            Err(e) => return Err(BrokerError::ConnectionLost(e.to_string())),
        }
    }
}

async fn run_event_loop(
    address: String,
    mut eventloop: EventLoop,
    deliveries: DeliverySlot,
    subacks: mpsc::Sender<Result<(), String>>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let sender = deliveries.lock().clone();
                match sender {
                    Some(sender) => {
                        let delivery = Delivery {
                            topic: publish.topic,
                            payload: publish.payload,
                        };
                        if sender.send(delivery).await.is_err() {
                            debug!("Broker {}: subscription dropped, discarding message", address);
                        }
                    }
                    None => {
                        debug!(
                            "Broker {}: message on '{}' without subscription",
                            address, publish.topic
                        );
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("Broker {}: SUBACK received", address);
                let result = if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    Err("broker refused subscription".to_string())
                } else {
                    Ok(())
                };
                let _ = subacks.try_send(result);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Broker {}: DISCONNECT sent", address);
                return;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                debug!("Broker {}: client dropped", address);
                return;
            }
            Err(e) => {
                warn!("Broker {}: connection error: {}", address, e);
                // The next poll reconnects
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

/// Encoded size of an MQTT 3.1.1 PUBLISH packet
fn publish_packet_size(topic: &str, payload_len: usize, qos: QoS) -> usize {
    let packet_id = if qos == QoS::AtMostOnce { 0 } else { 2 };
    let remaining = 2 + topic.len() + packet_id + payload_len;
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

/// Live `rumqttc` session
pub struct MqttSession {
    address: String,
    client: AsyncClient,
    events: Option<JoinHandle<()>>,
    deliveries: DeliverySlot,
    subacks: mpsc::Receiver<Result<(), String>>,
    delivery_capacity: usize,
    max_packet_size: usize,
}

#[async_trait]
impl Session for MqttSession {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), BrokerError> {
        // The event loop drops oversized packets only after they were queued
        let size = publish_packet_size(topic, payload.len(), qos);
        if size > self.max_packet_size {
            return Err(BrokerError::Request(format!(
                "publish of {} bytes exceeds max packet size {}",
                size, self.max_packet_size
            )));
        }

        self.client
            .publish(topic, qos.into(), false, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<Deliveries, BrokerError> {
        let (tx, rx) = mpsc::channel(self.delivery_capacity);
        *self.deliveries.lock() = Some(tx);

        self.client
            .subscribe(filter, qos.into())
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))?;

        match self.subacks.recv().await {
            Some(Ok(())) => {
                info!("Broker {}: subscribed to '{}' (qos={})", self.address, filter, qos);
                Ok(rx)
            }
            Some(Err(reason)) => Err(BrokerError::Rejected(reason)),
            None => Err(BrokerError::ConnectionLost(
                "client event loop stopped".to_string(),
            )),
        }
    }

    async fn disconnect(mut self, grace: Duration) -> Result<(), BrokerError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Request(e.to_string()));

        if let Some(mut events) = self.events.take() {
            if timeout(grace, &mut events).await.is_err() {
                warn!("Broker {}: disconnect grace period elapsed", self.address);
                events.abort();
            }
        }

        info!("Broker {}: disconnected", self.address);
        result
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(events) = self.events.take() {
            events.abort();
        }
    }
}
