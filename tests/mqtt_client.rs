//! MQTT Client Integration Tests
//!
//! Drives [`MqttConnector`] and its sessions against a scripted broker that
//! speaks raw MQTT 3.1.1 over a localhost socket.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use vibemq_flow::client::{BrokerError, Connector, MqttConnector, QoS, Session};
use vibemq_flow::config::BrokerConfig;
use vibemq_flow::uri::{self, ConnectionDescriptor};

const CONNECT: u8 = 0x10;
const PUBLISH: u8 = 0x30;
const SUBSCRIBE: u8 = 0x82;
const DISCONNECT: u8 = 0xE0;

const LARGE: usize = 20 * 1024;

/// Scripted broker bound to an ephemeral port
async fn listen() -> (TcpListener, ConnectionDescriptor) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let descriptor = uri::parse(&format!("tcp://127.0.0.1:{}/t?clientId=client-test", port)).unwrap();
    (listener, descriptor)
}

fn encode_remaining_length(mut len: usize, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Read one packet as (first byte, body); `None` once the client hangs up
async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

/// Skip packets until one with the given first byte arrives
async fn expect_packet(stream: &mut TcpStream, kind: u8) -> Option<Vec<u8>> {
    loop {
        let (header, body) = read_packet(stream).await?;
        if header == kind || (kind == PUBLISH && header & 0xF0 == PUBLISH) {
            return Some(body);
        }
    }
}

/// Accept one client and answer its CONNECT with the given return code
async fn accept(listener: &TcpListener, code: u8) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    expect_packet(&mut stream, CONNECT).await.expect("no CONNECT");
    stream.write_all(&[0x20, 0x02, 0x00, code]).await.unwrap();
    stream
}

/// Answer the next SUBSCRIBE with a single return code
async fn acknowledge_subscribe(stream: &mut TcpStream, code: u8) {
    let body = expect_packet(stream, SUBSCRIBE).await.expect("no SUBSCRIBE");
    stream
        .write_all(&[0x90, 0x03, body[0], body[1], code])
        .await
        .unwrap();
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![PUBLISH];
    encode_remaining_length(2 + topic.len() + payload.len(), &mut packet);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn config() -> BrokerConfig {
    BrokerConfig {
        connect_timeout: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let (listener, descriptor) = listen().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept(&listener, 0x00).await;
        expect_packet(&mut stream, DISCONNECT).await.is_some()
    });

    let session = MqttConnector::new(config()).connect(&descriptor).await.unwrap();

    let grace = Duration::from_millis(500);
    timeout(grace * 2, session.disconnect(grace))
        .await
        .expect("disconnect overran its grace period")
        .unwrap();

    let saw_disconnect = timeout(Duration::from_secs(2), broker).await.unwrap().unwrap();
    assert!(saw_disconnect);
}

#[tokio::test]
async fn test_connect_refused() {
    let (listener, descriptor) = listen().await;
    // 5: not authorized
    let broker = tokio::spawn(async move { accept(&listener, 0x05).await });

    let result = MqttConnector::new(config()).connect(&descriptor).await;
    assert!(matches!(result, Err(BrokerError::Rejected(_))));
    drop(broker.await.unwrap());
}

#[tokio::test]
async fn test_connect_timeout() {
    let (listener, descriptor) = listen().await;
    let broker = tokio::spawn(async move {
        // Accept and stay silent
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(stream);
    });

    let config = BrokerConfig {
        connect_timeout: 1,
        ..Default::default()
    };
    let result = MqttConnector::new(config).connect(&descriptor).await;
    assert!(matches!(result, Err(BrokerError::Timeout)));
    broker.abort();
}

#[tokio::test]
async fn test_subscription_refused() {
    let (listener, descriptor) = listen().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept(&listener, 0x00).await;
        acknowledge_subscribe(&mut stream, 0x80).await;
        stream
    });

    let mut session = MqttConnector::new(config()).connect(&descriptor).await.unwrap();
    let result = timeout(
        Duration::from_secs(2),
        session.subscribe("t", QoS::AtLeastOnce),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(BrokerError::Rejected(_))));

    let _stream = broker.await.unwrap();
    session.disconnect(Duration::from_millis(200)).await.unwrap();
}

#[tokio::test]
async fn test_large_publish_reaches_broker() {
    let (listener, descriptor) = listen().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept(&listener, 0x00).await;
        let body = expect_packet(&mut stream, PUBLISH).await.expect("no PUBLISH");
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
        (topic, body[2 + topic_len..].to_vec())
    });

    let session = MqttConnector::new(config()).connect(&descriptor).await.unwrap();
    let payload: Vec<u8> = (0..LARGE).map(|n| (n % 251) as u8).collect();
    session
        .publish("t/large", Bytes::from(payload.clone()), QoS::AtMostOnce)
        .await
        .unwrap();

    let (topic, received) = timeout(Duration::from_secs(2), broker).await.unwrap().unwrap();
    assert_eq!(topic, "t/large");
    assert_eq!(received.len(), LARGE);
    assert!(received == payload);

    session.disconnect(Duration::from_millis(200)).await.unwrap();
}

#[tokio::test]
async fn test_large_delivery_reaches_subscriber() {
    let (listener, descriptor) = listen().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept(&listener, 0x00).await;
        acknowledge_subscribe(&mut stream, 0x00).await;
        stream
            .write_all(&publish_packet("t", &vec![0x5A; LARGE]))
            .await
            .unwrap();
        stream
    });

    let mut session = MqttConnector::new(config()).connect(&descriptor).await.unwrap();
    let mut deliveries = timeout(
        Duration::from_secs(2),
        session.subscribe("t", QoS::AtMostOnce),
    )
    .await
    .unwrap()
    .unwrap();

    let delivery = timeout(Duration::from_secs(2), deliveries.recv())
        .await
        .unwrap()
        .expect("delivery stream ended");
    assert_eq!(delivery.topic, "t");
    assert_eq!(delivery.payload.len(), LARGE);

    let _stream = broker.await.unwrap();
    session.disconnect(Duration::from_millis(200)).await.unwrap();
}

#[tokio::test]
async fn test_oversized_publish_fails_before_queueing() {
    let (listener, descriptor) = listen().await;
    let broker = tokio::spawn(async move { accept(&listener, 0x00).await });

    let config = BrokerConfig {
        max_packet_size: 1024,
        ..config()
    };
    let session = MqttConnector::new(config).connect(&descriptor).await.unwrap();
    let result = session
        .publish("t", Bytes::from(vec![0u8; 2048]), QoS::AtMostOnce)
        .await;
    assert!(matches!(result, Err(BrokerError::Request(_))));

    let _stream = broker.await.unwrap();
    session.disconnect(Duration::from_millis(200)).await.unwrap();
}
