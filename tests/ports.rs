//! TCP Port Integration Tests
//!
//! Exercise the input and output ports over localhost sockets.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use vibemq_flow::config::PortsConfig;
use vibemq_flow::ip::{encode_message, Ip, Packet};
use vibemq_flow::port::{InputPort, OutputPort, PortError, PortStatus, TcpInputPort, TcpOutputPort};

// Atomic port counter to avoid port conflicts between tests
static PORT_COUNTER: AtomicU16 = AtomicU16::new(23000);

fn next_endpoint() -> String {
    format!("tcp://127.0.0.1:{}", PORT_COUNTER.fetch_add(1, Ordering::SeqCst))
}

async fn recv_ip(port: &mut TcpInputPort) -> Option<Ip> {
    timeout(Duration::from_secs(2), port.recv())
        .await
        .expect("recv timed out")
        .expect("recv failed")
        .map(|frames| Ip::from_frames(frames).expect("invalid IP"))
}

#[tokio::test]
async fn test_send_and_receive() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();
    let output = TcpOutputPort::connect("OUT", &endpoint, &config, Duration::from_secs(2))
        .await
        .unwrap();

    input.wait_for_peer(Duration::from_secs(2)).await.unwrap();
    assert_eq!(input.peer_count(), 1);

    output.send(Ip::packet("hello")).await.unwrap();
    output
        .send(Ip::Packet(Packet::with_topic("t", "body")))
        .await
        .unwrap();

    assert_eq!(recv_ip(&mut input).await, Some(Ip::packet("hello")));
    assert_eq!(
        recv_ip(&mut input).await,
        Some(Ip::Packet(Packet::with_topic("t", "body")))
    );
}

#[tokio::test]
async fn test_batches_stay_contiguous() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();
    let output = std::sync::Arc::new(
        TcpOutputPort::connect("OUT", &endpoint, &config, Duration::from_secs(2))
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for n in 0..8 {
        let output = output.clone();
        tasks.push(tokio::spawn(async move {
            let topic = format!("topic/{}", n);
            output
                .send_batch(vec![
                    Ip::OpenBracket,
                    Ip::packet(topic),
                    Ip::packet(format!("payload {}", n)),
                    Ip::CloseBracket,
                ])
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for _ in 0..8 {
        assert_eq!(recv_ip(&mut input).await, Some(Ip::OpenBracket));
        let Some(Ip::Packet(topic)) = recv_ip(&mut input).await else {
            panic!("expected topic packet");
        };
        let n = String::from_utf8_lossy(topic.payload())
            .trim_start_matches("topic/")
            .to_string();
        assert_eq!(
            recv_ip(&mut input).await,
            Some(Ip::packet(format!("payload {}", n)))
        );
        assert_eq!(recv_ip(&mut input).await, Some(Ip::CloseBracket));
    }
}

#[tokio::test]
async fn test_input_closes_when_peers_leave() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();
    let output = TcpOutputPort::connect("OUT", &endpoint, &config, Duration::from_secs(2))
        .await
        .unwrap();

    output.send(Ip::packet("last")).await.unwrap();
    output.close(Duration::from_secs(1)).await;

    assert_eq!(recv_ip(&mut input).await, Some(Ip::packet("last")));
    assert_eq!(recv_ip(&mut input).await, None);
    // Stays closed
    assert_eq!(recv_ip(&mut input).await, None);
}

#[tokio::test]
async fn test_persistent_port_outlives_peers() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind_persistent("OPTIONS", &endpoint, &config)
        .await
        .unwrap();

    let first = TcpOutputPort::connect("first", &endpoint, &config, Duration::from_secs(2))
        .await
        .unwrap();
    first.send(Ip::packet("one")).await.unwrap();
    first.close(Duration::from_secs(1)).await;
    assert_eq!(recv_ip(&mut input).await, Some(Ip::packet("one")));

    // No peer left, but the port keeps waiting
    assert!(timeout(Duration::from_millis(200), input.recv()).await.is_err());

    let second = TcpOutputPort::connect("second", &endpoint, &config, Duration::from_secs(2))
        .await
        .unwrap();
    second.send(Ip::packet("two")).await.unwrap();
    assert_eq!(recv_ip(&mut input).await, Some(Ip::packet("two")));

    input.close();
    assert_eq!(recv_ip(&mut input).await, None);
}

#[tokio::test]
async fn test_close_stops_receiving() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind("OPTIONS", &endpoint, &config).await.unwrap();

    input.close();
    assert_eq!(recv_ip(&mut input).await, None);
}

#[tokio::test]
async fn test_corrupt_stream_drops_peer() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();

    let mut raw = TcpStream::connect(input.local_addr()).await.unwrap();
    raw.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();

    let result = timeout(Duration::from_secs(2), input.recv()).await.unwrap();
    assert!(matches!(result, Err(PortError::Codec(_))));
    // The only peer is gone
    assert_eq!(recv_ip(&mut input).await, None);
}

#[tokio::test]
async fn test_oversized_message_rejected() {
    let endpoint = next_endpoint();
    let config = PortsConfig {
        max_message_size: 16,
        ..Default::default()
    };
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();

    let mut buf = BytesMut::new();
    encode_message(&Ip::packet(vec![0u8; 64]).into_frames(), &mut buf).unwrap();
    let mut raw = TcpStream::connect(input.local_addr()).await.unwrap();
    raw.write_all(&buf).await.unwrap();

    let result = timeout(Duration::from_secs(2), input.recv()).await.unwrap();
    assert!(matches!(result, Err(PortError::Codec(_))));
}

#[tokio::test]
async fn test_message_split_across_writes() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();

    let mut buf = BytesMut::new();
    encode_message(&Ip::packet(Bytes::from_static(b"split")).into_frames(), &mut buf).unwrap();
    let mut raw = TcpStream::connect(input.local_addr()).await.unwrap();
    let (head, tail) = buf.split_at(3);
    raw.write_all(head).await.unwrap();
    raw.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    raw.write_all(tail).await.unwrap();

    assert_eq!(recv_ip(&mut input).await, Some(Ip::packet("split")));
}

#[tokio::test]
async fn test_output_dial_timeout() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();

    let result =
        TcpOutputPort::connect("OUT", &endpoint, &config, Duration::from_millis(300)).await;
    assert!(matches!(result, Err(PortError::Timeout)));
}

#[tokio::test]
async fn test_output_dial_retries_until_listener() {
    let endpoint = next_endpoint();
    let config = PortsConfig::default();

    let dial_endpoint = endpoint.clone();
    let dial = tokio::spawn(async move {
        TcpOutputPort::connect("OUT", &dial_endpoint, &PortsConfig::default(), Duration::from_secs(2))
            .await
    });
    tokio::time::sleep(Duration::from_millis(250)).await;
    let mut input = TcpInputPort::bind("IN", &endpoint, &config).await.unwrap();

    let output = dial.await.unwrap().unwrap();
    assert_eq!(output.status(), PortStatus::Connected);
    output.send(Ip::CloseBracket).await.unwrap();
    assert_eq!(recv_ip(&mut input).await, Some(Ip::CloseBracket));
}

#[tokio::test]
async fn test_wait_for_peer_timeout() {
    let endpoint = next_endpoint();
    let mut input = TcpInputPort::bind("IN", &endpoint, &PortsConfig::default())
        .await
        .unwrap();

    let result = input.wait_for_peer(Duration::from_millis(200)).await;
    assert!(matches!(result, Err(PortError::Timeout)));
}

#[tokio::test]
async fn test_invalid_endpoint() {
    let result = TcpInputPort::bind("IN", "udp://127.0.0.1:1", &PortsConfig::default()).await;
    assert!(matches!(result, Err(PortError::InvalidEndpoint(_))));
}
