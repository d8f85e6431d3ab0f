use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::broker::Broker;
use crate::client::Client;
use crate::config::BrokerSettings;
use crate::transport::frame::{self, Frame, FrameError};
use crate::transport::tcp;

const WAIT: Duration = Duration::from_secs(5);

async fn start_broker(settings: BrokerSettings) -> (String, Arc<Broker>) {
    let broker = Arc::new(Broker::new(settings));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("local_addr").to_string();
    tokio::spawn(tcp::serve(listener, broker.clone()));
    (addr, broker)
}

async fn next(client: &mut Client) -> Option<Frame> {
    tokio::time::timeout(WAIT, client.next_frame())
        .await
        .expect("timed out waiting for a frame")
        .expect("failed to read frame")
}

/// Ping and wait for the pong. Frames from one session are handled in order,
/// so everything sent before the ping has been processed afterwards.
async fn sync(client: &mut Client) {
    client.ping().await.expect("send ping");
    match next(client).await {
        Some(Frame::Pong { .. }) => {}
        other => panic!("Expected pong, got {other:?}"),
    }
}

/// The broker closed the connection. A reset counts as closed too.
async fn assert_closed(client: &mut Client) {
    let res = tokio::time::timeout(WAIT, client.next_frame())
        .await
        .expect("timed out waiting for close");
    assert!(matches!(res, Ok(None) | Err(_)), "Expected close, got {res:?}");
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[test]
fn test_decode_client_frames() {
    assert_eq!(
        frame::decode(r#"{"type":"subscribe","topic":"a/b"}"#).unwrap(),
        Frame::subscribe("a/b")
    );
    assert_eq!(
        frame::decode(r#"{"type":"unsubscribe","topic":"a/b"}"#).unwrap(),
        Frame::unsubscribe("a/b")
    );
    assert_eq!(
        frame::decode(r#"{"type":"publish","topic":"t","payload":"v","qos":1}"#).unwrap(),
        Frame::publish("t", "v", false)
    );
    assert_eq!(
        frame::decode(r#"{"type":"publish","topic":"t","payload":"v","retain":true}"#).unwrap(),
        Frame::publish("t", "v", true)
    );
    assert_eq!(
        frame::decode(r#"{"type":"ping","client_id":"sensor-1"}"#).unwrap(),
        Frame::ping()
    );
}

#[test]
fn test_missing_topic_decodes_as_empty() {
    assert_eq!(
        frame::decode(r#"{"type":"subscribe"}"#).unwrap(),
        Frame::subscribe("")
    );
}

#[test]
fn test_decode_errors() {
    assert!(matches!(
        frame::decode("{not json"),
        Err(FrameError::Malformed(_))
    ));
    assert!(matches!(
        frame::decode(r#"{"topic":"t"}"#),
        Err(FrameError::MissingType)
    ));
    assert!(matches!(
        frame::decode(r#"{"type":"login"}"#),
        Err(FrameError::UnknownType(kind)) if kind == "login"
    ));
    assert!(matches!(
        frame::decode(r#"{"type":"publish","topic":"t"}"#),
        Err(FrameError::Malformed(_))
    ));
    assert!(matches!(
        frame::decode(r#"{"type":"publish","topic":"t","payload":"v","retain":"yes"}"#),
        Err(FrameError::Malformed(_))
    ));
}

#[test]
fn test_encode_message_frame() {
    let frame = Frame::Message {
        topic: "t".into(),
        payload: "line one\nline two".into(),
        timestamp: "2024-01-01T00:00:00.000Z".into(),
        from_client: "client-1".into(),
    };
    let text = frame::encode(&frame).unwrap();
    assert!(!text.contains('\n'));

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "message",
            "topic": "t",
            "payload": "line one\nline two",
            "timestamp": "2024-01-01T00:00:00.000Z",
            "from_client": "client-1"
        })
    );
    assert_eq!(frame.kind(), "message");
}

#[tokio::test]
async fn test_read_frame_handles_crlf_and_eof() {
    let data: &[u8] = b"{\"type\":\"ping\"}\r\n\npartial";
    let mut reader = BufReader::new(data);
    let mut buf = Vec::new();

    let first = tcp::read_frame(&mut reader, &mut buf, 64).await.unwrap();
    assert_eq!(first.as_deref(), Some(r#"{"type":"ping"}"#));
    let blank = tcp::read_frame(&mut reader, &mut buf, 64).await.unwrap();
    assert_eq!(blank.as_deref(), Some(""));
    // trailing bytes without a newline are dropped at EOF
    assert!(tcp::read_frame(&mut reader, &mut buf, 64).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_frame_rejects_oversized() {
    let data = vec![b'x'; 100];
    let mut reader = BufReader::new(data.as_slice());
    let mut buf = Vec::new();
    assert!(tcp::read_frame(&mut reader, &mut buf, 16).await.is_err());

    let exact: &[u8] = b"0123456789abcdef\n";
    let mut reader = BufReader::new(exact);
    let line = tcp::read_frame(&mut reader, &mut buf, 16).await.unwrap();
    assert_eq!(line.as_deref(), Some("0123456789abcdef"));
}

#[tokio::test]
async fn test_publish_reaches_other_subscriber_only() {
    let (addr, broker) = start_broker(BrokerSettings::default()).await;
    let mut a = Client::connect(&addr).await.unwrap();
    let mut b = Client::connect(&addr).await.unwrap();

    a.subscribe("sensor/temperature").await.unwrap();
    sync(&mut a).await;
    b.subscribe("sensor/temperature").await.unwrap();
    b.publish("sensor/temperature", "25.5", false).await.unwrap();

    match next(&mut a).await {
        Some(Frame::Message {
            topic,
            payload,
            from_client,
            ..
        }) => {
            assert_eq!(topic, "sensor/temperature");
            assert_eq!(payload, "25.5");
            assert!(from_client.starts_with("client-"));
        }
        other => panic!("Expected message, got {other:?}"),
    }

    // B's next frame is its own pong, not an echo of its publish
    sync(&mut b).await;
    assert_eq!(broker.stats().total_messages, 1);
}

#[tokio::test]
async fn test_retained_message_replayed_on_subscribe() {
    let (addr, _broker) = start_broker(BrokerSettings::default()).await;
    let mut a = Client::connect(&addr).await.unwrap();
    a.publish("x", "1", true).await.unwrap();
    sync(&mut a).await;

    let mut b = Client::connect(&addr).await.unwrap();
    b.subscribe("x").await.unwrap();
    match next(&mut b).await {
        Some(Frame::Message { topic, payload, .. }) => {
            assert_eq!(topic, "x");
            assert_eq!(payload, "1");
        }
        other => panic!("Expected retained message, got {other:?}"),
    }
    // exactly one replay
    sync(&mut b).await;
}

#[tokio::test]
async fn test_disconnect_removes_subscriptions() {
    let (addr, broker) = start_broker(BrokerSettings::default()).await;
    let mut a = Client::connect(&addr).await.unwrap();
    a.subscribe("y").await.unwrap();
    sync(&mut a).await;
    assert!(broker.topics().contains_topic("y"));

    a.close().await.unwrap();
    wait_until(|| broker.session_count() == 0).await;
    assert!(!broker.topics().contains_topic("y"));

    let mut b = Client::connect(&addr).await.unwrap();
    b.publish("y", "gone", false).await.unwrap();
    sync(&mut b).await;
    assert_eq!(broker.stats().total_messages, 1);
}

#[tokio::test]
async fn test_split_and_coalesced_frames() {
    let (addr, broker) = start_broker(BrokerSettings::default()).await;
    let stream = TcpStream::connect(&addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"{\"type\":\"subscr").await.unwrap();
    write_half.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_half
        .write_all(b"ibe\",\"topic\":\"t\"}\n{\"type\":\"ping\"}\n")
        .await
        .unwrap();

    let line = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection closed");
    assert!(matches!(frame::decode(&line).unwrap(), Frame::Pong { .. }));
    assert!(broker.topics().contains_topic("t"));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let (addr, broker) = start_broker(BrokerSettings::default()).await;
    let stream = TcpStream::connect(&addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(b"garbage\n{\"type\":\"nope\"}\n\xff\xfe\n{\"type\":\"ping\"}\n")
        .await
        .unwrap();

    let line = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection closed");
    assert!(matches!(frame::decode(&line).unwrap(), Frame::Pong { .. }));
    assert_eq!(broker.session_count(), 1);
}

#[tokio::test]
async fn test_oversized_frame_closes_session() {
    let (addr, broker) = start_broker(BrokerSettings {
        max_frame_size: 32,
        ..BrokerSettings::default()
    })
    .await;
    let mut client = Client::connect(&addr).await.unwrap();
    client.subscribe("t").await.unwrap();
    sync(&mut client).await;

    client
        .publish("t", &"x".repeat(128), false)
        .await
        .unwrap();
    assert_closed(&mut client).await;
    wait_until(|| broker.session_count() == 0).await;
    assert!(!broker.topics().contains_topic("t"));
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_clients() {
    let (addr, broker) = start_broker(BrokerSettings {
        max_connections: 1,
        ..BrokerSettings::default()
    })
    .await;
    let mut first = Client::connect(&addr).await.unwrap();
    sync(&mut first).await;

    let mut second = Client::connect(&addr).await.unwrap();
    assert_closed(&mut second).await;
    assert_eq!(broker.session_count(), 1);
    assert_eq!(broker.stats().total_connections, 1);
}

#[tokio::test]
async fn test_shutdown_closes_client_connections() {
    let (addr, broker) = start_broker(BrokerSettings::default()).await;
    let mut client = Client::connect(&addr).await.unwrap();
    sync(&mut client).await;

    assert_eq!(broker.shutdown(), 1);
    assert_closed(&mut client).await;
}

#[tokio::test]
async fn test_slow_subscriber_connection_is_reset() {
    let (addr, broker) = start_broker(BrokerSettings {
        outbound_queue_capacity: 4,
        ..BrokerSettings::default()
    })
    .await;
    let stream = TcpStream::connect(&addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(b"{\"type\":\"subscribe\",\"topic\":\"t\"}\n{\"type\":\"ping\"}\n")
        .await
        .unwrap();
    let line = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection closed");
    assert!(matches!(frame::decode(&line).unwrap(), Frame::Pong { .. }));

    // the client stops reading; flood it until the broker gives up on it
    let payload = "x".repeat(60 * 1024);
    let mut publishes = 0;
    while broker.session_count() > 0 {
        assert!(publishes < 10_000, "slow subscriber was never torn down");
        broker.publish("client-publisher", "t", payload.clone(), false);
        publishes += 1;
        tokio::task::yield_now().await;
    }
    assert!(!broker.topics().contains_topic("t"));

    // the broker's end is gone, so writes from the client start failing
    tokio::time::timeout(WAIT, async {
        while write_half.write_all(b"{\"type\":\"ping\"}\n").await.is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection stayed open after the subscriber was torn down");
}
