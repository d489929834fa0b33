//! Client session tests against a scripted byte stream

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use tokio_test::io::{Builder, Mock};

use super::*;
use crate::codec::Encoder;
use crate::protocol::{ConnAck, Connect, Packet, SubAck, SubAckCode, Subscribe};

const DEVICE_SET: &str = "ha-satellite/kitchen/set/volume";
const ALL_SET: &str = "ha-satellite/all/set/volume";
const STATE: &str = "ha-satellite/kitchen/state/volume";

fn wire(packet: Packet) -> Vec<u8> {
    let mut buf = BytesMut::new();
    Encoder::new().encode(&packet, &mut buf).unwrap();
    buf.to_vec()
}

fn options(keep_alive: u16) -> ConnectOptions {
    ConnectOptions {
        host: "127.0.0.1".to_string(),
        port: 1883,
        client_id: "ha-satellite-kitchen".to_string(),
        keep_alive,
        credentials: None,
        connect_timeout: Duration::from_secs(5),
    }
}

fn connect_bytes(options: &ConnectOptions) -> Vec<u8> {
    wire(options.connect_packet())
}

fn connack(code: ConnectReturnCode) -> Vec<u8> {
    wire(Packet::ConnAck(ConnAck {
        session_present: false,
        return_code: code,
    }))
}

fn publish(topic: &str, payload: &'static [u8], qos: QoS, packet_id: Option<u16>) -> Publish {
    Publish {
        qos,
        topic: topic.into(),
        packet_id,
        payload: Bytes::from_static(payload),
        ..Default::default()
    }
}

/// Builder pre-loaded with a successful handshake
fn handshake(options: &ConnectOptions) -> Builder {
    let mut builder = Builder::new();
    builder
        .write(&connect_bytes(options))
        .read(&connack(ConnectReturnCode::Accepted));
    builder
}

async fn open(options: &ConnectOptions, mock: Mock) -> MqttSession<Mock> {
    MqttSession::handshake(mock, options).await.unwrap()
}

// =============================================================================
// Handshake
// =============================================================================

#[test]
fn test_connect_packet_carries_credentials() {
    let mut opts = options(30);
    opts.credentials = Some(("sat".to_string(), Some(Bytes::from_static(b"pw"))));

    match opts.connect_packet() {
        Packet::Connect(connect) => assert_eq!(
            *connect,
            Connect {
                client_id: "ha-satellite-kitchen".to_string(),
                clean_session: true,
                keep_alive: 30,
                username: Some("sat".to_string()),
                password: Some(Bytes::from_static(b"pw")),
            }
        ),
        other => panic!("Expected CONNECT, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handshake_accepted() {
    let opts = options(0);
    let mock = handshake(&opts).build();
    open(&opts, mock).await;
}

#[tokio::test]
async fn test_handshake_rejected() {
    let opts = options(0);
    let mock = Builder::new()
        .write(&connect_bytes(&opts))
        .read(&connack(ConnectReturnCode::BadUserNameOrPassword))
        .build();

    let err = MqttSession::handshake(mock, &opts).await.err().unwrap();
    assert!(matches!(
        err,
        BusError::Rejected(ConnectReturnCode::BadUserNameOrPassword)
    ));
    assert_eq!(err.kind(), FailureKind::Rejected);
}

#[tokio::test]
async fn test_handshake_server_unavailable_is_transient() {
    let opts = options(0);
    let mock = Builder::new()
        .write(&connect_bytes(&opts))
        .read(&connack(ConnectReturnCode::ServerUnavailable))
        .build();

    let err = MqttSession::handshake(mock, &opts).await.err().unwrap();
    assert_eq!(err.kind(), FailureKind::Transient);
}

#[tokio::test]
async fn test_handshake_unexpected_packet() {
    let opts = options(0);
    let mock = Builder::new()
        .write(&connect_bytes(&opts))
        .read(&wire(Packet::PingResp))
        .build();

    let err = MqttSession::handshake(mock, &opts).await.err().unwrap();
    assert!(matches!(err, BusError::Protocol(_)));
}

#[tokio::test]
async fn test_handshake_connection_closed() {
    let opts = options(0);
    let mock = Builder::new().write(&connect_bytes(&opts)).build();

    let err = MqttSession::handshake(mock, &opts).await.err().unwrap();
    assert!(matches!(err, BusError::Closed));
}

// =============================================================================
// Subscribe
// =============================================================================

#[tokio::test]
async fn test_subscribe_queues_messages_before_suback() {
    let opts = options(0);
    let filters = vec![
        (DEVICE_SET.to_string(), QoS::AtLeastOnce),
        (ALL_SET.to_string(), QoS::AtLeastOnce),
    ];
    let early = publish(ALL_SET, b"42", QoS::AtLeastOnce, Some(7));

    let mock = handshake(&opts)
        .write(&wire(Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: filters.clone(),
        })))
        .read(&wire(Packet::Publish(early.clone())))
        .write(&wire(Packet::PubAck(7)))
        .read(&wire(Packet::SubAck(SubAck {
            packet_id: 1,
            return_codes: vec![
                SubAckCode::Granted(QoS::AtLeastOnce),
                SubAckCode::Granted(QoS::AtMostOnce),
            ],
        })))
        .build();

    let mut session = open(&opts, mock).await;
    session.subscribe(&filters).await.unwrap();

    let message = session.next_message().await.unwrap();
    assert_eq!(message, Message::from(early));
}

#[tokio::test]
async fn test_subscribe_refused_filter_is_not_fatal() {
    let opts = options(0);
    let filters = vec![(DEVICE_SET.to_string(), QoS::AtMostOnce)];

    let mock = handshake(&opts)
        .write(&wire(Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: filters.clone(),
        })))
        .read(&wire(Packet::SubAck(SubAck {
            packet_id: 1,
            return_codes: vec![SubAckCode::Failure],
        })))
        .build();

    let mut session = open(&opts, mock).await;
    assert!(session.subscribe(&filters).await.is_ok());
}

#[tokio::test]
async fn test_subscribe_return_code_mismatch() {
    let opts = options(0);
    let filters = vec![
        (DEVICE_SET.to_string(), QoS::AtMostOnce),
        (ALL_SET.to_string(), QoS::AtMostOnce),
    ];

    let mock = handshake(&opts)
        .write(&wire(Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: filters.clone(),
        })))
        .read(&wire(Packet::SubAck(SubAck {
            packet_id: 1,
            return_codes: vec![SubAckCode::Granted(QoS::AtMostOnce)],
        })))
        .build();

    let mut session = open(&opts, mock).await;
    assert!(matches!(
        session.subscribe(&filters).await,
        Err(BusError::Protocol(_))
    ));
}

// =============================================================================
// Inbound flows
// =============================================================================

#[tokio::test]
async fn test_exactly_once_inbound_flow() {
    let opts = options(0);
    let first = publish(DEVICE_SET, b"10", QoS::ExactlyOnce, Some(9));
    let mut duplicate = first.clone();
    duplicate.dup = true;
    let next = publish(DEVICE_SET, b"20", QoS::AtMostOnce, None);

    let mock = handshake(&opts)
        .read(&wire(Packet::Publish(first.clone())))
        .write(&wire(Packet::PubRec(9)))
        .read(&wire(Packet::Publish(duplicate)))
        .write(&wire(Packet::PubRec(9)))
        .read(&wire(Packet::PubRel(9)))
        .write(&wire(Packet::PubComp(9)))
        .read(&wire(Packet::Publish(next.clone())))
        .build();

    let mut session = open(&opts, mock).await;
    assert_eq!(session.next_message().await.unwrap(), Message::from(first));
    // the redelivery is acknowledged but not handed out again
    assert_eq!(session.next_message().await.unwrap(), Message::from(next));
}

#[tokio::test]
async fn test_retained_flag_is_preserved() {
    let opts = options(0);
    let mut retained = publish(DEVICE_SET, b"99", QoS::AtMostOnce, None);
    retained.retain = true;

    let mock = handshake(&opts)
        .read(&wire(Packet::Publish(retained)))
        .build();

    let mut session = open(&opts, mock).await;
    let message = session.next_message().await.unwrap();
    assert!(message.retain);
    assert_eq!(message.payload, Bytes::from_static(b"99"));
}

#[tokio::test]
async fn test_broker_disconnect_ends_session() {
    let opts = options(0);
    let mock = handshake(&opts).build();

    let mut session = open(&opts, mock).await;
    assert!(matches!(
        session.next_message().await,
        Err(BusError::Closed)
    ));
}

#[tokio::test]
async fn test_garbage_from_broker_is_decode_error() {
    let opts = options(0);
    // reserved packet type 0
    let mock = handshake(&opts).read(&[0x00, 0x00]).build();

    let mut session = open(&opts, mock).await;
    assert!(matches!(
        session.next_message().await,
        Err(BusError::Decode(_))
    ));
}

// =============================================================================
// Outbound flows
// =============================================================================

#[tokio::test]
async fn test_publish_qos0_has_no_packet_id() {
    let opts = options(0);
    let state = Publish {
        topic: STATE.into(),
        payload: Bytes::from_static(b"128"),
        ..Default::default()
    };

    let mock = handshake(&opts)
        .write(&wire(Packet::Publish(state)))
        .build();

    let mut session = open(&opts, mock).await;
    session
        .publish(
            STATE,
            Bytes::from_static(b"128"),
            QoS::AtMostOnce,
            false,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_exactly_once_flow() {
    let opts = options(0);
    let state = Publish {
        qos: QoS::ExactlyOnce,
        retain: true,
        topic: STATE.into(),
        packet_id: Some(1),
        payload: Bytes::from_static(b"5"),
        ..Default::default()
    };

    let mock = handshake(&opts)
        .write(&wire(Packet::Publish(state)))
        .read(&wire(Packet::PubRec(1)))
        .write(&wire(Packet::PubRel(1)))
        .read(&wire(Packet::PubComp(1)))
        .build();

    let mut session = open(&opts, mock).await;
    session
        .publish(STATE, Bytes::from_static(b"5"), QoS::ExactlyOnce, true)
        .await
        .unwrap();

    // drives PUBREC/PUBCOMP, then sees the stream end
    assert!(matches!(
        session.next_message().await,
        Err(BusError::Closed)
    ));
}

// =============================================================================
// Keep alive
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_keepalive_ping() {
    let opts = options(5);
    let message = publish(DEVICE_SET, b"1", QoS::AtMostOnce, None);

    let mock = handshake(&opts)
        .write(&wire(Packet::PingReq))
        .read(&wire(Packet::PingResp))
        .read(&wire(Packet::Publish(message.clone())))
        .build();

    let mut session = open(&opts, mock).await;
    assert_eq!(session.next_message().await.unwrap(), Message::from(message));
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_timeout_without_pingresp() {
    let opts = options(5);

    let mock = handshake(&opts)
        .write(&wire(Packet::PingReq))
        .wait(Duration::from_secs(60))
        .build();

    let mut session = open(&opts, mock).await;
    assert!(matches!(
        session.next_message().await,
        Err(BusError::Timeout)
    ));
}

#[tokio::test]
async fn test_packet_ids_skip_zero() {
    let opts = options(0);
    let mut session = open(&opts, handshake(&opts).build()).await;
    session.next_packet_id = u16::MAX;
    assert_eq!(session.next_packet_id(), u16::MAX);
    assert_eq!(session.next_packet_id(), 1);
}
