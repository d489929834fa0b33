//! MQTT Client
//!
//! The broker side of the bridge. [`Connector`] opens a [`Session`], and
//! a session is used for exactly one connection: any error ends it and
//! the caller reconnects with a fresh one.
//!
//! [`MqttConnector`] is the TCP implementation. The traits exist so the
//! bridge loop can be driven by an in-memory broker in tests.

mod session;

#[cfg(test)]
mod tests;

pub use session::{ConnectOptions, MqttConnector, MqttSession};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::protocol::{ConnectReturnCode, DecodeError, EncodeError, Publish, QoS};

/// Error type for broker communication
#[derive(Debug)]
pub enum BusError {
    /// Socket error
    Io(std::io::Error),
    /// Connect, CONNACK, SUBACK or PINGRESP did not arrive in time
    Timeout,
    /// The broker refused the connection
    Rejected(ConnectReturnCode),
    /// The broker sent bytes we could not decode
    Decode(DecodeError),
    /// A packet could not be encoded
    Encode(EncodeError),
    /// The broker broke the protocol flow
    Protocol(&'static str),
    /// The broker closed the connection
    Closed,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Io(e) => write!(f, "{}", e),
            BusError::Timeout => write!(f, "operation timed out"),
            BusError::Rejected(code) => write!(f, "connection refused: {}", code),
            BusError::Decode(e) => write!(f, "decode error: {}", e),
            BusError::Encode(e) => write!(f, "encode error: {}", e),
            BusError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            BusError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Io(e) => Some(e),
            BusError::Decode(e) => Some(e),
            BusError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        BusError::Io(e)
    }
}

impl From<DecodeError> for BusError {
    fn from(e: DecodeError) -> Self {
        BusError::Decode(e)
    }
}

impl From<EncodeError> for BusError {
    fn from(e: EncodeError) -> Self {
        BusError::Encode(e)
    }
}

/// Broad classification of a [`BusError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network or broker hiccup; retrying is expected to help
    Transient,
    /// The broker refused us for a reason retrying will not fix by itself
    /// (credentials, client id, protocol level)
    Rejected,
}

impl BusError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BusError::Rejected(code) if code.is_configuration_error() => FailureKind::Rejected,
            _ => FailureKind::Transient,
        }
    }
}

/// An application message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: Arc<str>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl From<Publish> for Message {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

/// Opens broker sessions
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Broker address, for logs
    fn address(&self) -> String;

    /// Connect and complete the CONNECT/CONNACK handshake
    async fn connect(&self) -> Result<Self::Session, BusError>;
}

/// One live broker connection
#[async_trait]
pub trait Session: Send {
    /// Subscribe to topic filters, each at its own QoS
    async fn subscribe(&mut self, filters: &[(String, QoS)]) -> Result<(), BusError>;

    /// Publish a message
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError>;

    /// Wait for the next application message, servicing keepalive and
    /// acknowledgements in the meantime
    async fn next_message(&mut self) -> Result<Message, BusError>;
}
