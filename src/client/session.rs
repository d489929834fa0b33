//! MQTT v3.1.1 session over a byte stream
//!
//! Implements a client that connects to an MQTT broker, subscribes,
//! publishes and keeps the connection alive. QoS 1 and 2 flows are
//! acknowledged in both directions, without retransmission: a session
//! that loses its connection is discarded along with its in-flight state.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{BusError, Connector, Message, Session};
use crate::codec::{Decoder, Encoder};
use crate::config::MqttConfig;
use crate::protocol::{Connect, Packet, Publish, QoS, SubAck, SubAckCode, Subscribe};

/// Parameters for opening a session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier
    pub client_id: String,
    /// Keep alive in seconds (0 disables pings)
    pub keep_alive: u16,
    /// Username and optional password
    pub credentials: Option<(String, Option<Bytes>)>,
    /// Bound on TCP connect, CONNACK and SUBACK waits
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &MqttConfig, device: &str) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id(device),
            keep_alive: config.keepalive,
            credentials: config.credentials(),
            connect_timeout: config.connect_timeout,
        }
    }

    pub(super) fn connect_packet(&self) -> Packet {
        let (username, password) = match &self.credentials {
            Some((user, pass)) => (Some(user.clone()), pass.clone()),
            None => (None, None),
        };
        Packet::Connect(Box::new(Connect {
            client_id: self.client_id.clone(),
            clean_session: true,
            keep_alive: self.keep_alive,
            username,
            password,
        }))
    }
}

/// Opens TCP sessions to a broker
#[derive(Debug, Clone)]
pub struct MqttConnector {
    options: ConnectOptions,
}

impl MqttConnector {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Session = MqttSession<TcpStream>;

    fn address(&self) -> String {
        format!("{}:{}", self.options.host, self.options.port)
    }

    async fn connect(&self) -> Result<Self::Session, BusError> {
        let stream = timeout(
            self.options.connect_timeout,
            TcpStream::connect((self.options.host.as_str(), self.options.port)),
        )
        .await
        .map_err(|_| BusError::Timeout)??;
        stream.set_nodelay(true)?;

        debug!("TCP connected to {}", self.address());

        MqttSession::handshake(stream, &self.options).await
    }
}

/// Framed packet I/O over a stream
struct Transport<S> {
    stream: S,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, packet: &Packet) -> Result<(), BusError> {
        self.write_buf.clear();
        self.encoder.encode(packet, &mut self.write_buf)?;
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next complete packet. Cancel safe: bytes already read
    /// stay buffered for the next call.
    async fn read_packet(&mut self) -> Result<Packet, BusError> {
        loop {
            if let Some((packet, used)) = self.decoder.decode(&self.read_buf)? {
                self.read_buf.advance(used);
                return Ok(packet);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(BusError::Closed);
            }
        }
    }
}

/// A connected MQTT session
pub struct MqttSession<S> {
    transport: Transport<S>,
    /// Messages that arrived while waiting for a SUBACK
    pending: VecDeque<Message>,
    /// Inbound QoS 2 packet ids waiting for PUBREL
    awaiting_rel: HashSet<u16>,
    pub(super) next_packet_id: u16,
    keep_alive: Option<Interval>,
    awaiting_pingresp: bool,
    response_timeout: Duration,
}

impl<S> MqttSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send CONNECT on `stream` and wait for an accepting CONNACK
    pub async fn handshake(stream: S, options: &ConnectOptions) -> Result<Self, BusError> {
        let keep_alive = (options.keep_alive > 0).then(|| {
            let period = Duration::from_secs(options.keep_alive as u64);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let mut session = Self {
            transport: Transport {
                stream,
                encoder: Encoder::new(),
                decoder: Decoder::new(),
                read_buf: BytesMut::with_capacity(4096),
                write_buf: BytesMut::with_capacity(256),
            },
            pending: VecDeque::new(),
            awaiting_rel: HashSet::new(),
            next_packet_id: 1,
            keep_alive,
            awaiting_pingresp: false,
            response_timeout: options.connect_timeout,
        };

        session.transport.send(&options.connect_packet()).await?;
        debug!("CONNECT sent as {}", options.client_id);

        let packet = timeout(options.connect_timeout, session.transport.read_packet())
            .await
            .map_err(|_| BusError::Timeout)??;

        match packet {
            Packet::ConnAck(ack) if ack.return_code.is_accepted() => {
                debug!("CONNACK received (session_present={})", ack.session_present);
                Ok(session)
            }
            Packet::ConnAck(ack) => Err(BusError::Rejected(ack.return_code)),
            _ => Err(BusError::Protocol("expected CONNACK")),
        }
    }

    pub(super) fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Service one packet from the broker, returning any application message it carries
    async fn handle_packet(&mut self, packet: Packet) -> Result<Option<Message>, BusError> {
        match packet {
            Packet::Publish(publish) => match (publish.qos, publish.packet_id) {
                (QoS::AtMostOnce, _) => Ok(Some(publish.into())),
                (QoS::AtLeastOnce, Some(id)) => {
                    self.transport.send(&Packet::PubAck(id)).await?;
                    Ok(Some(publish.into()))
                }
                (QoS::ExactlyOnce, Some(id)) => {
                    let first_delivery = self.awaiting_rel.insert(id);
                    self.transport.send(&Packet::PubRec(id)).await?;
                    if first_delivery {
                        Ok(Some(publish.into()))
                    } else {
                        debug!("Duplicate QoS 2 PUBLISH {} ignored", id);
                        Ok(None)
                    }
                }
                _ => Err(BusError::Protocol("PUBLISH without packet id")),
            },
            Packet::PubRel(id) => {
                self.awaiting_rel.remove(&id);
                self.transport.send(&Packet::PubComp(id)).await?;
                Ok(None)
            }
            Packet::PubRec(id) => {
                self.transport.send(&Packet::PubRel(id)).await?;
                Ok(None)
            }
            Packet::PubAck(id) | Packet::PubComp(id) => {
                debug!("Publish {} acknowledged", id);
                Ok(None)
            }
            Packet::PingResp => {
                debug!("PINGRESP received");
                self.awaiting_pingresp = false;
                Ok(None)
            }
            Packet::SubAck(ack) => {
                debug!("Unsolicited SUBACK {} ignored", ack.packet_id);
                Ok(None)
            }
            Packet::Connect(_)
            | Packet::ConnAck(_)
            | Packet::Subscribe(_)
            | Packet::PingReq
            | Packet::Disconnect => Err(BusError::Protocol("unexpected packet from broker")),
        }
    }

    async fn await_suback(&mut self, packet_id: u16) -> Result<SubAck, BusError> {
        loop {
            match self.transport.read_packet().await? {
                Packet::SubAck(ack) if ack.packet_id == packet_id => return Ok(ack),
                other => {
                    if let Some(message) = self.handle_packet(other).await? {
                        self.pending.push_back(message);
                    }
                }
            }
        }
    }
}

async fn tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl<S> Session for MqttSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn subscribe(&mut self, filters: &[(String, QoS)]) -> Result<(), BusError> {
        let packet_id = self.next_packet_id();
        self.transport
            .send(&Packet::Subscribe(Subscribe {
                packet_id,
                filters: filters.to_vec(),
            }))
            .await?;

        let ack = timeout(self.response_timeout, self.await_suback(packet_id))
            .await
            .map_err(|_| BusError::Timeout)??;

        if ack.return_codes.len() != filters.len() {
            return Err(BusError::Protocol("SUBACK return code count mismatch"));
        }
        for ((filter, _), code) in filters.iter().zip(&ack.return_codes) {
            match code {
                SubAckCode::Granted(qos) => debug!("Subscription {} granted at QoS {}", filter, qos),
                SubAckCode::Failure => warn!("Broker refused subscription to {}", filter),
            }
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        let packet_id = (qos != QoS::AtMostOnce).then(|| self.next_packet_id());
        self.transport
            .send(&Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic: Arc::from(topic),
                packet_id,
                payload,
            }))
            .await
    }

    async fn next_message(&mut self) -> Result<Message, BusError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }

            tokio::select! {
                packet = self.transport.read_packet() => {
                    if let Some(message) = self.handle_packet(packet?).await? {
                        return Ok(message);
                    }
                }

                _ = tick(&mut self.keep_alive) => {
                    if self.awaiting_pingresp {
                        return Err(BusError::Timeout);
                    }
                    self.awaiting_pingresp = true;
                    self.transport.send(&Packet::PingReq).await?;
                }
            }
        }
    }
}
