//! MQTT Packet Decoder
//!
//! Decodes MQTT v3.1.1 packets from a byte buffer that may hold a
//! partial packet, a single packet or several packets back to back.

use std::sync::Arc;

use bytes::Bytes;

use super::{read_binary, read_string, read_u16, read_variable_int, DEFAULT_MAX_PACKET_SIZE};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, DecodeError, Packet, Publish, QoS, SubAck, SubAckCode,
    Subscribe, PROTOCOL_LEVEL, PROTOCOL_NAME,
};

/// MQTT Packet Decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum accepted remaining length
    max_packet_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Decode a packet from the buffer
    ///
    /// Returns `Ok(None)` until the buffer holds a complete packet, then
    /// `(packet, bytes_consumed)`.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };

        if remaining_length as usize > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let payload = &buf[1 + len_bytes..total_len];

        let packet = match packet_type {
            1 => self.decode_connect(flags, payload)?,
            2 => self.decode_connack(flags, payload)?,
            3 => self.decode_publish(flags, payload)?,
            4 => Packet::PubAck(self.decode_ack(flags, 0x00, payload)?),
            5 => Packet::PubRec(self.decode_ack(flags, 0x00, payload)?),
            6 => Packet::PubRel(self.decode_ack(flags, 0x02, payload)?),
            7 => Packet::PubComp(self.decode_ack(flags, 0x00, payload)?),
            8 => self.decode_subscribe(flags, payload)?,
            9 => self.decode_suback(flags, payload)?,
            12 => {
                self.expect_empty(flags, payload)?;
                Packet::PingReq
            }
            13 => {
                self.expect_empty(flags, payload)?;
                Packet::PingResp
            }
            14 => {
                self.expect_empty(flags, payload)?;
                Packet::Disconnect
            }
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn expect_empty(&self, flags: u8, payload: &[u8]) -> Result<(), DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        if !payload.is_empty() {
            return Err(DecodeError::MalformedPacket("unexpected payload"));
        }
        Ok(())
    }

    fn decode_connect(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let mut pos = 0;

        let (protocol_name, len) = read_string(payload)?;
        pos += len;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        if payload.len() < pos + 4 {
            return Err(DecodeError::InsufficientData);
        }
        let level = payload[pos];
        if level != PROTOCOL_LEVEL {
            return Err(DecodeError::InvalidProtocolVersion(level));
        }
        let connect_flags = payload[pos + 1];
        let keep_alive = u16::from_be_bytes([payload[pos + 2], payload[pos + 3]]);
        pos += 4;

        if connect_flags & 0x01 != 0 {
            return Err(DecodeError::MalformedPacket("reserved connect flag set"));
        }
        // Will messages are never sent by this client
        if connect_flags & 0x04 != 0 {
            return Err(DecodeError::MalformedPacket("will message not supported"));
        }
        let clean_session = connect_flags & 0x02 != 0;
        let has_username = connect_flags & 0x80 != 0;
        let has_password = connect_flags & 0x40 != 0;
        if has_password && !has_username {
            return Err(DecodeError::MalformedPacket("password without username"));
        }

        let (client_id, len) = read_string(&payload[pos..])?;
        let client_id = client_id.to_string();
        pos += len;

        let username = if has_username {
            let (username, len) = read_string(&payload[pos..])?;
            pos += len;
            Some(username.to_string())
        } else {
            None
        };

        let password = if has_password {
            let (password, len) = read_binary(&payload[pos..])?;
            pos += len;
            Some(Bytes::copy_from_slice(password))
        } else {
            None
        };

        if pos != payload.len() {
            return Err(DecodeError::MalformedPacket("trailing bytes in CONNECT"));
        }

        Ok(Packet::Connect(Box::new(Connect {
            client_id,
            clean_session,
            keep_alive,
            username,
            password,
        })))
    }

    fn decode_connack(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        if payload.len() != 2 {
            return Err(DecodeError::MalformedPacket("CONNACK must be 2 bytes"));
        }
        if payload[0] & 0xFE != 0 {
            return Err(DecodeError::MalformedPacket("reserved CONNACK flags set"));
        }

        let session_present = payload[0] & 0x01 != 0;
        let return_code = ConnectReturnCode::from_u8(payload[1])
            .ok_or(DecodeError::InvalidReturnCode(payload[1]))?;

        Ok(Packet::ConnAck(ConnAck {
            session_present,
            return_code,
        }))
    }

    fn decode_publish(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        let dup = (flags & 0x08) != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let retain = (flags & 0x01) != 0;

        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

        if qos == QoS::AtMostOnce && dup {
            return Err(DecodeError::MalformedPacket("DUP must be 0 for QoS 0"));
        }

        let (topic, mut pos) = read_string(payload)?;

        if topic.contains('+') || topic.contains('#') {
            return Err(DecodeError::MalformedPacket("topic contains wildcard"));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = read_u16(&payload[pos..])?;
            if id == 0 {
                return Err(DecodeError::MalformedPacket("packet id cannot be 0"));
            }
            pos += 2;
            Some(id)
        } else {
            None
        };

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic: Arc::from(topic),
            packet_id,
            payload: Bytes::copy_from_slice(&payload[pos..]),
        }))
    }

    fn decode_ack(&self, flags: u8, expected_flags: u8, payload: &[u8]) -> Result<u16, DecodeError> {
        if flags != expected_flags {
            return Err(DecodeError::InvalidFlags);
        }
        if payload.len() != 2 {
            return Err(DecodeError::MalformedPacket("acknowledgement must be 2 bytes"));
        }
        read_u16(payload)
    }

    fn decode_subscribe(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0x02 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(payload)?;
        let mut pos = 2;

        let mut filters = Vec::new();
        while pos < payload.len() {
            let (filter, len) = read_string(&payload[pos..])?;
            pos += len;

            let Some(&requested) = payload.get(pos) else {
                return Err(DecodeError::InsufficientData);
            };
            pos += 1;

            let qos = QoS::from_u8(requested).ok_or(DecodeError::InvalidQoS(requested))?;
            filters.push((filter.to_string(), qos));
        }

        if filters.is_empty() {
            return Err(DecodeError::MalformedPacket("SUBSCRIBE without filters"));
        }

        Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
    }

    fn decode_suback(&self, flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }

        let packet_id = read_u16(payload)?;
        let return_codes = payload[2..]
            .iter()
            .map(|&b| SubAckCode::from_u8(b).ok_or(DecodeError::InvalidReturnCode(b)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Packet::SubAck(SubAck {
            packet_id,
            return_codes,
        }))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
