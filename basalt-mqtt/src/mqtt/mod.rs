/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Module containing MQTT 3.1.1 control packet constants, spec enums, and the generic framed
message representation that the rest of the crate moves around.
 */

pub mod connect;
pub mod publish;

use crate::encode::*;
use crate::error::{BasaltError, BasaltResult};

use std::fmt;

pub(crate) const PACKET_TYPE_CONNECT: u8 = 1;
pub(crate) const PACKET_TYPE_CONNACK: u8 = 2;
pub(crate) const PACKET_TYPE_PUBLISH: u8 = 3;
pub(crate) const PACKET_TYPE_PUBACK: u8 = 4;
pub(crate) const PACKET_TYPE_PUBREC: u8 = 5;
pub(crate) const PACKET_TYPE_PUBREL: u8 = 6;
pub(crate) const PACKET_TYPE_PUBCOMP: u8 = 7;
pub(crate) const PACKET_TYPE_DISCONNECT: u8 = 14;

pub(crate) const CONNECT_FLAG_USERNAME: u8 = 1 << 7;
pub(crate) const CONNECT_FLAG_PASSWORD: u8 = 1 << 6;
pub(crate) const CONNECT_FLAG_WILL_RETAIN: u8 = 1 << 5;
pub(crate) const CONNECT_FLAG_WILL_QOS_SHIFT: u8 = 3;
pub(crate) const CONNECT_FLAG_WILL: u8 = 1 << 2;
pub(crate) const CONNECT_FLAG_CLEAN_SESSION: u8 = 1 << 1;

pub(crate) const PUBLISH_FLAG_DUPLICATE: u8 = 1 << 3;
pub(crate) const PUBLISH_FLAG_RETAIN: u8 = 1;
pub(crate) const PUBLISH_QOS_SHIFT: u8 = 1;

pub(crate) const CONNACK_FIRST_BYTE: u8 = PACKET_TYPE_CONNACK << 4;
pub(crate) const DISCONNECT_FIRST_BYTE: u8 = PACKET_TYPE_DISCONNECT << 4;

/* PUBREL carries the reserved flag bits 0010 in its fixed header */
pub(crate) const PUBREL_FIRST_BYTE: u8 = (PACKET_TYPE_PUBREL << 4) | 0x02;

/// Standard MQTT port over TCP for plaintext traffic
pub const PORT_TCP_PLAINTEXT: u16 = 1883;

pub(crate) fn packet_type_to_str(packet_type: u8) -> &'static str {
    match packet_type {
        PACKET_TYPE_CONNECT => { "CONNECT" }
        PACKET_TYPE_CONNACK => { "CONNACK" }
        PACKET_TYPE_PUBLISH => { "PUBLISH" }
        PACKET_TYPE_PUBACK => { "PUBACK" }
        PACKET_TYPE_PUBREC => { "PUBREC" }
        PACKET_TYPE_PUBREL => { "PUBREL" }
        PACKET_TYPE_PUBCOMP => { "PUBCOMP" }
        PACKET_TYPE_DISCONNECT => { "DISCONNECT" }
        _ => {
            "Unknown"
        }
    }
}

/// An enum indicating the quality of service of a publish delivery
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum QualityOfService {

    /// The message is delivered according to the capabilities of the underlying network. The
    /// message arrives at the receiver either once or not at all.
    #[default]
    AtMostOnce = 0,

    /// A level of service that ensures that the message arrives at the receiver at least once.
    AtLeastOnce = 1,

    /// A level of service that ensures that the message arrives at the receiver exactly once.
    ExactlyOnce = 2,
}

/// Converts a u8 to a QualityOfService, returning a protocol error for values outside 0-2
pub fn convert_u8_to_quality_of_service(value: u8) -> BasaltResult<QualityOfService> {
    match value {
        0 => { Ok(QualityOfService::AtMostOnce) }
        1 => { Ok(QualityOfService::AtLeastOnce) }
        2 => { Ok(QualityOfService::ExactlyOnce) }
        _ => {
            Err(BasaltError::new_protocol_error(format!("quality of service must be 0, 1, or 2, got {}", value)))
        }
    }
}

/// Return codes a broker may send in the final byte of a CONNACK packet
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectReturnCode {

    /// The connection was accepted and the session is usable
    Accepted = 0,

    /// The broker does not support the protocol level requested by the client
    UnacceptableProtocolVersion = 1,

    /// The client identifier is correctly formed but not allowed by the broker
    IdentifierRejected = 2,

    /// The network connection was made but the MQTT service is unavailable
    ServerUnavailable = 3,

    /// The data in the user name or password is malformed
    BadUsernameOrPassword = 4,

    /// The client is not authorized to connect
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = BasaltError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => { Ok(ConnectReturnCode::Accepted) }
            1 => { Ok(ConnectReturnCode::UnacceptableProtocolVersion) }
            2 => { Ok(ConnectReturnCode::IdentifierRejected) }
            3 => { Ok(ConnectReturnCode::ServerUnavailable) }
            4 => { Ok(ConnectReturnCode::BadUsernameOrPassword) }
            5 => { Ok(ConnectReturnCode::NotAuthorized) }
            _ => {
                Err(BasaltError::new_protocol_error(format!("connack return code out of range: {}", value)))
            }
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectReturnCode::Accepted => { write!(f, "connection accepted") }
            ConnectReturnCode::UnacceptableProtocolVersion => { write!(f, "connection refused - unacceptable protocol version") }
            ConnectReturnCode::IdentifierRejected => { write!(f, "connection refused - identifier rejected") }
            ConnectReturnCode::ServerUnavailable => { write!(f, "connection refused - server unavailable") }
            ConnectReturnCode::BadUsernameOrPassword => { write!(f, "connection refused - bad user name or password") }
            ConnectReturnCode::NotAuthorized => { write!(f, "connection refused - not authorized") }
        }
    }
}

/// A generic MQTT control packet: the fixed header byte plus every byte of the body.  The
/// remaining length field is not stored; it is derived from the body when writing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct FramedMessage {
    pub(crate) fixed_header: u8,
    pub(crate) body: Vec<u8>,
}

impl FramedMessage {

    pub(crate) fn new(fixed_header: u8, body: Vec<u8>) -> Self {
        FramedMessage {
            fixed_header,
            body
        }
    }

    pub(crate) fn new_disconnect() -> Self {
        FramedMessage::new(DISCONNECT_FIRST_BYTE, Vec::new())
    }

    pub(crate) fn new_pubrel(packet_id: u16) -> Self {
        let mut body = Vec::with_capacity(2);
        encode_u16(packet_id, &mut body);
        FramedMessage::new(PUBREL_FIRST_BYTE, body)
    }

    pub(crate) fn packet_type(&self) -> u8 {
        self.fixed_header >> 4
    }

    /// Serializes the message: fixed header byte, remaining length as a variable length
    /// integer, then the body.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.body.len() + 5);
        bytes.push(self.fixed_header);
        encode_variable_length_integer(self.body.len(), &mut bytes);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Serializes the message for retransmission.  A PUBLISH gets the DUP bit set on the
    /// serialized copy; the stored message is never mutated.  All other packet types are
    /// written unchanged since their wire form carries no DUP bit.
    pub(crate) fn to_bytes_as_duplicate(&self) -> Vec<u8> {
        let mut bytes = self.to_bytes();
        if self.packet_type() == PACKET_TYPE_PUBLISH {
            bytes[0] |= PUBLISH_FLAG_DUPLICATE;
        }
        bytes
    }

    /// Extracts the 16 bit big-endian packet id that forms the entire body of the PUBACK
    /// packet family.  Any other body length signals a protocol parse bug upstream.
    pub(crate) fn ack_packet_id(&self) -> u16 {
        if self.body.len() != 2 {
            panic!("{} expects a two byte packet id as its body - got {} byte(s)", packet_type_to_str(self.packet_type()), self.body.len());
        }
        ((self.body[0] as u16) << 8) | (self.body[1] as u16)
    }
}
