/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
A module containing the core crate error enumeration, context structures, and conversion
definitions.
 */

use crate::mqtt::ConnectReturnCode;

use std::error::Error;
use std::fmt;

/// Additional details about an InvalidStateTransition error variant
#[derive(Debug)]
pub struct InvalidStateTransitionContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a DecodingFailure error variant
#[derive(Debug)]
pub struct DecodingFailureContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a ProtocolError error variant
#[derive(Debug)]
pub struct ProtocolErrorContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Additional details about a ConnackTimeout error variant
#[derive(Debug)]
pub struct ConnackTimeoutContext {
}

/// Additional details about a ConnectionRejected error variant
#[derive(Debug)]
pub struct ConnectionRejectedContext {

    /// Return code the broker sent in the rejecting CONNACK
    pub return_code: ConnectReturnCode,
}

/// Additional details about a PacketIdSpaceExhausted error variant
#[derive(Debug)]
pub struct PacketIdSpaceExhaustedContext {
}

/// Additional details about a StdIoError error variant
#[derive(Debug)]
pub struct StdIoErrorContext {
    source: Box<dyn Error + Send + Sync + 'static>
}

/// Basic error type for the entire basalt-mqtt crate.
#[derive(Debug)]
#[non_exhaustive]
pub enum BasaltError {

    /// Error emitted when a session operation is invoked from a state that does not permit it.
    /// Examples include connecting a session that is already connected and publishing through a
    /// session that has been disconnected.
    InvalidStateTransition(InvalidStateTransitionContext),

    /// Error encountered while attempting to decode an incoming MQTT packet.  Examples include
    /// variable length integer encodings that exceed four bytes and packet bodies shorter than
    /// their declared remaining length.
    DecodingFailure(DecodingFailureContext),

    /// Generic error emitted when the broker behaves in a way that is disallowed by the MQTT
    /// specification and cannot be safely ignored.  A malformed CONNACK is the most common
    /// trigger.
    ProtocolError(ProtocolErrorContext),

    /// Error emitted when the broker does not respond to a CONNECT packet within the configured
    /// timeout interval.
    ConnackTimeout(ConnackTimeoutContext),

    /// Error emitted when the broker explicitly rejects a connection attempt by responding with
    /// a CONNACK whose return code is non-zero.  The context carries the return code.
    ConnectionRejected(ConnectionRejectedContext),

    /// Error indicating no more packet ids are available for outbound packets.  Only possible
    /// with 65535 unacknowledged packets in flight.
    PacketIdSpaceExhausted(PacketIdSpaceExhaustedContext),

    /// Generic error wrapping std::io::Error raised by the underlying transport.
    StdIoError(StdIoErrorContext),
}

impl BasaltError {

    pub(crate) fn new_invalid_state_transition(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        BasaltError::InvalidStateTransition(
            InvalidStateTransitionContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_decoding_failure(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        BasaltError::DecodingFailure(
            DecodingFailureContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_protocol_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        BasaltError::ProtocolError(
            ProtocolErrorContext {
                source : source.into()
            }
        )
    }

    pub(crate) fn new_connack_timeout() -> Self {
        BasaltError::ConnackTimeout(
            ConnackTimeoutContext {
            }
        )
    }

    pub(crate) fn new_connection_rejected(return_code: ConnectReturnCode) -> Self {
        BasaltError::ConnectionRejected(
            ConnectionRejectedContext {
                return_code
            }
        )
    }

    pub(crate) fn new_packet_id_space_exhausted() -> Self {
        BasaltError::PacketIdSpaceExhausted(
            PacketIdSpaceExhaustedContext {
            }
        )
    }

    /// Constructs a StdIoError variant from an existing error.  Typically this should be a
    /// std::io::Error raised by the session's transport.
    pub fn new_std_io_error(source: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        BasaltError::StdIoError(
            StdIoErrorContext {
                source : source.into()
            }
        )
    }
}

impl Error for BasaltError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BasaltError::InvalidStateTransition(context) => {
                Some(context.source.as_ref())
            }
            BasaltError::DecodingFailure(context) => {
                Some(context.source.as_ref())
            }
            BasaltError::ProtocolError(context) => {
                Some(context.source.as_ref())
            }
            BasaltError::StdIoError(context) => {
                Some(context.source.as_ref())
            }
            _ => { None }
        }
    }
}

impl fmt::Display for BasaltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasaltError::InvalidStateTransition(_) => {
                write!(f, "session operation invoked from a state that does not permit it; source contains further details")
            }
            BasaltError::DecodingFailure(_) => {
                write!(f, "failure encountered while decoding an incoming MQTT packet")
            }
            BasaltError::ProtocolError(_) => {
                write!(f, "broker behavior disallowed by the mqtt spec")
            }
            BasaltError::ConnackTimeout(_) => {
                write!(f, "the broker did not respond to the connect packet within the configured timeout")
            }
            BasaltError::ConnectionRejected(context) => {
                write!(f, "the broker rejected the connect packet: {}", context.return_code)
            }
            BasaltError::PacketIdSpaceExhausted(_) => {
                write!(f, "packet id space exhausted - no packet ids remain unacknowledged-free")
            }
            BasaltError::StdIoError(_) => {
                write!(f, "generic error wrapper for std::io::Error raised by the transport; source contains further details")
            }
        }
    }
}

impl From<std::io::Error> for BasaltError {
    fn from(error: std::io::Error) -> Self {
        BasaltError::new_std_io_error(error)
    }
}

/// Crate-wide result type for functions that can fail
pub type BasaltResult<T> = Result<T, BasaltError>;
