/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Configuration options that determine packet field values for the CONNECT packet a session
sends on each connection attempt, and the machinery that materializes them into wire bytes.
 */

use crate::encode::*;
use crate::mqtt::*;

pub(crate) const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 10;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;

/// Configuration options for a single connect attempt.
///
/// The client id configured here is advisory: a `Session` always overwrites it with its own
/// immutable identity so that in-flight state cannot be resumed under a different name.
#[derive(Debug, Clone)]
pub struct ConnectOptions {

    pub(crate) protocol_level: u8,

    pub(crate) clean_session: bool,

    pub(crate) keep_alive_seconds: u16,

    pub(crate) client_id: String,

    pub(crate) will_topic: String,

    pub(crate) will_message: Vec<u8>,

    pub(crate) will_qos: QualityOfService,

    pub(crate) will_retain: bool,

    pub(crate) username: String,

    pub(crate) password: Option<Vec<u8>>,

    pub(crate) connect_timeout_seconds: u64,

    pub(crate) ignore_pubacklike: bool,

    pub(crate) ignore_pubcomp: bool,
}

impl ConnectOptions {

    /// Creates a new builder object for ConnectOptions
    pub fn builder() -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new()
    }

    pub(crate) fn is_clean_session(&self) -> bool {
        self.clean_session
    }
}

impl Default for ConnectOptions {

    /// Creates a ConnectOptions object with default values: MQTT 3.1.1, a clean session, a ten
    /// second keep alive, and an empty client id (which not all brokers will honor).
    fn default() -> Self {
        ConnectOptions {
            protocol_level: 4,
            clean_session: true,
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            client_id: String::new(),
            will_topic: String::new(),
            will_message: Vec::new(),
            will_qos: QualityOfService::AtMostOnce,
            will_retain: false,
            username: String::new(),
            password: None,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            ignore_pubacklike: false,
            ignore_pubcomp: false,
        }
    }
}

/// A builder for connect attempt configuration.
///
/// Option values are validated as they are applied; an out-of-range value is a programmer
/// error and panics.
#[derive(Debug, Default)]
pub struct ConnectOptionsBuilder {
    options: ConnectOptions
}

impl ConnectOptionsBuilder {

    /// Creates a new builder object for ConnectOptions
    pub fn new() -> Self {
        ConnectOptionsBuilder {
            ..Default::default()
        }
    }

    /// Sets the protocol level requested of the broker.  4 is MQTT 3.1.1 and 5 is MQTT 5.
    pub fn with_protocol_level(mut self, protocol_level: u8) -> Self {
        if !(protocol_level == 4 || protocol_level == 5) {
            panic!("protocol level must be 4 (MQTT 3.1.1) or 5 (MQTT 5), got {}", protocol_level);
        }
        self.options.protocol_level = protocol_level;
        self
    }

    /// Sets whether the broker should discard any session state it holds for this client id.
    /// Connecting with `false` resumes a previous session and triggers retransmission of
    /// whatever this session still has in flight.
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.options.clean_session = clean_session;
        self
    }

    /// Sets the keep alive interval, in seconds, communicated to the broker.
    ///
    /// Values above 0xFF are rejected even though the wire field is 16 bits wide.
    pub fn with_keep_alive_seconds(mut self, keep_alive_seconds: u16) -> Self {
        if keep_alive_seconds > 0xFF {
            panic!("keep alive seconds cannot be larger than 0xff, got {:x}", keep_alive_seconds);
        }
        self.options.keep_alive_seconds = keep_alive_seconds;
        self
    }

    /// Sets the client id to request.  May be left empty to let the broker assign one.  Ignored
    /// when the options are passed to a `Session`, which substitutes its own identity.
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.options.client_id = client_id.to_string();
        self
    }

    /// Sets the topic the broker should publish the will message to when the connection drops
    /// without a DISCONNECT.  An empty topic means no will is registered.
    pub fn with_will_topic(mut self, will_topic: &str) -> Self {
        self.options.will_topic = will_topic.to_string();
        self
    }

    /// Sets the will message payload.  Only included in the CONNECT packet when a will topic
    /// has been set, even if empty.
    pub fn with_will_message(mut self, will_message: &[u8]) -> Self {
        self.options.will_message = will_message.to_vec();
        self
    }

    /// Sets the quality of service for the broker's delivery of the will message
    pub fn with_will_qos(mut self, will_qos: QualityOfService) -> Self {
        self.options.will_qos = will_qos;
        self
    }

    /// Sets whether the broker should retain the will message after publishing it
    pub fn with_will_retain(mut self, will_retain: bool) -> Self {
        self.options.will_retain = will_retain;
        self
    }

    /// Sets a user name the broker may use for authentication.  An empty value means absent.
    pub fn with_username(mut self, username: &str) -> Self {
        self.options.username = username.to_string();
        self
    }

    /// Sets opaque binary data the broker may use for authentication
    pub fn with_password(mut self, password: &[u8]) -> Self {
        self.options.password = Some(password.to_vec());
        self
    }

    /// Sets the number of seconds the session waits for a CONNACK before the connect attempt
    /// fails with a timeout
    pub fn with_connect_timeout_seconds(mut self, connect_timeout_seconds: u64) -> Self {
        self.options.connect_timeout_seconds = connect_timeout_seconds;
        self
    }

    /// Diagnostic switch: when set, the session drops inbound PUBACK and PUBREC packets
    /// without clearing in-flight state.  Exists to exercise retransmission against a real
    /// broker; has no place in production configuration.
    pub fn with_ignore_pubacklike(mut self, ignore_pubacklike: bool) -> Self {
        self.options.ignore_pubacklike = ignore_pubacklike;
        self
    }

    /// Diagnostic switch: when set, the session drops inbound PUBCOMP packets without clearing
    /// in-flight state
    pub fn with_ignore_pubcomp(mut self, ignore_pubcomp: bool) -> Self {
        self.options.ignore_pubcomp = ignore_pubcomp;
        self
    }

    /// Builds a new ConnectOptions object
    pub fn build(self) -> ConnectOptions {
        self.options
    }
}

/// A CONNECT exchange request, materialized from a set of options
pub(crate) struct ConnectRequest {
    pub(crate) options: ConnectOptions,
}

impl ConnectRequest {

    pub(crate) fn new(options: ConnectOptions) -> Self {
        ConnectRequest {
            options
        }
    }

    fn connect_flags(&self) -> u8 {
        let options = &self.options;
        let mut flags = 0u8;

        if options.clean_session {
            flags |= CONNECT_FLAG_CLEAN_SESSION;
        }

        if !options.will_topic.is_empty() {
            flags |= CONNECT_FLAG_WILL;
        }

        flags |= (options.will_qos as u8) << CONNECT_FLAG_WILL_QOS_SHIFT;

        if options.will_retain {
            flags |= CONNECT_FLAG_WILL_RETAIN;
        }

        if !options.username.is_empty() {
            flags |= CONNECT_FLAG_USERNAME;
        }

        if options.password.is_some() {
            flags |= CONNECT_FLAG_PASSWORD;
        }

        flags
    }

    /// Computes the payload portion of the packet's remaining length from the fields that are
    /// actually present: each included item contributes its content plus a two byte length
    /// prefix.  The will message is always included alongside a will topic, even when empty.
    fn payload_length(&self) -> usize {
        let options = &self.options;
        let mut length = 2 + options.client_id.len();

        if !options.will_topic.is_empty() {
            length += 2 + options.will_topic.len();
            length += 2 + options.will_message.len();
        }

        if !options.username.is_empty() {
            length += 2 + options.username.len();
        }

        if let Some(password) = &options.password {
            length += 2 + password.len();
        }

        length
    }

    /// Materializes the request into a framed message.  The variable header is always ten
    /// bytes; the payload fields follow in the order the MQTT spec requires: client id, will
    /// topic, will message, user name, password.
    pub(crate) fn make_message(&self) -> FramedMessage {
        let options = &self.options;
        let connect_flags = self.connect_flags();

        let mut body = Vec::with_capacity(10 + self.payload_length());

        // Connect variable part            Byte   Description
        //                                  ------ ----------------------------------------
        encode_length_prefixed_string("MQTT", &mut body); // (1-6)  Protocol Name
        body.push(options.protocol_level);                // (7)    Protocol Level
        body.push(connect_flags);                         // (8)    Connect Flags
        encode_u16(options.keep_alive_seconds, &mut body); // (9-10) Keep Alive Seconds

        encode_length_prefixed_string(&options.client_id, &mut body);

        if connect_flags & CONNECT_FLAG_WILL != 0 {
            encode_length_prefixed_string(&options.will_topic, &mut body);
            encode_length_prefixed_bytes(&options.will_message, &mut body);
        }

        if connect_flags & CONNECT_FLAG_USERNAME != 0 {
            encode_length_prefixed_string(&options.username, &mut body);
        }

        if connect_flags & CONNECT_FLAG_PASSWORD != 0 {
            if let Some(password) = &options.password {
                encode_length_prefixed_bytes(password, &mut body);
            }
        }

        FramedMessage::new(PACKET_TYPE_CONNECT << 4, body)
    }
}
