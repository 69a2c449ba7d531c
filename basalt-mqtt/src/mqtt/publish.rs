/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Configuration options for a single publish and the machinery that materializes them into a
PUBLISH packet.
 */

use crate::encode::*;
use crate::mqtt::*;

/// Configuration options for a single publish operation
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {

    pub(crate) topic: String,

    pub(crate) message: Vec<u8>,

    pub(crate) qos: QualityOfService,

    pub(crate) retain: bool,

    pub(crate) duplicate: bool,

    /// 16 bit packet id; zero is the sentinel for "let the session allocate one"
    pub(crate) packet_id: u16,
}

impl PublishOptions {

    /// Creates a new builder object for PublishOptions
    pub fn builder() -> PublishOptionsBuilder {
        PublishOptionsBuilder::new()
    }
}

/// A builder for publish configuration
#[derive(Debug, Default)]
pub struct PublishOptionsBuilder {
    options: PublishOptions
}

impl PublishOptionsBuilder {

    /// Creates a new builder object for PublishOptions
    pub fn new() -> Self {
        PublishOptionsBuilder {
            ..Default::default()
        }
    }

    /// Sets the topic the message is published to
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.options.topic = topic.to_string();
        self
    }

    /// Sets the message payload.  The payload is carried without a length prefix; its size is
    /// derived from the packet's remaining length on the receiving side.
    pub fn with_message(mut self, message: &[u8]) -> Self {
        self.options.message = message.to_vec();
        self
    }

    /// Sets the delivery quality of service
    pub fn with_qos(mut self, qos: QualityOfService) -> Self {
        self.options.qos = qos;
        self
    }

    /// Sets whether the broker should retain the message on the topic
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.options.retain = retain;
        self
    }

    /// Marks the publish as a duplicate delivery
    pub fn with_duplicate(mut self, duplicate: bool) -> Self {
        self.options.duplicate = duplicate;
        self
    }

    /// Sets an explicit packet id.  Zero (the default) asks the session to allocate a fresh id
    /// when the quality of service requires one.
    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.options.packet_id = packet_id;
        self
    }

    /// Builds a new PublishOptions object
    pub fn build(self) -> PublishOptions {
        self.options
    }
}

/// A PUBLISH exchange request, materialized from a set of options
pub(crate) struct PublishRequest {
    pub(crate) options: PublishOptions,
}

impl PublishRequest {

    pub(crate) fn new(options: PublishOptions) -> Self {
        PublishRequest {
            options
        }
    }

    /// Remaining length from the actually-present fields: topic with its length prefix, the
    /// packet id when qos requires one, and the raw payload.
    fn remaining_length(&self) -> usize {
        let options = &self.options;
        let mut length = 2 + options.topic.len() + options.message.len();

        if options.qos != QualityOfService::AtMostOnce {
            length += 2;
        }

        length
    }

    fn fixed_header_byte(&self) -> u8 {
        let options = &self.options;
        let mut first_byte = (PACKET_TYPE_PUBLISH << 4) | ((options.qos as u8) << PUBLISH_QOS_SHIFT);

        if options.retain {
            first_byte |= PUBLISH_FLAG_RETAIN;
        }

        if options.duplicate {
            first_byte |= PUBLISH_FLAG_DUPLICATE;
        }

        first_byte
    }

    pub(crate) fn make_message(&self) -> FramedMessage {
        let options = &self.options;
        let mut body = Vec::with_capacity(self.remaining_length());

        encode_length_prefixed_string(&options.topic, &mut body);

        if options.qos != QualityOfService::AtMostOnce {
            encode_u16(options.packet_id, &mut body);
        }

        body.extend_from_slice(&options.message);

        FramedMessage::new(self.fixed_header_byte(), body)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn publish_qos0_has_no_packet_id() {
        let options = PublishOptions::builder()
            .with_topic("test")
            .with_message(b"hello")
            .build();

        let message = PublishRequest::new(options).make_message();

        assert_eq!(0x30, message.fixed_header);
        assert_eq!(&[0x00, 0x04], &message.body[0..2]);
        assert_eq!(b"test", &message.body[2..6]);
        assert_eq!(b"hello", &message.body[6..]);
    }

    #[test]
    fn publish_qos1_includes_packet_id_after_topic() {
        let options = PublishOptions::builder()
            .with_topic("t")
            .with_message(b"x")
            .with_qos(QualityOfService::AtLeastOnce)
            .with_packet_id(7)
            .build();

        let message = PublishRequest::new(options).make_message();

        assert_eq!(0x32, message.fixed_header);
        assert_eq!(vec![0x00, 0x01, b't', 0x00, 0x07, b'x'], message.body);
    }

    #[test]
    fn publish_fixed_header_flag_combinations() {
        let options = PublishOptions::builder()
            .with_topic("t")
            .with_qos(QualityOfService::ExactlyOnce)
            .with_retain(true)
            .with_duplicate(true)
            .with_packet_id(1)
            .build();

        let message = PublishRequest::new(options).make_message();

        // type 3, dup bit, qos 2, retain bit
        assert_eq!(0x3D, message.fixed_header);
    }

    #[test]
    fn publish_remaining_length_counts_packet_id_only_above_qos0() {
        let qos0 = PublishRequest::new(PublishOptions::builder().with_topic("abc").with_message(b"12345").build());
        let qos2 = PublishRequest::new(PublishOptions::builder().with_topic("abc").with_message(b"12345").with_qos(QualityOfService::ExactlyOnce).with_packet_id(1).build());

        assert_eq!(10, qos0.make_message().body.len());
        assert_eq!(12, qos2.make_message().body.len());
    }
}
