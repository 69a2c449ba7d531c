/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Helpers for exercising sessions against the broker side of an in-memory duplex transport.
 */

use crate::decode::read_variable_length_integer;
use crate::mqtt::CONNACK_FIRST_BYTE;

use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};

/// A four byte CONNACK response with the given return code; zero means accepted
pub(crate) fn connack_frame(return_code: u8) -> Vec<u8> {
    vec![CONNACK_FIRST_BYTE, 0x02, 0x00, return_code]
}

/// A PUBACK-family acknowledgement frame for the given packet id
pub(crate) fn ack_frame(packet_type: u8, packet_id: u16) -> Vec<u8> {
    vec![packet_type << 4, 0x02, (packet_id >> 8) as u8, (packet_id & 0xFF) as u8]
}

/// Reads one complete packet from the broker side of the transport, returning the fixed
/// header byte and the body
pub(crate) async fn read_frame(stream: &mut DuplexStream) -> (u8, Vec<u8>) {
    let first_byte = stream.read_u8().await.expect("failed to read a fixed header byte");
    let remaining_length = read_variable_length_integer(stream).await.expect("failed to read a remaining length");

    let mut body = vec![0u8; remaining_length];
    stream.read_exact(&mut body).await.expect("failed to read a packet body");

    (first_byte, body)
}

/// Polls a condition that a background task is expected to make true shortly
pub(crate) async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", description);
}
