/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
Internal utilities to decode MQTT 3.1.1 packet primitives from an async byte stream
 */

use crate::error::{BasaltError, BasaltResult};
use crate::mqtt::FramedMessage;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads and decodes an MQTT variable length integer from the stream, consuming exactly the
/// bytes that belong to it.  Fails with a decoding error when a fifth byte would be required.
pub(crate) async fn read_variable_length_integer<R>(reader: &mut R) -> BasaltResult<usize> where R : AsyncRead + Unpin {
    let mut multiplier: usize = 1;
    let mut value: usize = 0;

    loop {
        let encoded_byte = reader.read_u8().await?;
        value += ((encoded_byte & 0x7F) as usize) * multiplier;

        if (encoded_byte & 0x80) == 0 {
            return Ok(value);
        }

        multiplier *= 128;
        if multiplier > 128 * 128 * 128 {
            return Err(BasaltError::new_decoding_failure("variable length integer encoding exceeds four bytes"));
        }
    }
}

/// Reads the remainder of a packet whose fixed header byte was already consumed: the remaining
/// length as a variable length integer, then exactly that many body bytes.
pub(crate) async fn read_packet_body<R>(reader: &mut R, first_byte: u8) -> BasaltResult<FramedMessage> where R : AsyncRead + Unpin {
    let remaining_length = read_variable_length_integer(reader).await?;

    let mut body = vec![0u8; remaining_length];
    reader.read_exact(&mut body).await?;

    Ok(FramedMessage::new(first_byte, body))
}
