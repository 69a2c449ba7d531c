/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
This crate provides a publisher-side client implementation of the MQTT 3.1.1 protocol.

MQTT is a publish/subscribe protocol commonly used in IoT use cases.  The central type here is
the [`Session`](session::Session): a protocol driver that issues CONNECT, PUBLISH (QoS 0/1/2),
and DISCONNECT exchanges against a broker over any duplex byte stream the caller injects —
typically a plaintext TCP connection to port 1883.  The session owns the packet id space and
the set of packets in flight, and may outlive a single transport: reconnecting with
`clean_session` false resumes the previous session and retransmits whatever was never fully
acknowledged, with the DUP bit set where the MQTT spec requires it.

Opening and closing network connections is deliberately left to the caller, as are the
subscribe-side flows of the protocol (SUBSCRIBE, PINGREQ, inbound PUBLISH dispatch).

# Example: publish a message over TCP

```no_run
use basalt_mqtt::{ConnectOptions, PublishOptions, QualityOfService, Session, SessionOptions, PORT_TCP_PLAINTEXT};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(("localhost", PORT_TCP_PLAINTEXT)).await?;

    let session_options = SessionOptions::builder()
        .with_client_id("HelloClient")
        .build();

    let session = Session::new(session_options, stream);
    session.connect(ConnectOptions::builder().build()).await?;

    session.publish(PublishOptions::builder()
        .with_topic("hello/world")
        .with_message(b"hi there")
        .with_qos(QualityOfService::AtLeastOnce)
        .build()).await?;

    // give acknowledgements one second to drain, then leave cleanly
    session.disconnect(1).await?;

    Ok(())
}
```
*/

#![warn(missing_docs)]

pub mod error;
pub mod mqtt;
pub mod session;

mod decode;
mod encode;
mod inflight;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{BasaltError, BasaltResult};
pub use mqtt::{convert_u8_to_quality_of_service, ConnectReturnCode, QualityOfService, PORT_TCP_PLAINTEXT};
pub use mqtt::connect::{ConnectOptions, ConnectOptionsBuilder};
pub use mqtt::publish::{PublishOptions, PublishOptionsBuilder};
pub use session::{Session, SessionOptions, SessionOptionsBuilder, SessionState};
