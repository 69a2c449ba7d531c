/*
 * Copyright Bret Ambrose. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0.
 */

/*!
The session: a long-lived MQTT 3.1.1 protocol driver that owns the wire codec, the in-flight
bookkeeping, and the concurrent read/write loops for the publisher side of the protocol.

A session may span several connects to a broker.  It keeps the packet ids and packets still
"in flight" across transports, which is what makes QoS 1 and QoS 2 retransmission on a
resumed session possible.  The session does not dial or close network connections; the
caller injects any duplex byte stream and is responsible for its lifetime.
 */

use crate::decode::read_packet_body;
use crate::error::{BasaltError, BasaltResult};
use crate::inflight::InFlightTracker;
use crate::mqtt::*;
use crate::mqtt::connect::{ConnectOptions, ConnectRequest};
use crate::mqtt::publish::{PublishOptions, PublishRequest};

use log::*;
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::time::{sleep, sleep_until, Duration, Instant, Sleep};

const CHANNEL_CAPACITY: usize = 100;

/// An enum indicating where a session is in its lifecycle
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {

    /// The session has never been connected
    Initial,

    /// The session believes it is connected to a broker.  It knows nothing about the health
    /// of the underlying network connection.
    Connected,

    /// The session is waiting for its queues to drain as part of a disconnect
    Disconnecting,

    /// The session has been disconnected and may be connected again to resume
    Disconnected,
}

/// Configuration options applicable to a session as a whole, as opposed to a single connect
/// attempt.  The client id configured here is the identity every connect is made under.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {

    pub(crate) client_id: String,
}

impl SessionOptions {

    /// Creates a new builder object for SessionOptions
    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::new()
    }
}

/// A builder for session-wide configuration
#[derive(Debug, Default)]
pub struct SessionOptionsBuilder {
    options: SessionOptions
}

impl SessionOptionsBuilder {

    /// Creates a new builder object for SessionOptions
    pub fn new() -> Self {
        SessionOptionsBuilder {
            ..Default::default()
        }
    }

    /// Sets the client id the session presents to the broker on every connect.  May be left
    /// empty to let the broker assign one, though brokers are not required to honor that.
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.options.client_id = client_id.to_string();
        self
    }

    /// Builds a new SessionOptions object
    pub fn build(self) -> SessionOptions {
        self.options
    }
}

/// Per-connection channel endpoints retained by the session for coordinating shutdown with
/// its reader, dispatcher, and writer tasks
struct SessionLinks {
    stop_after: mpsc::Sender<u64>,
    stopped: mpsc::Receiver<()>,
    to_broker: mpsc::Sender<FramedMessage>,
    drained: mpsc::Receiver<()>,
}

struct SessionCore<T> where T : AsyncRead + AsyncWrite + Send + Sync + 'static {
    state: SessionState,
    stream: Option<T>,
    in_flight: Option<Arc<InFlightTracker>>,
    links: Option<SessionLinks>,
}

/// A client session that may span several connects to an MQTT broker.
///
/// The session requires a duplex byte stream to operate and takes ownership of it on
/// connect.  After a disconnect, a new transport can be injected with
/// [`reestablish`](Session::reestablish) and the session connected again with
/// `clean_session` false to continue with the same packets in flight.
pub struct Session<T> where T : AsyncRead + AsyncWrite + Send + Sync + 'static {
    client_id: String,
    core: RwLock<SessionCore<T>>,
}

impl<T> Session<T> where T : AsyncRead + AsyncWrite + Send + Sync + 'static {

    /// Creates a session from session-wide options and an initial transport
    pub fn new(options: SessionOptions, stream: T) -> Self {
        Session {
            client_id: options.client_id,
            core: RwLock::new(SessionCore {
                state: SessionState::Initial,
                stream: Some(stream),
                in_flight: None,
                links: None,
            }),
        }
    }

    /// Returns the session's current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.core.read().await.state
    }

    /// Installs a new transport on the session without touching its state or in-flight
    /// bookkeeping.  Only meaningful after a disconnect, before connecting again to resume a
    /// non-clean session; a session whose quality of service needs are satisfied by QoS 0 can
    /// simply be replaced instead.
    pub async fn reestablish(&self, stream: T) {
        let mut core = self.core.write().await;
        core.stream = Some(stream);
    }

    /// Connects to the broker and returns after a CONNACK has been received and validated.
    ///
    /// The client id in the given options is ignored; the session substitutes its own so that
    /// in-flight state can never be resumed under a different identity.  Connecting with
    /// `clean_session` false retransmits every packet still waiting for an acknowledgement,
    /// PUBLISH packets with the DUP bit set.
    pub async fn connect(&self, options: ConnectOptions) -> BasaltResult<()> {
        // There is no atomic upgrade from a shared lock to an exclusive one, and releasing a
        // read lock before taking the write lock leaves a gap where the state can change, so
        // state transitions always take the write lock.
        let mut core = self.core.write().await;

        if !(core.state == SessionState::Initial || core.state == SessionState::Disconnected) {
            return Err(BasaltError::new_invalid_state_transition("cannot connect while the session is disconnecting or already connected"));
        }

        if core.stream.is_none() {
            panic!("session requires a transport to operate");
        }

        let mut options = options;
        options.client_id = self.client_id.clone();

        let clean_session = options.is_clean_session();
        if core.in_flight.is_none() || clean_session {
            core.in_flight = Some(Arc::new(InFlightTracker::new()));
        }

        let ignore_pubacklike = options.ignore_pubacklike;
        let ignore_pubcomp = options.ignore_pubcomp;
        let connect_timeout = Duration::from_secs(options.connect_timeout_seconds);
        let message = ConnectRequest::new(options).make_message();

        let stream = core.stream.take().unwrap();
        let (mut read_half, mut write_half) = split(stream);

        debug!("session - connect - sending CONNECT for client \"{}\"", self.client_id);

        // MQTT 3.1.1 leaves "reasonable time" for the CONNACK open; the deadline is enforced
        // by racing the handshake against a timer, first completion wins.
        tokio::select! {
            () = sleep(connect_timeout) => {
                info!("session - connect - timed out waiting for CONNACK");
                return Err(BasaltError::new_connack_timeout());
            }
            result = perform_connect_handshake(&mut read_half, &mut write_half, &message) => {
                result?;
            }
        }

        core.state = SessionState::Connected;

        let in_flight = core.in_flight.as_ref().unwrap().clone();

        let (messages_sender, messages_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_after_sender, stop_after_receiver) = mpsc::channel(1);
        let (stopped_sender, stopped_receiver) = mpsc::channel(1);
        let (to_broker_sender, to_broker_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (drained_sender, drained_receiver) = mpsc::channel(1);

        debug!("session - connect - starting reader and dispatcher tasks");
        tokio::spawn(run_reader(read_half, messages_sender));

        let dispatcher = AckDispatcher {
            in_flight: in_flight.clone(),
            to_broker: to_broker_sender.clone(),
            ignore_pubacklike,
            ignore_pubcomp,
        };
        tokio::spawn(run_dispatcher(messages_receiver, stop_after_receiver, stopped_sender, dispatcher));

        // On resume, everything still waiting goes out again before the writer task takes
        // sole ownership of the transport.  The tracker lock is held for the whole walk, so
        // the retransmission order is exactly the original enqueue order.
        if !clean_session {
            let mut retransmissions = Vec::new();
            in_flight.for_each_waiting(|packet_id, waiting_message| {
                debug!("session - connect - resending message with packet id {}", packet_id);
                retransmissions.push(waiting_message.to_bytes_as_duplicate());
            });
            for bytes in retransmissions {
                if let Err(error) = write_half.write_all(&bytes).await {
                    error!("session - connect - error while resending an in-flight message: {}", error);
                }
            }
        }

        debug!("session - connect - starting writer task");
        tokio::spawn(run_writer(write_half, to_broker_receiver, drained_sender));

        core.links = Some(SessionLinks {
            stop_after: stop_after_sender,
            stopped: stopped_receiver,
            to_broker: to_broker_sender,
            drained: drained_receiver,
        });

        Ok(())
    }

    /// Publishes to the connected broker.  Returns as soon as the packet is enqueued for the
    /// writer task; acknowledgement handling for QoS 1 and QoS 2 happens asynchronously.
    pub async fn publish(&self, options: PublishOptions) -> BasaltResult<()> {
        let core = self.core.read().await;

        if core.state != SessionState::Connected {
            return Err(BasaltError::new_invalid_state_transition("publish requires a connected session"));
        }

        let in_flight = core.in_flight.as_ref().unwrap();
        let links = core.links.as_ref().unwrap();

        let mut options = options;
        let message =
            if options.qos != QualityOfService::AtMostOnce && options.packet_id == 0 {
                let packet_id = in_flight.next_packet_id()?;
                options.packet_id = packet_id;
                let message = PublishRequest::new(options).make_message();
                // registration must land before the bytes can reach the wire
                in_flight.register_waiting(packet_id, message.clone());
                message
            } else {
                PublishRequest::new(options).make_message()
            };

        if links.to_broker.send(message).await.is_err() {
            panic!("session - publish - outbound queue closed while connected");
        }
        Ok(())
    }

    /// Disconnects from the broker in an orderly fashion by sending a DISCONNECT packet.
    ///
    /// The dispatcher keeps processing acknowledgements for `grace_seconds` before the
    /// session stops reading, flushes its outbound queue, and transitions to Disconnected.
    /// Disconnecting a session that was never connected is a no-op.
    pub async fn disconnect(&self, grace_seconds: u64) -> BasaltResult<()> {
        debug!("session - disconnect");
        self.shutdown(grace_seconds, true).await
    }

    /// Performs the same queue flushing as [`disconnect`](Session::disconnect) but closes the
    /// outbound channel without sending a DISCONNECT packet.  From the broker's point of view
    /// the connection drops uncleanly, which triggers will publishing; this exists to test
    /// exactly that.
    pub async fn disconnect_without_message(&self, grace_seconds: u64) -> BasaltResult<()> {
        debug!("session - disconnect_without_message");
        self.shutdown(grace_seconds, false).await
    }

    async fn shutdown(&self, grace_seconds: u64, send_disconnect: bool) -> BasaltResult<()> {
        let mut core = self.core.write().await;

        if core.state == SessionState::Initial {
            // was never connected in the first place, no work to do
            return Ok(());
        }
        if core.state != SessionState::Connected {
            return Err(BasaltError::new_invalid_state_transition("disconnect requires a connected session"));
        }

        core.state = SessionState::Disconnecting;

        let SessionLinks { stop_after, mut stopped, to_broker, mut drained } = core.links.take().unwrap();

        debug!("session - disconnect - stopping the dispatcher with a {} second grace period", grace_seconds);
        let _ = stop_after.send(grace_seconds).await;
        let _ = stopped.recv().await;
        debug!("session - disconnect - dispatcher stopped");

        if send_disconnect {
            debug!("session - disconnect - sending DISCONNECT");
            let _ = to_broker.send(FramedMessage::new_disconnect()).await;
        }

        // Closing the outbound channel lets the writer finish whatever is queued and stop.
        // The dispatcher's sender clone is already gone, so this drop closes the channel.
        drop(to_broker);
        let _ = drained.recv().await;
        debug!("session - disconnect - outbound queue drained");

        core.state = SessionState::Disconnected;
        Ok(())
    }
}

/// Writes the CONNECT packet and reads/validates the four byte CONNACK response.  The first
/// packet a broker sends on a connection must be a CONNACK, so a fixed-size read is safe.
async fn perform_connect_handshake<T>(read_half: &mut ReadHalf<T>, write_half: &mut WriteHalf<T>, message: &FramedMessage) -> BasaltResult<()>
    where T : AsyncRead + AsyncWrite + Send + Sync + 'static {

    write_half.write_all(&message.to_bytes()).await?;

    let mut response = [0u8; 4];
    read_half.read_exact(&mut response).await?;

    if response[0] != CONNACK_FIRST_BYTE {
        return Err(BasaltError::new_protocol_error(format!("expected a CONNACK in response to CONNECT but received packet type {}", response[0] >> 4)));
    }
    if response[1] != 2 {
        return Err(BasaltError::new_protocol_error(format!("expected a CONNACK remaining length of 2 but received {}", response[1])));
    }

    let session_present = response[2] == 1;

    match ConnectReturnCode::try_from(response[3])? {
        ConnectReturnCode::Accepted => {
            debug!("session - connect - CONNACK(session_present={}) received", session_present);
            Ok(())
        }
        return_code => {
            info!("session - connect - broker rejected the connection: {}", return_code);
            Err(BasaltError::new_connection_rejected(return_code))
        }
    }
}

/// Reader task: frames inbound packets one at a time and forwards them to the dispatcher.
/// Exits silently when the transport reaches end of stream or a packet cannot be framed.
async fn run_reader<T>(mut read_half: ReadHalf<T>, messages: mpsc::Sender<FramedMessage>)
    where T : AsyncRead + AsyncWrite + Send + Sync + 'static {

    loop {
        let first_byte =
            match read_half.read_u8().await {
                Ok(first_byte) => first_byte,
                Err(_) => {
                    debug!("session - reader - end of stream on the broker connection, stopping");
                    break;
                }
            };

        match read_packet_body(&mut read_half, first_byte).await {
            Ok(message) => {
                if messages.send(message).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                debug!("session - reader - failed to frame an inbound packet: {}", error);
                break;
            }
        }
    }
}

/// Writer task: drains the outbound queue in enqueue order and signals `drained` once the
/// channel has been closed and everything queued has been written
async fn run_writer<T>(mut write_half: WriteHalf<T>, mut to_broker: mpsc::Receiver<FramedMessage>, drained: mpsc::Sender<()>)
    where T : AsyncRead + AsyncWrite + Send + Sync + 'static {

    while let Some(message) = to_broker.recv().await {
        if let Err(error) = write_half.write_all(&message.to_bytes()).await {
            error!("session - writer - error writing {} to the transport: {}", packet_type_to_str(message.packet_type()), error);
        }
    }

    let _ = drained.send(()).await;
    debug!("session - writer - outbound queue drained, stopping");
}

async fn conditional_wait(wait_option: Option<Sleep>) -> Option<()> {
    match wait_option {
        Some(timer) => {
            timer.await;
            Some(())
        },
        None => None,
    }
}

/// Dispatcher task: fans inbound acknowledgements out to their handlers and coordinates the
/// stop handshake.  A stop request arms a deferred timer rather than stopping immediately,
/// giving in-flight acknowledgements a grace period to arrive.
async fn run_dispatcher(
    mut messages: mpsc::Receiver<FramedMessage>,
    mut stop_after: mpsc::Receiver<u64>,
    stopped: mpsc::Sender<()>,
    dispatcher: AckDispatcher) {

    let mut stop_time: Option<Instant> = None;

    loop {
        let timeout = stop_time.map(sleep_until);

        tokio::select! {
            Some(grace_seconds) = stop_after.recv() => {
                debug!("session - dispatcher - stop requested with a {} second grace period", grace_seconds);
                stop_time = Some(Instant::now() + Duration::from_secs(grace_seconds));
            }
            Some(()) = conditional_wait(timeout) => {
                debug!("session - dispatcher - grace period elapsed, stopping");
                let _ = stopped.send(()).await;
                break;
            }
            Some(message) = messages.recv() => {
                dispatcher.dispatch(message).await;
            }
            else => {
                break;
            }
        }
    }
}

/// Handler state for the publisher-relevant subset of inbound packets
struct AckDispatcher {
    in_flight: Arc<InFlightTracker>,
    to_broker: mpsc::Sender<FramedMessage>,
    ignore_pubacklike: bool,
    ignore_pubcomp: bool,
}

impl AckDispatcher {

    async fn dispatch(&self, message: FramedMessage) {
        trace!("session - dispatcher - message type {}, length {}, bytes {:?}", packet_type_to_str(message.packet_type()), message.body.len(), message.body);

        match message.packet_type() {
            PACKET_TYPE_PUBACK => { self.process_publish_ack(&message); }
            PACKET_TYPE_PUBREC => { self.process_publish_received(&message).await; }
            PACKET_TYPE_PUBCOMP => { self.process_publish_complete(&message); }
            packet_type => {
                panic!("session - dispatcher - unhandled packet type {} - a publisher session expects only publish acknowledgements", packet_type_to_str(packet_type));
            }
        }
    }

    /// PUBACK ends a QoS 1 exchange: the waiting message is released and its packet id freed
    fn process_publish_ack(&self, message: &FramedMessage) {
        let packet_id = message.ack_packet_id();
        debug!("session - dispatcher - PUBACK({}) received", packet_id);

        if self.ignore_pubacklike {
            // exceptional test behavior, the in-flight set keeps growing
            debug!("session - dispatcher - PUBACK({}) ignored", packet_id);
            return;
        }

        self.in_flight.release_waiting(packet_id);
        self.in_flight.unset_bit(packet_id);
    }

    /// PUBREC is the midpoint of a QoS 2 exchange: the waiting PUBLISH is replaced by a
    /// PUBREL so that a future resume retransmits the right packet, and the PUBREL is queued
    /// for the broker.  The packet id stays reserved until PUBCOMP.
    async fn process_publish_received(&self, message: &FramedMessage) {
        let packet_id = message.ack_packet_id();
        debug!("session - dispatcher - PUBREC({}) received", packet_id);

        if self.ignore_pubacklike {
            debug!("session - dispatcher - PUBREC({}) ignored", packet_id);
            return;
        }

        let release = FramedMessage::new_pubrel(packet_id);
        self.in_flight.replace_waiting(packet_id, release.clone());
        if self.to_broker.send(release).await.is_err() {
            debug!("session - dispatcher - outbound queue closed, dropping PUBREL({})", packet_id);
        }
    }

    /// PUBCOMP ends a QoS 2 exchange: the waiting PUBREL is released and the packet id freed
    fn process_publish_complete(&self, message: &FramedMessage) {
        let packet_id = message.ack_packet_id();
        debug!("session - dispatcher - PUBCOMP({}) received", packet_id);

        if self.ignore_pubcomp {
            debug!("session - dispatcher - PUBCOMP({}) ignored", packet_id);
            return;
        }

        self.in_flight.release_waiting(packet_id);
        self.in_flight.unset_bit(packet_id);
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::testing::*;
    use assert_matches::assert_matches;
    use tokio::io::duplex;

    fn default_connect_options() -> ConnectOptions {
        ConnectOptions::builder()
            .with_connect_timeout_seconds(5)
            .build()
    }

    fn new_test_session(stream: tokio::io::DuplexStream) -> Session<tokio::io::DuplexStream> {
        let options = SessionOptions::builder()
            .with_client_id("MqttUnitTest")
            .build();
        Session::new(options, stream)
    }

    async fn in_flight_of<T>(session: &Session<T>) -> Arc<InFlightTracker>
        where T : AsyncRead + AsyncWrite + Send + Sync + 'static {
        session.core.read().await.in_flight.as_ref().unwrap().clone()
    }

    #[tokio::test]
    async fn session_connect_and_disconnect_qos0_immediate() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(default_connect_options()).await.unwrap();
        assert_eq!(SessionState::Connected, session.state().await);

        session.disconnect(0).await.unwrap();
        assert_eq!(SessionState::Disconnected, session.state().await);

        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        assert_eq!(24, body.len());

        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0xE0, first_byte);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn session_dirty_disconnect_sends_no_disconnect_packet() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(default_connect_options()).await.unwrap();
        session.disconnect_without_message(0).await.unwrap();
        assert_eq!(SessionState::Disconnected, session.state().await);

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);

        // closing our write side lets the session's reader exit, which releases the
        // transport; nothing but end-of-stream must follow the CONNECT
        server.shutdown().await.unwrap();
        let mut scratch = [0u8; 1];
        assert_eq!(0, server.read(&mut scratch).await.unwrap());
    }

    #[tokio::test]
    async fn session_connect_rejected_by_broker() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(5)).await.unwrap();

        let session = new_test_session(client);
        let result = session.connect(default_connect_options()).await;

        assert_matches!(result, Err(BasaltError::ConnectionRejected(context)) if context.return_code == ConnectReturnCode::NotAuthorized);
        assert_eq!(SessionState::Initial, session.state().await);

        let publish_result = session.publish(PublishOptions::builder().with_topic("t").build()).await;
        assert_matches!(publish_result, Err(BasaltError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn session_connect_times_out_without_connack() {
        let (client, _server) = duplex(4096);

        let session = new_test_session(client);
        let options = ConnectOptions::builder().with_connect_timeout_seconds(1).build();

        let started = std::time::Instant::now();
        let result = session.connect(options).await;

        assert_matches!(result, Err(BasaltError::ConnackTimeout(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(SessionState::Initial, session.state().await);
    }

    #[tokio::test]
    async fn session_connect_while_connected_fails() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(default_connect_options()).await.unwrap();

        let result = session.connect(default_connect_options()).await;
        assert_matches!(result, Err(BasaltError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn session_disconnect_in_initial_state_is_a_noop() {
        let (client, _server) = duplex(4096);

        let session = new_test_session(client);
        session.disconnect(0).await.unwrap();
        assert_eq!(SessionState::Initial, session.state().await);
    }

    #[tokio::test]
    async fn session_publish_qos1_completes_on_puback() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(default_connect_options()).await.unwrap();
        let in_flight = in_flight_of(&session).await;

        let options = PublishOptions::builder()
            .with_topic("t")
            .with_message(b"x")
            .with_qos(QualityOfService::AtLeastOnce)
            .build();
        session.publish(options).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);

        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0x32, first_byte);
        // topic "t" with its length prefix, then the first allocated packet id
        assert_eq!(&[0x00, 0x01, b't', 0x00, 0x01, b'x'], body.as_slice());
        assert_eq!(1, in_flight.waiting_count());
        assert!(in_flight.is_allocated(1));

        server.write_all(&ack_frame(PACKET_TYPE_PUBACK, 1)).await.unwrap();

        wait_until("puback clears the in-flight entry", || {
            in_flight.waiting_count() == 0 && !in_flight.is_allocated(1)
        }).await;

        session.disconnect(0).await.unwrap();
    }

    #[tokio::test]
    async fn session_qos1_resume_retransmits_with_dup() {
        // first pass: the PUBACK is ignored, so the publish stays in flight
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        let options = ConnectOptions::builder()
            .with_ignore_pubacklike(true)
            .with_connect_timeout_seconds(5)
            .build();
        session.connect(options).await.unwrap();
        let in_flight = in_flight_of(&session).await;

        session.publish(PublishOptions::builder()
            .with_topic("t")
            .with_message(b"x")
            .with_qos(QualityOfService::AtLeastOnce)
            .build()).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x32, first_byte);
        server.write_all(&ack_frame(PACKET_TYPE_PUBACK, 1)).await.unwrap();

        session.disconnect(1).await.unwrap();
        assert_eq!(1, in_flight.waiting_count());
        assert!(in_flight.is_allocated(1));

        // second pass: resuming the session resends the publish as a duplicate
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();
        session.reestablish(client).await;

        let options = ConnectOptions::builder()
            .with_clean_session(false)
            .with_connect_timeout_seconds(5)
            .build();
        session.connect(options).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0x32 | 0x08, first_byte);
        assert_eq!(&[0x00, 0x01, b't', 0x00, 0x01, b'x'], body.as_slice());

        server.write_all(&ack_frame(PACKET_TYPE_PUBACK, 1)).await.unwrap();

        wait_until("puback clears the resumed in-flight entry", || {
            in_flight.waiting_count() == 0 && !in_flight.is_allocated(1)
        }).await;

        session.disconnect(0).await.unwrap();
    }

    #[tokio::test]
    async fn session_publish_with_explicit_packet_id_is_not_tracked() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(default_connect_options()).await.unwrap();
        let in_flight = in_flight_of(&session).await;

        session.publish(PublishOptions::builder()
            .with_topic("t")
            .with_message(b"x")
            .with_qos(QualityOfService::AtLeastOnce)
            .with_packet_id(9)
            .build()).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0x32, first_byte);
        assert_eq!(&[0x00, 0x01, b't', 0x00, 0x09, b'x'], body.as_slice());

        // the caller took over id management, so nothing is in flight
        assert_eq!(0, in_flight.waiting_count());
        assert!(!in_flight.is_allocated(9));

        session.disconnect(0).await.unwrap();
    }

    #[tokio::test]
    async fn session_resume_retransmits_in_original_enqueue_order() {
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(ConnectOptions::builder()
            .with_ignore_pubacklike(true)
            .with_connect_timeout_seconds(5)
            .build()).await.unwrap();
        let in_flight = in_flight_of(&session).await;

        for message in [&b"first"[..], b"second", b"third"] {
            session.publish(PublishOptions::builder()
                .with_topic("t")
                .with_message(message)
                .with_qos(QualityOfService::AtLeastOnce)
                .build()).await.unwrap();
        }

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        for _ in 0..3 {
            let (first_byte, _) = read_frame(&mut server).await;
            assert_eq!(0x32, first_byte);
        }

        session.disconnect(0).await.unwrap();
        assert_eq!(3, in_flight.waiting_count());

        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();
        session.reestablish(client).await;
        session.connect(ConnectOptions::builder()
            .with_clean_session(false)
            .with_connect_timeout_seconds(5)
            .build()).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);

        for (packet_id, payload) in [(1u16, &b"first"[..]), (2, b"second"), (3, b"third")] {
            let (first_byte, body) = read_frame(&mut server).await;
            assert_eq!(0x32 | 0x08, first_byte);
            assert_eq!(&[0x00, packet_id as u8], &body[3..5]);
            assert_eq!(payload, &body[5..]);
        }

        session.disconnect(0).await.unwrap();
    }

    #[tokio::test]
    async fn session_qos2_three_pass_resumption() {
        // pass 1: PUBREC is dropped, the original PUBLISH stays in the waiting list
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();

        let session = new_test_session(client);
        session.connect(ConnectOptions::builder()
            .with_ignore_pubacklike(true)
            .with_connect_timeout_seconds(5)
            .build()).await.unwrap();
        let in_flight = in_flight_of(&session).await;

        session.publish(PublishOptions::builder()
            .with_topic("t")
            .with_message(b"x")
            .with_qos(QualityOfService::ExactlyOnce)
            .build()).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x34, first_byte);
        server.write_all(&ack_frame(PACKET_TYPE_PUBREC, 1)).await.unwrap();

        session.disconnect(1).await.unwrap();
        assert_eq!(1, in_flight.waiting_count());
        assert_eq!(0x34, in_flight.waiting_message(1).unwrap().fixed_header);

        // pass 2: the publish is resent as a duplicate; PUBREC replaces the waiting entry
        // with a PUBREL which goes out; the PUBCOMP is dropped
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();
        session.reestablish(client).await;

        session.connect(ConnectOptions::builder()
            .with_clean_session(false)
            .with_ignore_pubcomp(true)
            .with_connect_timeout_seconds(5)
            .build()).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x34 | 0x08, first_byte);

        server.write_all(&ack_frame(PACKET_TYPE_PUBREC, 1)).await.unwrap();

        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0x62, first_byte);
        assert_eq!(&[0x00, 0x01], body.as_slice());

        server.write_all(&ack_frame(PACKET_TYPE_PUBCOMP, 1)).await.unwrap();

        session.disconnect(1).await.unwrap();
        assert_eq!(1, in_flight.waiting_count());
        assert_eq!(0x62, in_flight.waiting_message(1).unwrap().fixed_header);
        assert!(in_flight.is_allocated(1));

        // pass 3: the stored PUBREL is retransmitted verbatim and PUBCOMP finally clears it
        let (client, mut server) = duplex(4096);
        server.write_all(&connack_frame(0)).await.unwrap();
        session.reestablish(client).await;

        session.connect(ConnectOptions::builder()
            .with_clean_session(false)
            .with_connect_timeout_seconds(5)
            .build()).await.unwrap();

        let (first_byte, _) = read_frame(&mut server).await;
        assert_eq!(0x10, first_byte);
        let (first_byte, body) = read_frame(&mut server).await;
        assert_eq!(0x62, first_byte);
        assert_eq!(&[0x00, 0x01], body.as_slice());

        server.write_all(&ack_frame(PACKET_TYPE_PUBCOMP, 1)).await.unwrap();

        wait_until("pubcomp clears the in-flight entry", || {
            in_flight.waiting_count() == 0 && !in_flight.is_allocated(1)
        }).await;

        session.disconnect(0).await.unwrap();
    }
}
