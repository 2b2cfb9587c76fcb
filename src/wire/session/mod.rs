mod transport;

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::heartbeat::HeartbeatSink;
use crate::wire::codec::{encode_frame, encode_heartbeat, CodecError, Command, Decoded, Frame, FrameDecoder};
use crate::wire::handshake::{
    build_connect_frame, process_connected_frame, ConnectRequest, ConnectedInfo, HandshakeError,
    HeartbeatSpec, ProtocolVersion,
};

pub use transport::{Connection, Connector, TcpConnector};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK_BYTES: usize = 16 * 1024;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AckMode {
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientIndividual => "client-individual",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub host: String,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat_ms: u64,
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("already subscribed to '{destination}'")]
    AlreadySubscribed { destination: String },
    #[error("session is not connected")]
    NotConnected,
    #[error("transport I/O failure: {0}")]
    Connection(#[source] io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("timed out waiting for {what}")]
    Timeout { what: String },
    #[error("frame decoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("broker sent ERROR frame: {message}")]
    Broker { message: String },
    #[error("frame is missing required header '{header}'")]
    MissingHeader { header: &'static str },
}

impl SessionError {
    /// Failures after which the transport is gone and a fresh connection is
    /// the only way forward.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ConnectionClosed | Self::Timeout { .. } | Self::Codec(_)
        )
    }
}

/// One STOMP connection: connect, subscribe, receive, ack/nack, send.
///
/// Transport failures drop the connection and leave the session
/// `Disconnected`, so a later `connect` opens a fresh one through the
/// connector.
pub struct StompSession<C> {
    connector: C,
    config: SessionConfig,
    state: SessionState,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<SharedWriter>,
    decoder: FrameDecoder,
    connected: Option<ConnectedInfo>,
    subscriptions: BTreeMap<String, String>,
    next_subscription_id: u64,
    next_receipt_id: u64,
}

impl<C: Connector> StompSession<C> {
    pub fn new(connector: C, config: SessionConfig) -> Self {
        let decoder = FrameDecoder::new(config.max_frame_size);
        Self {
            connector,
            config,
            state: SessionState::Disconnected,
            reader: None,
            writer: None,
            decoder,
            connected: None,
            subscriptions: BTreeMap::new(),
            next_subscription_id: 0,
            next_receipt_id: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    #[cfg(test)]
    pub fn connected_info(&self) -> Option<&ConnectedInfo> {
        self.connected.as_ref()
    }

    pub fn version(&self) -> ProtocolVersion {
        self.connected
            .as_ref()
            .map(|info| info.version)
            .unwrap_or_default()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connect(&mut self) -> Result<ConnectedInfo, SessionError> {
        if self.is_connected() {
            return Err(SessionError::AlreadyConnected);
        }

        let connection = self.connector.connect().map_err(SessionError::Connection)?;
        self.reader = Some(connection.reader);
        self.writer = Some(Arc::new(Mutex::new(connection.writer)));
        self.decoder.clear();
        self.subscriptions.clear();

        let request = ConnectRequest {
            host: self.config.host.clone(),
            login: self.config.login.clone(),
            passcode: self.config.passcode.clone(),
            heartbeat: HeartbeatSpec::new(self.config.heartbeat_ms, 0),
        };
        if let Err(error) = self.write_frame(&build_connect_frame(&request)) {
            self.reset();
            return Err(error);
        }

        let deadline = Instant::now() + self.config.connect_timeout;
        let reply = loop {
            match self.read_frame() {
                Ok(Some(frame)) => break frame,
                Ok(None) if Instant::now() >= deadline => {
                    self.reset();
                    return Err(SessionError::Timeout {
                        what: "CONNECTED frame".to_owned(),
                    });
                }
                Ok(None) => continue,
                Err(error) => {
                    self.reset();
                    return Err(error);
                }
            }
        };

        let info = match process_connected_frame(&request, &reply) {
            Ok(info) => info,
            Err(error) => {
                self.reset();
                return Err(error.into());
            }
        };

        debug!(
            version = %info.version,
            server = info.server.as_deref().unwrap_or("unknown"),
            heartbeat_ms = info.outgoing_heartbeat.map(|interval| interval.as_millis() as u64).unwrap_or(0),
            "STOMP session established"
        );
        self.state = SessionState::Connected;
        self.connected = Some(info.clone());
        Ok(info)
    }

    pub fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<String, SessionError> {
        self.ensure_connected()?;
        if self.subscriptions.contains_key(destination) {
            return Err(SessionError::AlreadySubscribed {
                destination: destination.to_owned(),
            });
        }

        let id = format!("sub-{}", self.next_subscription_id);
        self.next_subscription_id += 1;
        let frame = Frame::new(Command::Subscribe)
            .with_header("destination", destination)
            .with_header("id", id.clone())
            .with_header("ack", ack.as_str());
        self.write_frame(&frame)?;
        self.subscriptions.insert(destination.to_owned(), id.clone());

        Ok(id)
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, destination: &str) -> bool {
        self.subscriptions.contains_key(destination)
    }

    /// Next frame from the broker, or `None` when the read timed out.
    /// Heart-beats are consumed silently.
    pub fn receive_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        self.ensure_connected()?;
        self.read_frame()
    }

    pub fn ack(&mut self, message: &Frame) -> Result<(), SessionError> {
        let frame = self.acknowledgement(Command::Ack, message)?;
        self.write_frame(&frame)
    }

    pub fn nack(&mut self, message: &Frame) -> Result<(), SessionError> {
        let frame = self.acknowledgement(Command::Nack, message)?;
        self.write_frame(&frame)
    }

    pub fn send(&mut self, destination: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> Result<(), SessionError> {
        self.ensure_connected()?;
        let mut frame = Frame::new(Command::Send).with_header("destination", destination);
        frame.headers.extend(headers);
        self.write_frame(&frame.with_body(body))
    }

    /// Sends a frame and blocks until the broker confirms it with a RECEIPT
    /// or refuses it with an ERROR. Unrelated frames are discarded.
    pub fn send_with_receipt(
        &mut self,
        destination: &str,
        mut headers: Vec<(String, String)>,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let receipt_id = format!("receipt-{}", self.next_receipt_id);
        self.next_receipt_id += 1;
        headers.push(("receipt".to_owned(), receipt_id.clone()));
        self.send(destination, headers, body)?;

        let deadline = Instant::now() + timeout;
        loop {
            match self.read_frame()? {
                Some(frame) if frame.command == Command::Receipt => {
                    if frame.header("receipt-id") == Some(receipt_id.as_str()) {
                        return Ok(());
                    }
                }
                Some(frame) if frame.command == Command::Error => {
                    return Err(SessionError::Broker {
                        message: broker_error_message(&frame),
                    });
                }
                Some(frame) => {
                    debug!(command = %frame.command, "Discarding frame while waiting for receipt");
                }
                None => {}
            }
            if Instant::now() >= deadline {
                self.reset();
                return Err(SessionError::Timeout {
                    what: format!("receipt '{receipt_id}'"),
                });
            }
        }
    }

    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Ok(());
        }

        let result = self.write_frame(&Frame::new(Command::Disconnect));
        self.reset();
        result
    }

    pub fn heartbeat_sink(&self) -> Option<Arc<dyn HeartbeatSink>> {
        self.writer
            .as_ref()
            .map(|writer| Arc::new(WireHeartbeat(Arc::clone(writer))) as Arc<dyn HeartbeatSink>)
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// STOMP 1.2 brokers key acknowledgements on the message's `ack` header;
    /// older ones on `message-id` plus `subscription`. `message-id` is sent
    /// on every version since some 1.2 brokers still look at it.
    fn acknowledgement(&self, command: Command, message: &Frame) -> Result<Frame, SessionError> {
        self.ensure_connected()?;
        let message_id = message.header("message-id");
        let mut frame = Frame::new(command);

        if self.version() >= ProtocolVersion::V1_2 {
            let ack_id = message
                .header("ack")
                .or(message_id)
                .ok_or(SessionError::MissingHeader { header: "ack" })?;
            frame = frame.with_header("id", ack_id);
        } else if message_id.is_none() {
            return Err(SessionError::MissingHeader {
                header: "message-id",
            });
        }

        if let Some(message_id) = message_id {
            frame = frame.with_header("message-id", message_id);
        }
        if let Some(subscription) = message.header("subscription") {
            frame = frame.with_header("subscription", subscription);
        }
        Ok(frame)
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let writer = self.writer.as_ref().ok_or(SessionError::NotConnected)?;
        let encoded = encode_frame(frame);
        let result = {
            let mut guard = writer.lock();
            guard.write_all(&encoded).and_then(|()| guard.flush())
        };

        if let Err(error) = result {
            warn!(command = %frame.command, %error, "Failed to write STOMP frame");
            self.reset();
            return Err(SessionError::Connection(error));
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        loop {
            match self.decoder.next_decoded() {
                Ok(Some(Decoded::Frame(frame))) => return Ok(Some(frame)),
                Ok(Some(Decoded::Heartbeat)) => continue,
                Ok(None) => {}
                Err(error) => {
                    self.reset();
                    return Err(error.into());
                }
            }

            let reader = self.reader.as_mut().ok_or(SessionError::NotConnected)?;
            let mut chunk = [0_u8; READ_CHUNK_BYTES];
            match reader.read(&mut chunk) {
                Ok(0) => {
                    self.reset();
                    return Err(SessionError::ConnectionClosed);
                }
                Ok(size) => self.decoder.extend(&chunk[..size]),
                Err(error)
                    if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Ok(None);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.reset();
                    return Err(SessionError::Connection(error));
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.reader = None;
        self.writer = None;
        self.connected = None;
        self.subscriptions.clear();
        self.decoder.clear();
    }
}

fn broker_error_message(frame: &Frame) -> String {
    frame
        .header("message")
        .map(str::to_owned)
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).trim().to_owned())
}

struct WireHeartbeat(SharedWriter);

impl HeartbeatSink for WireHeartbeat {
    fn beat(&self) -> io::Result<()> {
        let mut writer = self.0.lock();
        writer.write_all(encode_heartbeat())?;
        writer.flush()
    }
}


#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use crate::wire::codec::{Command, Frame, MAX_FRAME_SIZE_BYTES};

    use super::testing::{Inbound, ScriptedConnector};
    use super::{AckMode, SessionConfig, SessionError, SessionState, StompSession};

    fn config() -> SessionConfig {
        SessionConfig {
            host: "localhost".to_owned(),
            login: Some("relay".to_owned()),
            passcode: Some("secret".to_owned()),
            heartbeat_ms: 1_000,
            connect_timeout: Duration::from_millis(50),
            max_frame_size: MAX_FRAME_SIZE_BYTES,
        }
    }

    fn connected_frame(version: &str) -> Frame {
        Frame::new(Command::Connected)
            .with_header("server", "testing")
            .with_header("heart-beat", "1000,1000")
            .with_header("version", version)
    }

    fn connected_session(version: &str) -> (StompSession<ScriptedConnector>, ScriptedConnector) {
        let connector = ScriptedConnector::new();
        connector.transport.push_frame(connected_frame(version));
        let mut session = StompSession::new(connector.clone(), config());
        session.connect().expect("session should connect");
        (session, connector)
    }

    #[test]
    fn connect_sends_connect_frame_and_negotiates() {
        let (session, connector) = connected_session("1.2");

        let written = connector.transport.written_frames();
        assert_eq!(written[0].command, Command::Connect);
        assert_eq!(written[0].header("heart-beat"), Some("1000,0"));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(
            session.connected_info().and_then(|info| info.beat_period()),
            Some(Duration::from_millis(900))
        );
    }

    #[test]
    fn second_connect_reports_already_connected() {
        let (mut session, connector) = connected_session("1.2");

        let error = session.connect().expect_err("second connect should be refused");
        assert!(matches!(error, SessionError::AlreadyConnected));
        assert_eq!(connector.connects(), 1);
    }

    #[test]
    fn connect_times_out_without_connected_frame() {
        let connector = ScriptedConnector::new();
        let mut session = StompSession::new(connector, config());

        let error = session.connect().expect_err("silent broker should time out");
        assert!(matches!(error, SessionError::Timeout { .. }));
        assert!(error.is_connection_failure());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn refused_login_is_not_a_connection_failure() {
        let connector = ScriptedConnector::new();
        connector
            .transport
            .push_frame(Frame::new(Command::Error).with_header("message", "bad credentials"));
        let mut session = StompSession::new(connector, config());

        let error = session.connect().expect_err("refused login should fail");
        assert!(matches!(error, SessionError::Handshake(_)));
        assert!(!error.is_connection_failure());
    }

    #[test]
    fn subscribe_twice_reports_already_subscribed() {
        let (mut session, connector) = connected_session("1.2");

        let id = session
            .subscribe("/queue/testing", AckMode::ClientIndividual)
            .expect("first subscribe should pass");
        let error = session
            .subscribe("/queue/testing", AckMode::ClientIndividual)
            .expect_err("second subscribe should be refused");

        assert_eq!(id, "sub-0");
        assert!(matches!(error, SessionError::AlreadySubscribed { .. }));
        let subscribe_frames: Vec<_> = connector
            .transport
            .written_frames()
            .into_iter()
            .filter(|frame| frame.command == Command::Subscribe)
            .collect();
        assert_eq!(subscribe_frames.len(), 1);
        assert_eq!(subscribe_frames[0].header("destination"), Some("/queue/testing"));
        assert_eq!(subscribe_frames[0].header("ack"), Some("client-individual"));
    }

    #[test]
    fn receive_skips_heartbeats_and_reports_timeouts() {
        let (mut session, connector) = connected_session("1.2");
        connector.transport.push(Inbound::Bytes(b"\n\n".to_vec()));
        connector.transport.push(Inbound::Timeout);
        connector
            .transport
            .push_frame(Frame::new(Command::Message).with_header("message-id", "1312"));

        let first = session.receive_frame().expect("timeout is not an error");
        let second = session
            .receive_frame()
            .expect("frame should arrive")
            .expect("frame should be present");

        assert_eq!(first, None);
        assert_eq!(second.header("message-id"), Some("1312"));
    }

    #[test]
    fn closed_transport_disconnects_the_session() {
        let (mut session, connector) = connected_session("1.2");
        connector.transport.push(Inbound::Bytes(Vec::new()));

        let error = session.receive_frame().expect_err("closed stream should fail");

        assert!(matches!(error, SessionError::ConnectionClosed));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_subscribed("/queue/testing"));
    }

    #[test]
    fn io_failure_is_a_connection_failure() {
        let (mut session, connector) = connected_session("1.2");
        connector.transport.push(Inbound::Fail(io::ErrorKind::ConnectionReset));

        let error = session.receive_frame().expect_err("reset should fail");
        assert!(error.is_connection_failure());
        assert!(!session.is_connected());
    }

    #[test]
    fn stomp_1_2_acks_by_ack_header() {
        let (mut session, connector) = connected_session("1.2");
        let message = Frame::new(Command::Message)
            .with_header("message-id", "1312")
            .with_header("ack", "ack-77");

        session.ack(&message).expect("ack should be written");
        session.nack(&message).expect("nack should be written");

        let written = connector.transport.written_frames();
        let ack = &written[written.len() - 2];
        let nack = &written[written.len() - 1];
        assert_eq!(ack.command, Command::Ack);
        assert_eq!(ack.header("id"), Some("ack-77"));
        assert_eq!(nack.command, Command::Nack);
        assert_eq!(nack.header("id"), Some("ack-77"));
    }

    #[test]
    fn older_protocols_ack_by_message_id() {
        let (mut session, connector) = connected_session("1.1");
        let message = Frame::new(Command::Message)
            .with_header("message-id", "1312")
            .with_header("subscription", "sub-0");

        session.ack(&message).expect("ack should be written");

        let written = connector.transport.written_frames();
        let ack = written.last().expect("ack frame should be written");
        assert_eq!(ack.command, Command::Ack);
        assert_eq!(ack.header("message-id"), Some("1312"));
        assert_eq!(ack.header("subscription"), Some("sub-0"));
    }

    #[test]
    fn stomp_1_2_falls_back_to_message_id() {
        let (mut session, connector) = connected_session("1.2");

        session
            .ack(&Frame::new(Command::Message).with_header("message-id", "1312"))
            .expect("ack should be written");
        let error = session
            .nack(&Frame::new(Command::Message))
            .expect_err("nack without identifiers should fail");

        let written = connector.transport.written_frames();
        let ack = written.last().expect("ack frame should be written");
        assert_eq!(ack.header("id"), Some("1312"));
        assert_eq!(ack.header("message-id"), Some("1312"));
        assert!(matches!(error, SessionError::MissingHeader { .. }));
    }

    #[test]
    fn send_with_receipt_waits_for_matching_receipt() {
        let (mut session, connector) = connected_session("1.2");
        connector
            .transport
            .push_frame(Frame::new(Command::Receipt).with_header("receipt-id", "unrelated"));
        connector
            .transport
            .push_frame(Frame::new(Command::Receipt).with_header("receipt-id", "receipt-0"));

        session
            .send_with_receipt("/topic/x", Vec::new(), b"{}".to_vec(), Duration::from_secs(1))
            .expect("receipt should confirm the send");

        let sent = connector
            .transport
            .written_frames()
            .into_iter()
            .find(|frame| frame.command == Command::Send)
            .expect("SEND should be written");
        assert_eq!(sent.header("receipt"), Some("receipt-0"));
        assert_eq!(sent.body, b"{}".to_vec());
    }

    #[test]
    fn send_with_receipt_surfaces_broker_errors() {
        let (mut session, connector) = connected_session("1.2");
        connector
            .transport
            .push_frame(Frame::new(Command::Error).with_header("message", "no route"));

        let error = session
            .send_with_receipt("/topic/x", Vec::new(), b"{}".to_vec(), Duration::from_secs(1))
            .expect_err("ERROR should fail the send");

        assert!(matches!(error, SessionError::Broker { message } if message == "no route"));
    }

    #[test]
    fn disconnect_sends_frame_and_allows_reconnect() {
        let (mut session, connector) = connected_session("1.2");

        session.disconnect().expect("disconnect should pass");
        connector.transport.push_frame(connected_frame("1.2"));
        session.connect().expect("reconnect should pass");

        assert!(connector
            .transport
            .written_frames()
            .iter()
            .any(|frame| frame.command == Command::Disconnect));
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    fn operations_require_a_connection() {
        let mut session = StompSession::new(ScriptedConnector::new(), config());

        assert!(matches!(session.receive_frame(), Err(SessionError::NotConnected)));
        assert!(matches!(
            session.subscribe("/queue/x", AckMode::ClientIndividual),
            Err(SessionError::NotConnected)
        ));
        assert!(session.disconnect().is_ok());
    }
}
