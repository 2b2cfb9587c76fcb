use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::wire::codec::{Command, Frame};

pub const ACCEPT_VERSIONS: &str = "1.0,1.1,1.2";
pub const HEART_BEAT_HEADER: &str = "heart-beat";

/// Beats are sent at this share of the negotiated interval so they land
/// before the peer's timeout.
pub const HEARTBEAT_SAFETY_FACTOR: f64 = 0.9;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    #[default]
    V1_0,
    V1_1,
    V1_2,
}

impl ProtocolVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            "1.2" => Some(Self::V1_2),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two numbers of a `heart-beat` header: how often the sender can
/// beat, and how often it wants to receive beats. Zero means never.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HeartbeatSpec {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartbeatSpec {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    pub fn parse(value: &str) -> Result<Self, HandshakeError> {
        let invalid = || HandshakeError::InvalidHeartbeat {
            value: value.to_owned(),
        };
        let (outgoing, incoming) = value.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            outgoing_ms: outgoing.trim().parse().map_err(|_| invalid())?,
            incoming_ms: incoming.trim().parse().map_err(|_| invalid())?,
        })
    }

    pub fn header_value(self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConnectRequest {
    pub host: String,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat: HeartbeatSpec,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectedInfo {
    pub version: ProtocolVersion,
    pub server: Option<String>,
    pub session: Option<String>,
    pub server_heartbeat: HeartbeatSpec,
    /// Interval at which this client must beat, if any.
    pub outgoing_heartbeat: Option<Duration>,
}

impl ConnectedInfo {
    pub fn beat_period(&self) -> Option<Duration> {
        self.outgoing_heartbeat.map(beat_period)
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum HandshakeError {
    #[error("broker refused connection: {message}")]
    Refused { message: String },
    #[error("expected CONNECTED frame, got {command}")]
    UnexpectedFrame { command: Command },
    #[error("unsupported protocol version '{version}'")]
    UnsupportedVersion { version: String },
    #[error("invalid heart-beat header '{value}'")]
    InvalidHeartbeat { value: String },
}

pub fn build_connect_frame(request: &ConnectRequest) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .with_header("accept-version", ACCEPT_VERSIONS)
        .with_header("host", request.host.clone());

    if let Some(login) = &request.login {
        frame = frame.with_header("login", login.clone());
    }
    if let Some(passcode) = &request.passcode {
        frame = frame.with_header("passcode", passcode.clone());
    }
    if request.heartbeat != HeartbeatSpec::default() {
        frame = frame.with_header(HEART_BEAT_HEADER, request.heartbeat.header_value());
    }

    frame
}

pub fn process_connected_frame(
    request: &ConnectRequest,
    frame: &Frame,
) -> Result<ConnectedInfo, HandshakeError> {
    match frame.command {
        Command::Connected => {}
        Command::Error => {
            return Err(HandshakeError::Refused {
                message: frame
                    .header("message")
                    .map(str::to_owned)
                    .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned()),
            });
        }
        command => return Err(HandshakeError::UnexpectedFrame { command }),
    }

    let version = match frame.header("version") {
        Some(raw) => ProtocolVersion::parse(raw).ok_or_else(|| HandshakeError::UnsupportedVersion {
            version: raw.to_owned(),
        })?,
        None => ProtocolVersion::V1_0,
    };
    let server_heartbeat = match frame.header(HEART_BEAT_HEADER) {
        Some(raw) => HeartbeatSpec::parse(raw)?,
        None => HeartbeatSpec::default(),
    };

    Ok(ConnectedInfo {
        version,
        server: frame.header("server").map(str::to_owned),
        session: frame.header("session").map(str::to_owned),
        server_heartbeat,
        outgoing_heartbeat: negotiate_outgoing(request.heartbeat, server_heartbeat),
    })
}

pub fn negotiate_outgoing(client: HeartbeatSpec, server: HeartbeatSpec) -> Option<Duration> {
    if client.outgoing_ms == 0 || server.incoming_ms == 0 {
        return None;
    }
    Some(Duration::from_millis(client.outgoing_ms.max(server.incoming_ms)))
}

pub fn beat_period(negotiated: Duration) -> Duration {
    negotiated.mul_f64(HEARTBEAT_SAFETY_FACTOR)
}
