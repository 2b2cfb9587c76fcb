use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::relay::model::{BugRecord, EventRecord};
use crate::wire::session::{Connector, SessionError, StompSession};

pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a republished notification.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundBody {
    pub bug: BugRecord,
    pub event: EventRecord,
    /// Non-bug object (comment, attachment, ...) keyed by its type.
    pub object: Option<(String, Map<String, Value>)>,
    pub headers: Map<String, Value>,
    pub agent_name: Option<String>,
    pub usernames: Vec<String>,
}

impl Serialize for OutboundBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("bug", &self.bug)?;
        map.serialize_entry("event", &self.event)?;
        if let Some((object_type, object)) = &self.object {
            map.serialize_entry(object_type, object)?;
        }
        map.serialize_entry("headers", &self.headers)?;
        map.serialize_entry("agent_name", &self.agent_name)?;
        map.serialize_entry("usernames", &self.usernames)?;
        map.end()
    }
}

#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub topic: String,
    pub body: OutboundBody,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, body: OutboundBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            body,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker rejected the message: {message}")]
    Rejected { message: String },
    #[error("bus connection failed: {0}")]
    Connection(#[source] SessionError),
    #[error("failed to encode message body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

pub trait Publisher {
    fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for &P {
    fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        (**self).publish(message)
    }
}

#[derive(Clone, Debug)]
pub struct StompPublisherConfig {
    pub destination_prefix: String,
    pub receipt_timeout: Duration,
}

/// Publishes onto a STOMP-speaking bus over its own session, connecting
/// lazily and reconnecting on the next publish after a failure.
pub struct StompPublisher<C> {
    session: Mutex<StompSession<C>>,
    config: StompPublisherConfig,
}

impl<C: Connector> StompPublisher<C> {
    pub fn new(session: StompSession<C>, config: StompPublisherConfig) -> Self {
        Self {
            session: Mutex::new(session),
            config,
        }
    }

    pub fn destination_for(&self, topic: &str) -> String {
        format!("{}{topic}", self.config.destination_prefix)
    }

    pub fn close(&self) {
        let mut session = self.session.lock();
        if let Err(error) = session.disconnect() {
            debug!(%error, "Bus session did not disconnect cleanly");
        }
    }
}

impl<C: Connector> Publisher for StompPublisher<C> {
    fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&message.body)?;
        let destination = self.destination_for(&message.topic);
        let headers = vec![
            ("content-type".to_owned(), "application/json".to_owned()),
            ("message-id".to_owned(), message.id.to_string()),
            ("topic".to_owned(), message.topic.clone()),
            (
                "sent-at".to_owned(),
                message.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];

        let mut session = self.session.lock();
        if !session.is_connected() {
            session.connect().map_err(session_failure)?;
        }

        let result = session.send_with_receipt(&destination, headers, payload, self.config.receipt_timeout);
        if result.is_err() {
            // The broker closes the connection after an ERROR frame.
            if let Err(error) = session.disconnect() {
                debug!(%error, "Bus session reset after a failed publish");
            }
        }
        result.map_err(session_failure)?;

        debug!(message_id = %message.id, destination = %destination, "Message published to bus");
        Ok(())
    }
}

fn session_failure(error: SessionError) -> PublishError {
    match error {
        SessionError::Broker { message } => PublishError::Rejected { message },
        error if error.is_connection_failure() => PublishError::Connection(error),
        error @ SessionError::NotConnected => PublishError::Connection(error),
        other => PublishError::Other(other.to_string()),
    }
}
