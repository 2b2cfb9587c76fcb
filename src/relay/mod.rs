pub mod model;
pub mod transform;

#[cfg(test)]
pub(crate) mod fixtures;

use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::consumer::{BugzillaConsumer, ConsumerError, MessageHandler, StopHandle};
use crate::identity::{Directory, IdentityResolver};
use crate::publisher::{OutboundMessage, PublishError, Publisher};
use crate::schema;
use crate::utils::timing::measure_execution;
use crate::wire::session::Connector;

use transform::{classify, Classification, Topic, TransformError};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct RelaySettings {
    pub products: Vec<String>,
    pub bz4compat: bool,
    pub weburl_base: String,
    pub list_domain: String,
    pub topic_prefix: Option<String>,
}

impl RelaySettings {
    pub fn topic_name(&self, topic: Topic) -> String {
        match self.topic_prefix.as_deref().filter(|prefix| !prefix.is_empty()) {
            Some(prefix) => format!("{}.bugzilla.{topic}", prefix.trim_end_matches('.')),
            None => format!("bugzilla.{topic}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("failed to publish message {id}: {source}")]
    Publish {
        id: uuid::Uuid,
        #[source]
        source: PublishError,
    },
}

/// Turns queue notifications into bus messages.
pub struct MessageRelay<P, D> {
    publisher: P,
    resolver: IdentityResolver<D>,
    settings: RelaySettings,
}

impl<P: Publisher, D: Directory> MessageRelay<P, D> {
    pub fn new(publisher: P, resolver: IdentityResolver<D>, settings: RelaySettings) -> Self {
        Self {
            publisher,
            resolver,
            settings,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn on_stomp_message(&self, body: Value, headers: &Map<String, Value>) -> Result<(), RelayError> {
        let (topic, body) = match classify(body, headers, &self.settings, &self.resolver)? {
            Classification::Dropped(reason) => {
                debug!(%reason, "DROP");
                return Ok(());
            }
            Classification::Publish { topic, body } => (topic, body),
        };

        debug!(bug_id = body.bug.id, "Republishing #{}", body.bug.id);
        let message = OutboundMessage::new(self.settings.topic_name(topic), body);

        match self.publisher.publish(&message) {
            Ok(()) => {}
            Err(PublishError::Rejected { message: reason }) => {
                warn!(message_id = %message.id, "broker rejected message {}: {reason}", message.id);
                return Ok(());
            }
            Err(PublishError::Connection(source)) => {
                warn!(message_id = %message.id, "error sending message {}: {source}", message.id);
                return Ok(());
            }
            Err(source) => {
                return Err(RelayError::Publish {
                    id: message.id,
                    source,
                });
            }
        }

        self.log_published(&message);
        Ok(())
    }

    fn log_published(&self, message: &OutboundMessage) {
        let body = &message.body;
        let user = body
            .agent_name
            .clone()
            .unwrap_or_else(|| self.resolver.display_name(&body.event.user.login));

        info!(
            message_id = %message.id,
            topic = %message.topic,
            url = %schema::url(body),
            product = schema::product_name(body),
            packages = ?schema::packages(body),
            usernames = ?body.usernames,
            "{}",
            schema::summary(body, &user)
        );
        debug!(
            message_id = %message.id,
            assigned_to = schema::assigned_to_email(body),
            agent_avatar = %schema::agent_avatar(body),
            app_icon = schema::app_icon(),
            "Published message presentation details"
        );
    }
}

impl<P: Publisher, D: Directory> MessageHandler for MessageRelay<P, D> {
    type Error = RelayError;

    fn on_message(&mut self, body: Value, headers: &Map<String, Value>) -> Result<(), RelayError> {
        measure_execution("relay.on_message", || self.on_stomp_message(body, headers))
    }
}

/// Keeps the consumer running until its stop handle fires. Lost
/// connections are retried after `reconnect_delay`; any other failure ends
/// the loop.
pub fn run_until_stopped<C, H>(
    consumer: &mut BugzillaConsumer<C, H>,
    reconnect_delay: Duration,
) -> Result<(), ConsumerError>
where
    C: Connector,
    H: MessageHandler,
{
    let stop = consumer.stop_handle();

    while !stop.is_stopped() {
        match consumer.consume() {
            Ok(()) => {}
            Err(failure) if failure.is_connection_failure() => {
                warn!(
                    error = %failure,
                    reconnect_delay_ms = reconnect_delay.as_millis() as u64,
                    "Lost connection to STOMP broker, reconnecting"
                );
                sleep_unless_stopped(&stop, reconnect_delay);
            }
            Err(failure) => {
                error!(error = %failure, "STOMP consumer failed");
                return Err(failure);
            }
        }
    }

    Ok(())
}

fn sleep_unless_stopped(stop: &StopHandle, delay: Duration) {
    let deadline = Instant::now() + delay;
    loop {
        if stop.is_stopped() {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(STOP_POLL_INTERVAL));
    }
}
