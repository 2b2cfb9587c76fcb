use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::heartbeat::{Heartbeat, HeartbeatError};
use crate::wire::codec::{Command, Frame};
use crate::wire::session::{AckMode, Connector, SessionError, StompSession};

pub const DEFAULT_QUEUE: &str = "/queue/fedora_from_esb";

/// Receives every decoded notification. Returning an error makes the
/// consumer nack the frame so the broker redelivers it.
pub trait MessageHandler {
    type Error: std::error::Error;

    fn on_message(&mut self, body: Value, headers: &Map<String, Value>) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to start heartbeat: {0}")]
    Heartbeat(#[from] HeartbeatError),
}

impl ConsumerError {
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Session(error) if error.is_connection_failure())
    }
}

#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

pub struct BugzillaConsumer<C, H> {
    session: StompSession<C>,
    handler: H,
    queue: String,
    stopped: Arc<AtomicBool>,
    heartbeat: Option<Heartbeat>,
}

impl<C: Connector, H: MessageHandler> BugzillaConsumer<C, H> {
    pub fn new(session: StompSession<C>, handler: H, queue: impl Into<String>) -> Self {
        Self {
            session,
            handler,
            queue: queue.into(),
            stopped: Arc::new(AtomicBool::new(false)),
            heartbeat: None,
        }
    }

    /// Handle that stops the receive loop from another thread or a
    /// signal hook. Stopping is permanent for this consumer.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stopped))
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    #[cfg(test)]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn consume(&mut self) -> Result<(), ConsumerError> {
        let result = self.run();
        self.stop_heartbeat();

        if self.session.is_connected() {
            if let Err(error) = self.session.disconnect() {
                warn!(%error, "Failed to disconnect STOMP session cleanly");
            }
        }
        result
    }

    fn run(&mut self) -> Result<(), ConsumerError> {
        match self.session.connect() {
            Ok(connected) => {
                if let (Some(period), Some(sink)) = (connected.beat_period(), self.session.heartbeat_sink()) {
                    let mut heartbeat = Heartbeat::new(sink, period)?;
                    heartbeat.start()?;
                    debug!(heartbeat = %heartbeat.metadata_payload(), "Heartbeat initialized");
                    self.heartbeat = Some(heartbeat);
                }
            }
            Err(SessionError::AlreadyConnected) => {}
            Err(error) => return Err(error.into()),
        }

        match self.session.subscribe(&self.queue, AckMode::ClientIndividual) {
            Ok(_) | Err(SessionError::AlreadySubscribed { .. }) => {}
            Err(error) => return Err(error.into()),
        }
        info!(queue = %self.queue, "STOMP consumer is ready");

        while !self.stopped.load(Ordering::SeqCst) {
            let Some(frame) = self.session.receive_frame()? else {
                continue;
            };
            match frame.command {
                Command::Message => self.process(frame)?,
                Command::Error => {
                    warn!(message = frame.header("message").unwrap_or(""), "Broker sent ERROR frame");
                }
                command => debug!(%command, "Ignoring non-MESSAGE frame"),
            }
        }

        Ok(())
    }

    fn process(&mut self, frame: Frame) -> Result<(), ConsumerError> {
        let message_id = frame.header("message-id").unwrap_or("").to_owned();
        debug!(message_id = %message_id, "Received message on STOMP");

        let body: Value = match serde_json::from_slice(&frame.body) {
            Ok(body) => body,
            Err(error) => {
                warn!(message_id = %message_id, %error, "Message body is not valid JSON");
                self.session.nack(&frame)?;
                return Ok(());
            }
        };
        let headers = headers_map(&frame);

        match self.handler.on_message(body, &headers) {
            Ok(()) => self.session.ack(&frame)?,
            Err(error) => {
                warn!(message_id = %message_id, %error, "Failed to relay message, requesting redelivery");
                self.session.nack(&frame)?;
            }
        }
        Ok(())
    }

    fn stop_heartbeat(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            if let Err(error) = heartbeat.stop() {
                warn!(%error, "Failed to stop heartbeat");
            }
        }
    }
}

/// Frame headers as a JSON object; the first occurrence of a repeated
/// header wins, as on the wire.
fn headers_map(frame: &Frame) -> Map<String, Value> {
    let mut headers = Map::new();
    for (name, value) in &frame.headers {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), Value::String(value.clone()));
        }
    }
    headers
}
