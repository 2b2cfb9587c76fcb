use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const MIN_PERIOD_MS: u64 = 10;

/// Destination of outgoing heart-beats, usually the write half of a
/// broker connection.
pub trait HeartbeatSink: Send + Sync {
    fn beat(&self) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("heartbeat period must be at least {MIN_PERIOD_MS}ms, got {provided_ms}ms")]
    InvalidPeriod { provided_ms: u64 },
    #[error("heartbeat is already running")]
    AlreadyRunning,
    #[error("heartbeat worker thread join failed")]
    JoinFailed,
}

pub struct Heartbeat {
    pub initiated_at: DateTime<Utc>,
    period: Duration,
    sink: Arc<dyn HeartbeatSink>,
    beats_sent: Arc<AtomicU64>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new(sink: Arc<dyn HeartbeatSink>, period: Duration) -> Result<Self, HeartbeatError> {
        let period_ms = period.as_millis() as u64;
        if period_ms < MIN_PERIOD_MS {
            return Err(HeartbeatError::InvalidPeriod {
                provided_ms: period_ms,
            });
        }

        Ok(Self {
            initiated_at: Utc::now(),
            period,
            sink,
            beats_sent: Arc::new(AtomicU64::new(0)),
            stop_tx: None,
            worker: None,
        })
    }

    pub fn start(&mut self) -> Result<(), HeartbeatError> {
        if self.worker.is_some() {
            return Err(HeartbeatError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sink = Arc::clone(&self.sink);
        let beats_sent = Arc::clone(&self.beats_sent);
        let period = self.period;

        self.worker = Some(thread::spawn(move || loop {
            match stop_rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(error) = sink.beat() {
                        warn!(%error, "Failed to send heart-beat, stopping heartbeat worker");
                        break;
                    }
                    beats_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }));
        self.stop_tx = Some(stop_tx);
        debug!(period_ms = period.as_millis() as u64, "Heartbeat started");

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), HeartbeatError> {
        self.stop_tx.take();

        if let Some(handle) = self.worker.take() {
            return handle.join().map_err(|_| HeartbeatError::JoinFailed);
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn beats_sent(&self) -> u64 {
        self.beats_sent.load(Ordering::Relaxed)
    }

    pub fn metadata_payload(&self) -> Value {
        json!({
            "initiated_at": self.initiated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "period_ms": self.period.as_millis() as u64,
            "beats_sent": self.beats_sent()
        })
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
