//! Queue dispatch with reconnection
//!
//! [`QueueSink`] wraps a [`QueueTransport`] and turns closed connections into
//! retries:
//!
//! ```text
//! push ──▶ publish ──ok──▶ done
//!             │
//!             ├─ other error ──▶ returned as is
//!             │
//!             └─ connection closed ──▶ reconnect (sleep, redial) until it
//!                                      succeeds, then publish again, at most
//!                                      MAX_ATTEMPTS publishes in total
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::sinks::{PushContext, Sink};

/// Publish attempts made by one push
pub const MAX_ATTEMPTS: usize = 5;

/// Pause before each redial
pub const DEFAULT_REDIAL_INTERVAL: Duration = Duration::from_secs(5);

/// Network side of a queue sink
#[async_trait]
pub trait QueueTransport: Send + Sync + std::fmt::Debug {
    /// Publish one message. A lost connection must be reported as
    /// [`Error::ConnectionClosed`] so the caller reconnects.
    async fn publish(&self, payload: &[u8]) -> Result<()>;

    /// Dial again and re-establish the publishing channel
    async fn redial(&self) -> Result<()>;
}

/// Sink publishing through a [`QueueTransport`]
#[derive(Debug)]
pub struct QueueSink<T> {
    name: String,
    transport: T,
    redial_interval: Duration,
}

impl<T: QueueTransport> QueueSink<T> {
    /// Queue sink named `name`
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
            redial_interval: DEFAULT_REDIAL_INTERVAL,
        }
    }

    /// Override the pause before each redial
    pub fn with_redial_interval(mut self, interval: Duration) -> Self {
        self.redial_interval = interval;
        self
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Block until the transport is dialed again. There is no bound on the
    /// number of redials; the publish loop bounds the whole push.
    async fn reconnect(&self) {
        loop {
            tokio::time::sleep(self.redial_interval).await;
            match self.transport.redial().await {
                Ok(()) => {
                    info!(sink = %self.name, "Reconnected");
                    return;
                }
                Err(err) => {
                    error!(sink = %self.name, error = %err, "Reconnect failed");
                }
            }
        }
    }
}

#[async_trait]
impl<T: QueueTransport> Sink for QueueSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, _ctx: &PushContext, payload: &[u8]) -> Result<()> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.transport.publish(payload).await {
                Ok(()) => return Ok(()),
                Err(Error::ConnectionClosed(reason)) => {
                    warn!(sink = %self.name, attempt, reason = %reason, "Connection closed while publishing");
                    self.reconnect().await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::MaxAttemptsReached {
            sink: self.name.clone(),
            attempts: MAX_ATTEMPTS,
        })
    }
}
