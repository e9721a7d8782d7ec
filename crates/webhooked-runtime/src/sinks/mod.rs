//! Networked sink backends
//!
//! | type           | backend                              |
//! |----------------|--------------------------------------|
//! | `file`         | JSON lines file (core)               |
//! | `redis`        | Redis list, `RPUSH`                  |
//! | `redis_stream` | Redis stream, `XADD` with reconnect  |
//! | `postgres`     | PostgreSQL insert or templated query |

pub mod postgres;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use webhooked_core::error::Result;
use webhooked_core::sinks::{BuiltinSinkLoader, Sink, SinkLoader, StorageSpec};

pub use self::postgres::{PostgresConfig, PostgresSink, Statement};
pub use self::redis::{RedisConfig, RedisSink, RedisStreamSink, RedisStreamTransport};

/// Loader for every sink type webhooked ships with
#[derive(Debug, Default, Clone)]
pub struct RuntimeSinkLoader {
    redial_interval: Option<Duration>,
}

impl RuntimeSinkLoader {
    /// Create a loader with the default redial interval
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the pause between redials of queue sinks
    pub fn with_redial_interval(mut self, interval: Duration) -> Self {
        self.redial_interval = Some(interval);
        self
    }
}

impl SinkLoader for RuntimeSinkLoader {
    fn load(&self, spec: &StorageSpec) -> Result<Arc<dyn Sink>> {
        debug!(storage = %spec.kind, "Loading storage");
        match spec.kind.as_str() {
            "redis" => Ok(Arc::new(RedisSink::new(spec.decode()?)?)),
            "redis_stream" => {
                let mut sink = self::redis::stream_sink(spec.decode()?)?;
                if let Some(interval) = self.redial_interval {
                    sink = sink.with_redial_interval(interval);
                }
                Ok(Arc::new(sink))
            }
            "postgres" => Ok(Arc::new(PostgresSink::new(spec.decode()?)?)),
            _ => BuiltinSinkLoader.load(spec),
        }
    }
}
