//! Redis backed sinks
//!
//! Two flavours share the same connection settings:
//!
//! - `redis`: list store, every payload is `RPUSH`ed to `key`
//! - `redis_stream`: queue, every payload is `XADD`ed to the `key` stream
//!   through a [`QueueSink`] so closed connections are redialed

use std::fmt;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ConnectionInfo, IntoConnectionInfo, RedisError};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use webhooked_core::error::{Error, Result};
use webhooked_core::sinks::{PushContext, QueueSink, QueueTransport, Sink};
use webhooked_core::Valuable;

const DEFAULT_PORT: u16 = 6379;

/// Connection settings of the Redis sinks
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    /// Server host
    pub host: Valuable,
    /// Server port, `6379` when empty
    #[serde(default)]
    pub port: Valuable,
    /// Database index
    #[serde(default)]
    pub database: i64,
    /// ACL user name
    #[serde(default)]
    pub username: Option<String>,
    /// Password, usually read through `valueFrom.envRef`
    #[serde(default)]
    pub password: Valuable,
    /// List or stream key the payloads go to
    pub key: String,
}

impl RedisConfig {
    /// Connection settings built from the resolved values. Credentials are
    /// passed as is, never through a URL.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let host = self.host.first();
        if host.is_empty() {
            return Err(Error::config("redis storage needs a host"));
        }
        let port = match self.port.first() {
            port if port.is_empty() => DEFAULT_PORT,
            port => port
                .parse()
                .map_err(|_| Error::config(format!("invalid redis port {}", port)))?,
        };

        let mut info = (host, port)
            .into_connection_info()
            .map_err(|e| Error::config(e.to_string()))?;
        info.redis.db = self.database;
        info.redis.username = self.username.clone().filter(|user| !user.is_empty());
        info.redis.password = Some(self.password.first()).filter(|password| !password.is_empty());
        Ok(info)
    }

    fn client(&self, sink: &str) -> Result<Client> {
        if self.key.is_empty() {
            return Err(Error::config(format!("{} storage needs a key", sink)));
        }
        Client::open(self.connection_info()?).map_err(|e| Error::sink(sink, e.to_string()))
    }
}

/// Sink appending payloads to a Redis list
pub struct RedisSink {
    client: Client,
    key: String,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisSink {
    /// Create the sink; the connection is opened on first push
    pub fn new(config: RedisConfig) -> Result<Self> {
        Ok(Self {
            client: config.client("redis")?,
            key: config.key,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(|e| Error::sink("redis", e.to_string()))?;
        Ok(conn.clone())
    }
}

impl fmt::Debug for RedisSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSink")
            .field("key", &self.key)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

#[async_trait]
impl Sink for RedisSink {
    fn name(&self) -> &str {
        "redis"
    }

    async fn push(&self, ctx: &PushContext, payload: &[u8]) -> Result<()> {
        let mut conn = self.connection().await?;
        let push = async {
            let length: redis::RedisResult<i64> = conn.rpush(&self.key, payload).await;
            length
        };

        tokio::select! {
            pushed = push => {
                let length = pushed.map_err(|e| Error::sink("redis", e.to_string()))?;
                debug!(key = %self.key, length, "Payload pushed");
                Ok(())
            }
            _ = ctx.cancelled() => Err(Error::sink("redis", "push cancelled")),
        }
    }
}

/// Transport adding payloads to a Redis stream
pub struct RedisStreamTransport {
    client: Client,
    stream: String,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStreamTransport {
    /// Create the transport; the connection is opened on first publish
    pub fn new(config: RedisConfig) -> Result<Self> {
        Ok(Self {
            client: config.client("redis_stream")?,
            stream: config.key,
            connection: Mutex::new(None),
        })
    }

    /// Stream key
    pub fn stream(&self) -> &str {
        &self.stream
    }

    async fn dial(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| closed_or_failed(&e))
    }
}

impl fmt::Debug for RedisStreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamTransport")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueTransport for RedisStreamTransport {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        let mut conn = {
            let mut guard = self.connection.lock().await;
            let conn = match guard.take() {
                Some(conn) => conn,
                None => self.dial().await?,
            };
            *guard = Some(conn.clone());
            conn
        };

        let published: redis::RedisResult<String> =
            conn.xadd(&self.stream, "*", &[("payload", payload)]).await;

        match published {
            Ok(id) => {
                debug!(stream = %self.stream, id = %id, "Payload published");
                Ok(())
            }
            Err(err) => {
                let err = closed_or_failed(&err);
                if matches!(err, Error::ConnectionClosed(_)) {
                    *self.connection.lock().await = None;
                }
                Err(err)
            }
        }
    }

    async fn redial(&self) -> Result<()> {
        let conn = self.dial().await?;
        *self.connection.lock().await = Some(conn);
        info!(stream = %self.stream, "Redis stream channel re-established");
        Ok(())
    }
}

/// Queue sink publishing to a Redis stream
pub type RedisStreamSink = QueueSink<RedisStreamTransport>;

/// Build the `redis_stream` queue sink
pub fn stream_sink(config: RedisConfig) -> Result<RedisStreamSink> {
    Ok(QueueSink::new("redis_stream", RedisStreamTransport::new(config)?))
}

fn closed_or_failed(err: &RedisError) -> Error {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        Error::ConnectionClosed(err.to_string())
    } else {
        Error::sink("redis_stream", err.to_string())
    }
}
