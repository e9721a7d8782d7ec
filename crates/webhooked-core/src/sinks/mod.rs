//! Sink trait and dispatch contract
//!
//! A sink receives the rendered payload of a webhook. Sinks are declared per
//! spec in the `storage` section and pushed to sequentially, in declaration
//! order:
//!
//! ```yaml
//! storage:
//!   - type: redis
//!     specs:
//!       host: localhost
//!       port: "6379"
//!       key: events
//!     formatting:
//!       templateString: '{"event": {{ PreviousPayload }}}'
//! ```

pub mod file;
pub mod queue;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::config::FormattingSpec;
use crate::error::{Error, Result};
use crate::formatting::Formatter;

pub use file::{FileSink, FileSinkConfig};
pub use queue::{QueueSink, QueueTransport, MAX_ATTEMPTS};

/// Destination of rendered payloads
#[async_trait]
pub trait Sink: Send + Sync + fmt::Debug {
    /// Sink type name, as written in the `type` field of the configuration
    fn name(&self) -> &str;

    /// Deliver one payload
    async fn push(&self, ctx: &PushContext, payload: &[u8]) -> Result<()>;
}

/// Request scoped data handed to [`Sink::push`]
#[derive(Debug, Clone)]
pub struct PushContext {
    formatter: Arc<Formatter>,
    cancel: watch::Receiver<bool>,
}

impl PushContext {
    /// Context that is never cancelled
    pub fn new(formatter: Arc<Formatter>) -> Self {
        let (_, cancel) = watch::channel(false);
        Self { formatter, cancel }
    }

    /// Context cancelled once `true` is sent on the channel
    pub fn with_cancel(formatter: Arc<Formatter>, cancel: watch::Receiver<bool>) -> Self {
        Self { formatter, cancel }
    }

    /// Formatter of the current stage, carrying the request data
    pub fn formatter(&self) -> &Formatter {
        &self.formatter
    }

    /// Whether the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve once the request is cancelled, never when the sender is gone
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow_and_update() {
                return;
            }
            if cancel.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Storage entry of a webhook spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSpec {
    /// Sink type
    #[serde(rename = "type")]
    pub kind: String,

    /// Sink specific settings
    #[serde(default)]
    pub specs: Map<String, Value>,

    /// Template applied to the payload before this sink receives it
    #[serde(default, skip_serializing_if = "FormattingSpec::is_empty")]
    pub formatting: FormattingSpec,
}

impl StorageSpec {
    /// Decode the sink specific settings into `T`
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.specs.clone())).map_err(|e| {
            Error::config(format!("invalid specs for storage {}: {}", self.kind, e))
        })
    }
}

/// Builds sinks from their configuration
pub trait SinkLoader: Send + Sync {
    /// Sink for `spec`; unknown types are configuration errors
    fn load(&self, spec: &StorageSpec) -> Result<Arc<dyn Sink>>;
}

/// Loader for the sinks that need no network client
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinSinkLoader;

impl SinkLoader for BuiltinSinkLoader {
    fn load(&self, spec: &StorageSpec) -> Result<Arc<dyn Sink>> {
        match spec.kind.as_str() {
            "file" => Ok(Arc::new(FileSink::new(spec.decode()?))),
            other => Err(Error::config(format!("storage {} is undefined", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_storage_spec() {
        let yaml = r#"
type: redis
specs:
  host: localhost
  port: "6379"
formatting:
  templateString: "{{ PreviousPayload }}"
"#;
        let spec: StorageSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind, "redis");
        assert_eq!(spec.specs["host"], "localhost");
        assert_eq!(
            spec.formatting.template_string.as_deref(),
            Some("{{ PreviousPayload }}")
        );
    }

    #[test]
    fn test_builtin_loader() {
        let spec: StorageSpec =
            serde_yaml::from_str("type: file\nspecs:\n  path: /tmp/out.jsonl\n").unwrap();
        let sink = BuiltinSinkLoader.load(&spec).unwrap();
        assert_eq!(sink.name(), "file");

        let spec: StorageSpec = serde_yaml::from_str("type: unknown").unwrap();
        let err = BuiltinSinkLoader.load(&spec).unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: storage unknown is undefined");
    }

    #[tokio::test]
    async fn test_push_context_cancellation() {
        let (tx, rx) = watch::channel(false);
        let ctx = PushContext::with_cancel(Arc::new(Formatter::new()), rx);
        assert!(!ctx.is_cancelled());

        tx.send(true).unwrap();
        assert!(ctx.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_context_without_sender_is_never_cancelled() {
        let ctx = PushContext::new(Arc::new(Formatter::new()));
        assert!(!ctx.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(waited.is_err());
    }
}
