//! File sink for local development and replay
//!
//! Appends one line per payload. JSON payloads are written compacted, any
//! other payload is written as a JSON string.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sinks::{PushContext, Sink};

/// File sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSinkConfig {
    /// File path, created with its parent directories on first push
    pub path: String,
}

/// File-based sink writing JSON lines
#[derive(Debug)]
pub struct FileSink {
    config: FileSinkConfig,
    writer: Mutex<Option<BufWriter<std::fs::File>>>,
}

impl FileSink {
    /// Create a new file sink
    pub fn new(config: FileSinkConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
        }
    }

    /// Target path
    pub fn path(&self) -> &str {
        &self.config.path
    }

    fn open(&self) -> Result<BufWriter<std::fs::File>> {
        if let Some(parent) = std::path::Path::new(&self.config.path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)?;
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn push(&self, _ctx: &PushContext, payload: &[u8]) -> Result<()> {
        let line = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(value) => serde_json::to_string(&value)?,
            Err(_) => serde_json::to_string(&String::from_utf8_lossy(payload))?,
        };

        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        Ok(())
    }
}
