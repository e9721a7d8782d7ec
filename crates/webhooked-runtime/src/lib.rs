//! Webhooked Runtime
//!
//! This crate provides what the core library leaves to the outer layers:
//!
//! - Sink backends talking to the network (Redis list, Redis stream, PostgreSQL)
//! - A sink loader covering every storage type
//! - The [`Runtime`] answering webhook calls with an HTTP status and body
//!
//! # Usage
//!
//! ```rust,ignore
//! use webhooked_core::{Config, WebhookRequest};
//! use webhooked_runtime::Runtime;
//!
//! let runtime = Runtime::new(Config::load("webhooks.yaml")?)?;
//! let response = runtime.handle("/webhooks/example", request).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod sinks;

pub use engine::{Runtime, WebhookResponse};
pub use error::{Error, Result, status_for};
pub use sinks::RuntimeSinkLoader;
