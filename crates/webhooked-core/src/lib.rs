//! Webhooked Core Library
//!
//! This crate provides the core functionality for webhooked:
//! - Configuration parsing and validation
//! - Validation pipeline of typed, chainable steps
//! - Payload templating with a function library
//! - Sink trait and the queue reconnect contract
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Request   │────▶│  Security   │────▶│  Formatter  │────▶│    Sinks    │
//! │             │     │  Pipeline   │     │  (chained)  │     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use webhooked_core::{AppContext, Config, StepRegistry, webhook_service};
//! use webhooked_core::sinks::BuiltinSinkLoader;
//!
//! let config = Config::load("./config")?;
//! let ctx = AppContext::build(config, StepRegistry::with_builtins(), &BuiltinSinkLoader)?;
//! let body = webhook_service(&ctx, ctx.webhook_by_endpoint("/hook"), request, None).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod formatting;
pub mod pipeline;
pub mod request;
pub mod service;
pub mod sinks;
pub mod valuable;

pub use config::{Config, WebhookSpec};
pub use context::{AppContext, Webhook};
pub use error::{Error, Result};
pub use formatting::Formatter;
pub use pipeline::{Pipeline, Step, StepKind, StepRegistry};
pub use request::WebhookRequest;
pub use service::webhook_service;
pub use sinks::{PushContext, Sink};
pub use valuable::Valuable;
