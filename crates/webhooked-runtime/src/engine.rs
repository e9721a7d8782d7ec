//! Request runtime
//!
//! Owns the shared [`AppContext`] and turns the outcome of
//! [`webhook_service`] into what the HTTP boundary answers.

use std::sync::Arc;

use anyhow::Context;
use http::StatusCode;
use tokio::sync::watch;
use tracing::{error, info, warn};
use webhooked_core::sinks::SinkLoader;
use webhooked_core::{AppContext, Config, Error as CoreError, StepRegistry, WebhookRequest, webhook_service};

use crate::error::{Result, status_for};
use crate::sinks::RuntimeSinkLoader;

/// Answer to one webhook call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Value of the `Content-Type` header
    pub content_type: String,
    /// Response body
    pub body: String,
}

impl WebhookResponse {
    fn failed(err: &CoreError) -> Self {
        let status = status_for(err);
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: status.canonical_reason().unwrap_or_default().to_string(),
        }
    }
}

/// Runtime serving the configured webhooks
#[derive(Debug)]
pub struct Runtime {
    ctx: Arc<AppContext>,
    shutdown: watch::Sender<bool>,
}

impl Runtime {
    /// Build pipelines and sinks for `config` with every built-in sink type
    pub fn new(config: Config) -> Result<Self> {
        Self::with_loader(config, &RuntimeSinkLoader::new())
    }

    /// Build pipelines and sinks for `config` with a custom sink loader
    pub fn with_loader(config: Config, loader: &dyn SinkLoader) -> Result<Self> {
        let ctx = AppContext::build(config, StepRegistry::with_builtins(), loader)
            .context("Failed to load webhook specifications")?;
        Ok(Self::from_context(ctx))
    }

    /// Runtime over an already built context
    pub fn from_context(ctx: AppContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            shutdown,
        }
    }

    /// Shared application context
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Serve one call made on `endpoint`
    pub async fn handle(&self, endpoint: &str, request: WebhookRequest) -> WebhookResponse {
        let webhook = self.ctx.webhook_by_endpoint(endpoint);
        let result = webhook_service(&self.ctx, webhook, request, Some(self.shutdown.subscribe())).await;

        match (result, webhook) {
            (Ok(body), Some(webhook)) => {
                let response = &webhook.spec.response;
                info!(spec = %webhook.spec.name, status = response.http_code, "Webhook served");
                WebhookResponse {
                    status: StatusCode::from_u16(response.http_code).unwrap_or(StatusCode::OK),
                    content_type: response.content_type.clone(),
                    body,
                }
            }
            (Ok(_), None) => WebhookResponse::failed(&CoreError::SpecNotFound),
            (Err(err), _) => {
                match &err {
                    CoreError::SecurityFailed | CoreError::SpecNotFound => {
                        warn!(endpoint, error = %err, "Webhook rejected")
                    }
                    _ => error!(endpoint, error = %err, "Webhook failed"),
                }
                WebhookResponse::failed(&err)
            }
        }
    }

    /// Signal in-flight sink pushes to stop
    pub fn shutdown(&self) {
        info!("Shutting down webhooked runtime");
        self.shutdown.send_replace(true);
    }
}
