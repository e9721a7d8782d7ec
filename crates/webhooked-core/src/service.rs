//! Request handling
//!
//! [`webhook_service`] is the whole life of one inbound call once the HTTP
//! boundary has found the matching webhook:
//!
//! ```text
//! request ──▶ security pipeline (private copy) ──▶ spec template
//!                                                      │
//!        response template ◀── push ◀── sink template ◀┘  (per sink, chained)
//! ```

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::{AppContext, Webhook};
use crate::error::{Error, Result};
use crate::formatting::Formatter;
use crate::request::WebhookRequest;
use crate::sinks::PushContext;

/// Validate, format and dispatch one request, returning the rendered
/// response body. Sink pushes are sequential; the first failing sink aborts
/// the remaining ones.
pub async fn webhook_service(
    ctx: &AppContext,
    webhook: Option<&Webhook>,
    request: WebhookRequest,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<String> {
    let webhook = webhook.ok_or(Error::SpecNotFound)?;
    let spec = &webhook.spec;

    let body = request.body().ok_or(Error::RequestBodyMissing)?.to_vec();
    let request = Arc::new(request);

    if webhook.pipeline.has_steps() {
        let mut pipeline = webhook.pipeline.deep_copy();
        pipeline
            .want_result(true)
            .with_input("request", Arc::clone(&request))
            .with_input("payload", String::from_utf8_lossy(&body).into_owned())
            .with_input("body", body.clone());

        let failed_step = pipeline.run().map(|step| step.identifier().to_string());
        if let Some(err) = pipeline.run_error() {
            return Err(Error::PipelineFailed {
                step: failed_step.unwrap_or_default(),
                message: err.to_string(),
            });
        }
        if !pipeline.check_result() {
            warn!(spec = %spec.name, "Security check failed");
            return Err(Error::SecurityFailed);
        }
    }

    let formatter = Formatter::new().with_template(spec.formatting.template.as_str());
    formatter
        .with_request(&request)
        .with_payload(&body)
        .with_data(
            "Spec",
            json!({"Name": spec.name, "EntrypointUrl": spec.entrypoint_url}),
        )
        .with_data("Config", json!({"ApiVersion": ctx.config().api_version()}));

    let mut previous = formatter.render()?;
    debug!(spec = %spec.name, "Payload formatted");

    for (storage, sink) in spec.storage.iter().zip(&webhook.sinks) {
        let stage = formatter.fork(storage.formatting.template.as_str());
        stage
            .with_data("PreviousPayload", previous.as_str())
            .with_data(
                "Storage",
                json!({"Type": storage.kind, "Specs": storage.specs}),
            );
        let payload = stage.render()?;

        let push_ctx = match &cancel {
            Some(cancel) => PushContext::with_cancel(Arc::new(stage), cancel.clone()),
            None => PushContext::new(Arc::new(stage)),
        };
        sink.push(&push_ctx, payload.as_bytes()).await?;
        info!(spec = %spec.name, sink = %sink.name(), "Payload stored");

        previous = payload;
    }

    let template = spec.response.formatting.template.as_str();
    if template.is_empty() {
        return Ok(String::new());
    }

    let response = formatter.fork(template);
    response.with_data("PreviousPayload", previous);
    response.render()
}
