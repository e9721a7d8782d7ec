//! Replay a recorded webhook call

use anyhow::{Context, Result, bail};
use webhooked_core::{Config, WebhookRequest};
use webhooked_runtime::Runtime;

/// Split a `Name: value` header argument
pub fn parse_header(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("Invalid header {:?}, expected `Name: value`", raw),
    }
}

/// Run the replay command
pub async fn run(config_path: &str, endpoint: &str, body_path: &str, headers: &[String]) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let runtime = Runtime::new(config)?;

    let body = std::fs::read(body_path)
        .with_context(|| format!("Failed to read request body from {}", body_path))?;

    let mut request = WebhookRequest::post(endpoint)?;
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value)?;
    }
    let request = request.with_body(body);

    tracing::info!("Replaying {} bytes to {}", request.body().map_or(0, <[u8]>::len), endpoint);

    let response = tokio::select! {
        response = runtime.handle(endpoint, request) => response,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            runtime.shutdown();
            bail!("Replay interrupted");
        }
    };

    println!("{} {}", response.status.as_u16(), response.content_type);
    if !response.body.is_empty() {
        println!("{}", response.body);
    }

    if !response.status.is_success() {
        bail!("Webhook answered {}", response.status);
    }
    Ok(())
}
