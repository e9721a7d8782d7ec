//! List webhook specifications

use anyhow::{Context, Result};
use serde::Serialize;
use webhooked_core::{Config, WebhookSpec};

/// One line of the listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSummary {
    /// Spec name
    pub name: String,
    /// Entrypoint URL
    pub entrypoint_url: String,
    /// Security step names, in execution order
    pub security: Vec<String>,
    /// Storage types, in push order
    pub storage: Vec<String>,
    /// Status answered on success
    pub http_code: u16,
}

impl From<&WebhookSpec> for SpecSummary {
    fn from(spec: &WebhookSpec) -> Self {
        Self {
            name: spec.name.clone(),
            entrypoint_url: spec.entrypoint_url.clone(),
            security: spec
                .security
                .iter()
                .flat_map(|entry| entry.keys().cloned())
                .collect(),
            storage: spec.storage.iter().map(|s| s.kind.clone()).collect(),
            http_code: spec.response.http_code,
        }
    }
}

/// Run the specs command
pub fn run(config_path: &str, json: bool) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let summaries: Vec<SpecSummary> = config.specs().iter().map(SpecSummary::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No webhook specifications in {}", config_path);
        return Ok(());
    }

    for summary in &summaries {
        println!(
            "{}\t{}\tsecurity=[{}]\tstorage=[{}]\t{}",
            summary.name,
            summary.entrypoint_url,
            summary.security.join(","),
            summary.storage.join(","),
            summary.http_code
        );
    }
    Ok(())
}
