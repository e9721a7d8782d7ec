//! Validate configuration command

use anyhow::{Context, Result};
use webhooked_core::Config;
use webhooked_runtime::Runtime;

/// Run the validate command
pub async fn run(config_path: &str) -> Result<()> {
    tracing::info!("Validating configuration: {}", config_path);

    let config = Config::load(config_path).context("Failed to load configuration")?;
    tracing::info!("✓ API version: {}", config.api_version());

    // Building the runtime resolves templates, security steps and storages
    let runtime = Runtime::new(config)?;
    let config = runtime.context().config();
    for spec in config.specs() {
        tracing::info!(
            "✓ {} on {} ({} security steps, {} storages)",
            spec.name,
            spec.entrypoint_url,
            spec.security.len(),
            spec.storage.len()
        );
    }

    println!("{} webhook specifications are valid", config.specs().len());
    Ok(())
}
