//! Application context
//!
//! Everything built once from the configuration and shared read-only by all
//! requests: the step registry, one pipeline and one sink list per spec.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, WebhookSpec};
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, StepRegistry};
use crate::sinks::{Sink, SinkLoader};

/// A loaded webhook spec
#[derive(Debug)]
pub struct Webhook {
    /// Configuration of the webhook
    pub spec: WebhookSpec,
    /// Validation pipeline, deep copied for every request
    pub pipeline: Pipeline,
    /// Sinks, aligned with `spec.storage`
    pub sinks: Vec<Arc<dyn Sink>>,
}

/// Shared application state
#[derive(Debug)]
pub struct AppContext {
    config: Config,
    registry: StepRegistry,
    webhooks: HashMap<String, Webhook>,
}

impl AppContext {
    /// Build pipelines and sinks for every spec of `config`
    pub fn build(config: Config, registry: StepRegistry, loader: &dyn SinkLoader) -> Result<Self> {
        let mut webhooks = HashMap::new();

        for spec in config.specs() {
            let pipeline = Pipeline::from_config(&spec.security, &registry).map_err(|e| {
                Error::config(format!("security of {} specification: {}", spec.name, e))
            })?;
            debug!(spec = %spec.name, steps = pipeline.step_count(), "Security steps loaded");

            let sinks = spec
                .storage
                .iter()
                .map(|storage| {
                    loader.load(storage).map_err(|e| {
                        Error::config(format!(
                            "storage {} cannot be loaded properly: {}",
                            storage.kind, e
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            debug!(spec = %spec.name, sinks = sinks.len(), "Storages loaded");

            webhooks.insert(
                spec.name.clone(),
                Webhook {
                    spec: spec.clone(),
                    pipeline,
                    sinks,
                },
            );
        }

        info!(webhooks = webhooks.len(), "Application context ready");
        Ok(Self {
            config,
            registry,
            webhooks,
        })
    }

    /// Loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Step registry the pipelines were built with
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Webhook named `name`
    pub fn webhook(&self, name: &str) -> Option<&Webhook> {
        self.webhooks.get(name)
    }

    /// Webhook served on `endpoint`
    pub fn webhook_by_endpoint(&self, endpoint: &str) -> Option<&Webhook> {
        let spec = self.config.get_spec_by_endpoint(endpoint).ok()?;
        self.webhooks.get(&spec.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::BuiltinSinkLoader;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml, ".").unwrap()
    }

    #[test]
    fn test_build() {
        let config = config(
            r#"
specs:
  - name: hook
    entrypointUrl: /hook
    security:
      - header:
          inputs: [{ name: headerName, value: X-Token }]
    storage:
      - type: file
        specs: { path: /tmp/webhooked-context-test.jsonl }
"#,
        );
        let ctx = AppContext::build(config, StepRegistry::with_builtins(), &BuiltinSinkLoader).unwrap();

        let webhook = ctx.webhook_by_endpoint("/hook").unwrap();
        assert_eq!(webhook.spec.name, "hook");
        assert_eq!(webhook.pipeline.step_count(), 1);
        assert_eq!(webhook.sinks.len(), 1);
        assert!(ctx.webhook("missing").is_none());
        assert!(ctx.webhook_by_endpoint("/missing").is_none());
    }

    #[test]
    fn test_build_unknown_step() {
        let config = config(
            r#"
specs:
  - name: hook
    entrypointUrl: /hook
    security:
      - nope: {}
"#,
        );
        let err = AppContext::build(config, StepRegistry::with_builtins(), &BuiltinSinkLoader)
            .unwrap_err();
        assert!(err.to_string().contains("\"nope\" is not a registered step"));
    }

    #[test]
    fn test_build_unknown_storage() {
        let config = config(
            r#"
specs:
  - name: hook
    entrypointUrl: /hook
    storage:
      - type: carrier-pigeon
"#,
        );
        let err = AppContext::build(config, StepRegistry::with_builtins(), &BuiltinSinkLoader)
            .unwrap_err();
        assert!(err.to_string().contains("storage carrier-pigeon cannot be loaded properly"));
    }
}
