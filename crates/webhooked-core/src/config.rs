//! Configuration parsing and validation
//!
//! This module handles loading and validating the webhooks configuration file.
//!
//! # Configuration File
//!
//! - `webhooks.yaml` - API version and the list of webhook specs
//!
//! Templates referenced by `templatePath` are read at load time, relative to
//! the directory of the configuration file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pipeline::StepEntry;
use crate::sinks::StorageSpec;

/// Template used for payloads when none is configured
pub const DEFAULT_PAYLOAD_TEMPLATE: &str = "{{ Payload }}";

/// Template used for responses when none is configured
pub const DEFAULT_RESPONSE_TEMPLATE: &str = "";

/// File looked up when [`Config::load`] is given a directory
pub const DEFAULT_CONFIG_FILE: &str = "webhooks.yaml";

/// Root of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhooksConfig {
    /// Configuration API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Webhook specs
    #[serde(default)]
    pub specs: Vec<WebhookSpec>,
}

fn default_api_version() -> String {
    "v1alpha1".to_string()
}

/// One webhook: where it listens, how calls are checked, where payloads go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    /// Unique name
    pub name: String,

    /// Unique path the webhook is served on
    pub entrypoint_url: String,

    /// Validation steps, in execution order
    #[serde(default)]
    pub security: Vec<StepEntry>,

    /// Template applied to the raw body
    #[serde(default)]
    pub formatting: FormattingSpec,

    /// Sinks, pushed to in order
    #[serde(default)]
    pub storage: Vec<StorageSpec>,

    /// Reply sent back to the caller
    #[serde(default)]
    pub response: ResponseSpec,
}

/// Template source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingSpec {
    /// File holding the template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,

    /// Inline template, wins over `templatePath`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_string: Option<String>,

    /// Template resolved at load time
    #[serde(skip)]
    pub template: String,
}

impl FormattingSpec {
    /// Inline template
    pub fn from_template(template: impl Into<String>) -> Self {
        let template = template.into();
        Self {
            template_string: Some(template.clone()),
            template_path: None,
            template,
        }
    }

    /// Whether neither source is configured
    pub fn is_empty(&self) -> bool {
        self.template_path.is_none() && self.template_string.is_none()
    }

    /// Resolve `template`: `templateString`, then the content of
    /// `templatePath`, then the parent template, then `default`.
    pub fn resolve(&mut self, parent: Option<&FormattingSpec>, default: &str, base: &Path) -> Result<()> {
        if let Some(template) = self.template_string.as_deref().filter(|t| !t.is_empty()) {
            self.template = template.to_string();
            return Ok(());
        }

        if let Some(path) = self.template_path.as_deref().filter(|p| !p.is_empty()) {
            let path = base.join(path);
            self.template = std::fs::read_to_string(&path).map_err(|e| {
                Error::config(format!("cannot read template {}: {}", path.display(), e))
            })?;
            return Ok(());
        }

        self.template = match parent {
            Some(parent) if !parent.template.is_empty() => parent.template.clone(),
            Some(parent) => {
                let mut parent = parent.clone();
                parent.resolve(None, default, base)?;
                parent.template
            }
            None => default.to_string(),
        };
        Ok(())
    }
}

/// Reply configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    /// Body template
    #[serde(default)]
    pub formatting: FormattingSpec,

    /// Status code on success
    #[serde(default = "default_http_code")]
    pub http_code: u16,

    /// Content type on success
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            formatting: FormattingSpec::default(),
            http_code: default_http_code(),
            content_type: default_content_type(),
        }
    }
}

fn default_http_code() -> u16 {
    200
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Parsed configuration
    pub webhooks: WebhooksConfig,

    /// Directory relative template paths are resolved against
    pub base_path: PathBuf,
}

impl Config {
    /// Load configuration from a file, or from `webhooks.yaml` in a directory
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::load("./config")?;
    /// let spec = config.get_spec_by_endpoint("/webhooks/github")?;
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = if path.is_dir() {
            (path.join(DEFAULT_CONFIG_FILE), path.to_path_buf())
        } else {
            (
                path.to_path_buf(),
                path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            )
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        Self::from_yaml(&contents, base_path)
    }

    /// Parse, resolve templates and validate a configuration document
    pub fn from_yaml(contents: &str, base_path: impl Into<PathBuf>) -> Result<Self> {
        let webhooks: WebhooksConfig = serde_yaml::from_str(contents)?;
        let mut config = Self {
            webhooks,
            base_path: base_path.into(),
        };

        config.resolve_templates()?;
        config.validate()?;
        info!(specs = config.webhooks.specs.len(), "Configuration loaded");
        Ok(config)
    }

    /// Configuration API version
    pub fn api_version(&self) -> &str {
        &self.webhooks.api_version
    }

    /// All specs, in file order
    pub fn specs(&self) -> &[WebhookSpec] {
        &self.webhooks.specs
    }

    /// Spec named `name`
    pub fn get_spec(&self, name: &str) -> Result<&WebhookSpec> {
        self.specs()
            .iter()
            .find(|spec| spec.name == name)
            .ok_or(Error::SpecNotFound)
    }

    /// Spec served on `endpoint`
    pub fn get_spec_by_endpoint(&self, endpoint: &str) -> Result<&WebhookSpec> {
        self.specs()
            .iter()
            .find(|spec| spec.entrypoint_url == endpoint)
            .ok_or(Error::SpecNotFound)
    }

    fn resolve_templates(&mut self) -> Result<()> {
        let base = self.base_path.clone();
        for spec in &mut self.webhooks.specs {
            spec.formatting
                .resolve(None, DEFAULT_PAYLOAD_TEMPLATE, &base)
                .map_err(|e| Error::config(format!("formatting of {}: {}", spec.name, e)))?;

            for storage in &mut spec.storage {
                storage
                    .formatting
                    .resolve(Some(&spec.formatting), DEFAULT_PAYLOAD_TEMPLATE, &base)
                    .map_err(|e| {
                        Error::config(format!("storage {} of {}: {}", storage.kind, spec.name, e))
                    })?;
            }

            spec.response
                .formatting
                .resolve(None, DEFAULT_RESPONSE_TEMPLATE, &base)
                .map_err(|e| Error::config(format!("response of {}: {}", spec.name, e)))?;
        }
        Ok(())
    }

    /// Check that names and entrypoints are unique
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut entrypoints = HashSet::new();

        for spec in self.specs() {
            debug!(name = %spec.name, "Validating spec");

            if !names.insert(spec.name.as_str()) {
                return Err(Error::config(format!(
                    "specification name {} must be unique",
                    spec.name
                )));
            }

            if !entrypoints.insert(spec.entrypoint_url.as_str()) {
                return Err(Error::config(format!(
                    "specification entrypoint url {} must be unique",
                    spec.entrypoint_url
                )));
            }
        }
        Ok(())
    }
}
