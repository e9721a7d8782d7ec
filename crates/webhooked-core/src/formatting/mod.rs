//! Payload templating
//!
//! A [`Formatter`] renders one template against a data map that is filled
//! in as a request progresses (`Request`, `Payload`, `Spec`, `Storage`,
//! `PreviousPayload`, ...). Templates use minijinja syntax extended with the
//! function library of [`functions`]:
//!
//! ```text
//! {{ Payload | fromJson | toPrettyJson }}
//! {{ getHeader("X-Delivery", Request.Headers) }}
//! {{ default("anonymous", lookup("user.name", fromJson(Payload))) }}
//! ```

pub mod functions;

use std::fmt::Write;
use std::sync::{LazyLock, PoisonError, RwLock};

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::error::{Error, Result};
use crate::request::WebhookRequest;

/// Printed in place of undefined and none values
pub const NO_VALUE: &str = "<no value>";

static ENVIRONMENT: LazyLock<Environment<'static>> = LazyLock::new(environment);

/// Template plus the data it is rendered with
#[derive(Debug, Default)]
pub struct Formatter {
    template: Option<String>,
    data: RwLock<Map<String, Value>>,
}

impl Formatter {
    /// Formatter without template nor data
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the template
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Current template
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Formatter using `template` and a copy of the current data
    pub fn fork(&self, template: impl Into<String>) -> Formatter {
        let data = self.read_data().clone();
        Formatter {
            template: Some(template.into()),
            data: RwLock::new(data),
        }
    }

    /// Add or replace the entry `name` of the data map
    pub fn with_data(&self, name: impl Into<String>, value: impl Serialize) -> &Self {
        let name = name.into();
        let value = serde_json::to_value(value).unwrap_or_else(|err| {
            error!(name = %name, error = %err, "Failed to serialize template data");
            Value::Null
        });
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
        self
    }

    /// Expose the request under `Request`
    pub fn with_request(&self, request: &WebhookRequest) -> &Self {
        self.with_data("Request", request.to_template_value())
    }

    /// Expose the body under `Payload`, decoded as UTF-8 with replacement
    pub fn with_payload(&self, payload: &[u8]) -> &Self {
        self.with_data("Payload", String::from_utf8_lossy(payload))
    }

    /// Value of the entry `name`
    pub fn data(&self, name: &str) -> Option<Value> {
        self.read_data().get(name).cloned()
    }

    /// Render the template against the data map
    pub fn render(&self) -> Result<String> {
        let template = match self.template.as_deref() {
            Some(template) if !template.is_empty() => template,
            _ => return Err(Error::NoTemplate),
        };

        let data = self.read_data();
        render_str(template, &*data)
    }

    fn read_data(&self) -> std::sync::RwLockReadGuard<'_, Map<String, Value>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Render `template` against `context` with the function library loaded
pub fn render_str<S: Serialize>(template: &str, context: S) -> Result<String> {
    let rendered = ENVIRONMENT
        .render_str(template, context)
        .map_err(|err| match err.kind() {
            ErrorKind::SyntaxError => Error::TemplateSyntax(err.to_string()),
            _ => Error::TemplateRender(err.to_string()),
        })?;

    if rendered == NO_VALUE {
        return Err(Error::TemplateUnrendered);
    }
    Ok(rendered)
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_formatter(|out, state, value| {
        if value.is_undefined() || value.is_none() {
            out.write_str(NO_VALUE)?;
            return Ok(());
        }
        minijinja::escape_formatter(out, state, value)
    });
    functions::register(&mut env);
    env
}
