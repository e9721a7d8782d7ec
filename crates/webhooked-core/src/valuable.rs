//! Multi-source configuration values
//!
//! A [`Valuable`] is a configuration entry whose data can come from an inline
//! literal, a list of literals, a static comma-separated reference, or an
//! environment variable. All sources resolve to one ordered, deduplicated
//! list of strings.
//!
//! ```yaml
//! value: single
//! values: [a, b]
//! valueFrom:
//!   staticRef: "c,d"
//!   envRef: MY_SECRET
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A value that may come from several sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Valuable {
    /// Single inline value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Multiple inline values
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Reference to another data source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFromSource>,
}

/// Indirect source of a [`Valuable`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromSource {
    /// Static value, may hold a comma separated list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ref: Option<String>,

    /// Name of an environment variable, its content may be a comma separated list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_ref: Option<String>,
}

impl Valuable {
    /// Valuable holding a single inline value
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Valuable holding a list of inline values
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Build a valuable from raw structured configuration data
    pub fn from_json(raw: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|_| Error::InvalidValuable {
            found: raw.to_string(),
        })
    }

    /// All values in resolution order: `values`, `value`, `valueFrom.staticRef`,
    /// then the content of `valueFrom.envRef`. Duplicates are only kept once.
    pub fn get(&self) -> Vec<String> {
        let mut resolved = self.values.clone();

        if let Some(value) = &self.value {
            push_absent(&mut resolved, value);
        }

        let Some(source) = &self.value_from else {
            return resolved;
        };

        if let Some(static_ref) = &source.static_ref {
            if !resolved.contains(static_ref) {
                push_comma_list(&mut resolved, static_ref);
            }
        }

        if let Some(env_ref) = &source.env_ref {
            if let Ok(content) = std::env::var(env_ref) {
                push_comma_list(&mut resolved, &content);
            }
        }

        resolved
    }

    /// First resolved value, or an empty string
    pub fn first(&self) -> String {
        self.get().into_iter().next().unwrap_or_default()
    }

    /// Whether `element` is one of the resolved values
    pub fn contains(&self, element: &str) -> bool {
        self.get().iter().any(|v| v == element)
    }

    /// Name of the environment variable this valuable reads, if any
    pub fn env_ref(&self) -> Option<&str> {
        self.value_from.as_ref()?.env_ref.as_deref()
    }

    /// Fail when the referenced environment variable is not set
    pub fn ensure_resolvable(&self) -> Result<()> {
        match self.env_ref() {
            Some(name) if std::env::var(name).is_err() => Err(Error::config(format!(
                "environment variable {} referenced by envRef is not set",
                name
            ))),
            _ => Ok(()),
        }
    }
}

fn push_absent(list: &mut Vec<String>, element: &str) {
    if !list.iter().any(|v| v == element) {
        list.push(element.to_string());
    }
}

fn push_comma_list(list: &mut Vec<String>, comma_list: &str) {
    for element in comma_list.split(',').filter(|s| !s.is_empty()) {
        push_absent(list, element);
    }
}

/// Scalar accepted wherever a string is expected
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValuableFields {
    #[serde(default)]
    value: Option<Scalar>,
    #[serde(default)]
    values: Vec<Scalar>,
    #[serde(default)]
    value_from: Option<ValueFromSource>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValuable {
    Null,
    Scalar(Scalar),
    List(Vec<Scalar>),
    Map(ValuableFields),
}

impl<'de> Deserialize<'de> for Valuable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawValuable::deserialize(deserializer)
            .map_err(|_| de::Error::custom("unimplemented valuable type"))?;

        Ok(match raw {
            RawValuable::Null => Valuable::default(),
            RawValuable::Scalar(s) => Valuable::from_value(s),
            RawValuable::List(list) => Valuable::from_values(list.into_iter().map(String::from)),
            RawValuable::Map(fields) => Valuable {
                value: fields.value.map(String::from),
                values: fields.values.into_iter().map(String::from).collect(),
                value_from: fields.value_from,
            },
        })
    }
}
