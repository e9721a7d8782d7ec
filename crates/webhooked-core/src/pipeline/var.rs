//! Typed input/output slots
//!
//! Every step declares its slots up front. A slot carries a [`SlotType`] tag
//! and only accepts a [`SlotValue`] with the same tag.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::request::WebhookRequest;
use crate::valuable::Valuable;

/// Type tag of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// Plain string
    Str,
    /// Ordered list of strings
    StrList,
    /// Boolean
    Bool,
    /// Floating point number
    Number,
    /// Raw byte string
    Bytes,
    /// Handle to the inbound request
    Request,
    /// Configuration-time value, possibly holding template expressions
    InputConfig,
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotType::Str => "string",
            SlotType::StrList => "string list",
            SlotType::Bool => "bool",
            SlotType::Number => "number",
            SlotType::Bytes => "bytes",
            SlotType::Request => "request",
            SlotType::InputConfig => "input config",
        };
        f.write_str(name)
    }
}

/// A named [`Valuable`] read from the step configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Slot name the value is bound to
    #[serde(default)]
    pub name: String,

    /// Value sources
    #[serde(flatten)]
    pub valuable: Valuable,
}

impl InputConfig {
    /// Create an input config
    pub fn new(name: impl Into<String>, valuable: Valuable) -> Self {
        Self {
            name: name.into(),
            valuable,
        }
    }

    /// Resolved values, see [`Valuable::get`]
    pub fn get(&self) -> Vec<String> {
        self.valuable.get()
    }

    /// First resolved value, see [`Valuable::first`]
    pub fn first(&self) -> String {
        self.valuable.first()
    }
}

/// Value held by a slot
#[derive(Debug, Clone)]
pub enum SlotValue {
    /// Plain string
    Str(String),
    /// Ordered list of strings
    StrList(Vec<String>),
    /// Boolean
    Bool(bool),
    /// Floating point number
    Number(f64),
    /// Raw byte string, seen by templates as lossy UTF-8 text
    Bytes(Arc<[u8]>),
    /// Handle to the inbound request
    Request(Arc<WebhookRequest>),
    /// Configuration-time value
    InputConfig(InputConfig),
}

impl SlotValue {
    /// Type tag of the value
    pub fn slot_type(&self) -> SlotType {
        match self {
            SlotValue::Str(_) => SlotType::Str,
            SlotValue::StrList(_) => SlotType::StrList,
            SlotValue::Bool(_) => SlotType::Bool,
            SlotValue::Number(_) => SlotType::Number,
            SlotValue::Bytes(_) => SlotType::Bytes,
            SlotValue::Request(_) => SlotType::Request,
            SlotValue::InputConfig(_) => SlotType::InputConfig,
        }
    }

    /// String content, if the value is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SlotValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if the value is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SlotValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Byte content, if the value is a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SlotValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Request handle, if the value is a request
    pub fn as_request(&self) -> Option<&WebhookRequest> {
        match self {
            SlotValue::Request(r) => Some(r),
            _ => None,
        }
    }

    /// Input config, if the value is one
    pub fn as_input_config(&self) -> Option<&InputConfig> {
        match self {
            SlotValue::InputConfig(c) => Some(c),
            _ => None,
        }
    }

    /// JSON view exposed to templates
    pub fn to_json(&self) -> Value {
        match self {
            SlotValue::Str(s) => Value::String(s.clone()),
            SlotValue::StrList(list) => json!(list),
            SlotValue::Bool(b) => Value::Bool(*b),
            SlotValue::Number(n) => json!(n),
            SlotValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            SlotValue::Request(r) => r.to_template_value(),
            SlotValue::InputConfig(c) => json!(c.get()),
        }
    }
}

impl PartialEq for SlotValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SlotValue::Str(a), SlotValue::Str(b)) => a == b,
            (SlotValue::StrList(a), SlotValue::StrList(b)) => a == b,
            (SlotValue::Bool(a), SlotValue::Bool(b)) => a == b,
            (SlotValue::Number(a), SlotValue::Number(b)) => a == b,
            (SlotValue::Bytes(a), SlotValue::Bytes(b)) => a == b,
            (SlotValue::Request(a), SlotValue::Request(b)) => Arc::ptr_eq(a, b),
            (SlotValue::InputConfig(a), SlotValue::InputConfig(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for SlotValue {
    fn from(s: &str) -> Self {
        SlotValue::Str(s.to_string())
    }
}

impl From<String> for SlotValue {
    fn from(s: String) -> Self {
        SlotValue::Str(s)
    }
}

impl From<bool> for SlotValue {
    fn from(b: bool) -> Self {
        SlotValue::Bool(b)
    }
}

impl From<f64> for SlotValue {
    fn from(n: f64) -> Self {
        SlotValue::Number(n)
    }
}

impl From<Vec<String>> for SlotValue {
    fn from(list: Vec<String>) -> Self {
        SlotValue::StrList(list)
    }
}

impl From<Vec<u8>> for SlotValue {
    fn from(bytes: Vec<u8>) -> Self {
        SlotValue::Bytes(bytes.into())
    }
}

impl From<WebhookRequest> for SlotValue {
    fn from(request: WebhookRequest) -> Self {
        SlotValue::Request(Arc::new(request))
    }
}

impl From<Arc<WebhookRequest>> for SlotValue {
    fn from(request: Arc<WebhookRequest>) -> Self {
        SlotValue::Request(request)
    }
}

impl From<InputConfig> for SlotValue {
    fn from(config: InputConfig) -> Self {
        SlotValue::InputConfig(config)
    }
}

/// A declared step slot
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    /// Supplied by the runtime rather than by configuration
    pub internal: bool,
    /// Declared type
    pub ty: SlotType,
    /// Slot name
    pub name: String,
    /// Current value
    pub value: Option<SlotValue>,
}

impl Var {
    /// Slot filled by configuration
    pub fn new(ty: SlotType, name: impl Into<String>) -> Self {
        Self {
            internal: false,
            ty,
            name: name.into(),
            value: None,
        }
    }

    /// Slot filled by the runtime
    pub fn internal(ty: SlotType, name: impl Into<String>) -> Self {
        Self {
            internal: true,
            ..Self::new(ty, name)
        }
    }

    /// Set the initial value
    pub fn with_default(mut self, value: impl Into<SlotValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Assign `value`, rejecting any value whose tag is not the declared one
    pub fn assign(&mut self, value: SlotValue) -> Result<()> {
        if value.slot_type() != self.ty {
            return Err(Error::TypeMismatch {
                slot: self.name.clone(),
                expected: self.ty.to_string(),
                found: value.slot_type().to_string(),
            });
        }
        self.value = Some(value);
        Ok(())
    }
}

/// Find a slot by name
pub fn get_var<'a>(list: &'a [Var], name: &str) -> Option<&'a Var> {
    list.iter().find(|v| v.name == name)
}
