//! Inbound webhook request
//!
//! The HTTP surface lives outside this crate; it hands the core a
//! [`WebhookRequest`] built from the parts of the received call.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Request handed over by the HTTP boundary
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl WebhookRequest {
    /// Create a request without headers nor body
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Shortcut for a `POST` on `path`
    pub fn post(path: &str) -> Result<Self> {
        let uri = path.parse::<Uri>().map_err(|e| Error::config(e.to_string()))?;
        Ok(Self::new(Method::POST, uri))
    }

    /// Append a header
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("invalid header value for {}: {}", name, e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Set the request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, case-insensitive. Non UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body, `None` when the boundary received none
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Structured view used as template data under the `Request` key
    pub fn to_template_value(&self) -> Value {
        let mut headers = Map::new();
        for name in self.headers.keys() {
            let values: Vec<Value> = self
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(|v| Value::String(v.to_string()))
                .collect();
            headers.insert(name.as_str().to_string(), Value::Array(values));
        }

        json!({
            "Method": self.method.as_str(),
            "Path": self.uri.path(),
            "Query": self.uri.query().unwrap_or_default(),
            "Headers": headers,
        })
    }
}

impl From<http::Request<Vec<u8>>> for WebhookRequest {
    fn from(request: http::Request<Vec<u8>>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: Some(body),
        }
    }
}
