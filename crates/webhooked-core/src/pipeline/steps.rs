//! Built-in steps

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pipeline::step::{Step, StepKind};
use crate::pipeline::var::{InputConfig, SlotType, SlotValue, Var};

/// Every built-in step kind
pub fn builtins() -> Vec<Arc<dyn StepKind>> {
    vec![
        Arc::new(Header),
        Arc::new(Compare),
        Arc::new(HasPrefix),
        Arc::new(HasSuffix),
        Arc::new(GenerateHmac256),
        Arc::new(DebugValue),
    ]
}

fn config_input(name: &str) -> Var {
    Var::new(SlotType::InputConfig, name).with_default(InputConfig::default())
}

/// Reads a header of the inbound request
#[derive(Debug)]
pub struct Header;

impl StepKind for Header {
    fn name(&self) -> &str {
        "header"
    }

    fn defined_inputs(&self) -> Vec<Var> {
        vec![
            Var::internal(SlotType::Request, "request"),
            config_input("headerName"),
        ]
    }

    fn defined_outputs(&self) -> Vec<Var> {
        vec![Var::new(SlotType::Str, "value").with_default("")]
    }

    fn run(&self, step: &mut Step) -> Result<()> {
        let header_name = step.input_config("headerName")?.first();
        let request = step.input_request("request")?;

        let value = request.header(&header_name).unwrap_or_default().to_string();
        debug!(header = %header_name, value = %value, "Resolved header");

        step.output("value", value)?;
        Ok(())
    }
}

/// True when at least one element is shared by both lists
#[derive(Debug)]
pub struct Compare;

impl StepKind for Compare {
    fn name(&self) -> &str {
        "compare"
    }

    fn defined_inputs(&self) -> Vec<Var> {
        vec![config_input("first"), config_input("second")]
    }

    fn defined_outputs(&self) -> Vec<Var> {
        vec![Var::new(SlotType::Bool, "result").with_default(false)]
    }

    fn run(&self, step: &mut Step) -> Result<()> {
        let first = step.input_config("first")?.get();
        let second = step.input_config("second")?.get();

        let inverse = step.config_flag("inverse");
        let result = first.iter().any(|f| second.contains(f)) != inverse;
        debug!(?first, ?second, inverse, result, "Compared values");

        step.output("result", result)?;
        Ok(())
    }
}

/// True when any text starts with any prefix
#[derive(Debug)]
pub struct HasPrefix;

impl StepKind for HasPrefix {
    fn name(&self) -> &str {
        "hasPrefix"
    }

    fn defined_inputs(&self) -> Vec<Var> {
        vec![config_input("text"), config_input("prefix")]
    }

    fn defined_outputs(&self) -> Vec<Var> {
        vec![Var::new(SlotType::Bool, "result").with_default(false)]
    }

    fn run(&self, step: &mut Step) -> Result<()> {
        let texts = step.input_config("text")?.get();
        let prefixes = step.input_config("prefix")?.get();

        let found = texts
            .iter()
            .any(|text| prefixes.iter().any(|prefix| text.starts_with(prefix.as_str())));

        step.output("result", found != step.config_flag("inverse"))?;
        Ok(())
    }
}

/// True when any text ends with any suffix
#[derive(Debug)]
pub struct HasSuffix;

impl StepKind for HasSuffix {
    fn name(&self) -> &str {
        "hasSuffix"
    }

    fn defined_inputs(&self) -> Vec<Var> {
        vec![config_input("text"), config_input("suffix")]
    }

    fn defined_outputs(&self) -> Vec<Var> {
        vec![Var::new(SlotType::Bool, "result").with_default(false)]
    }

    fn run(&self, step: &mut Step) -> Result<()> {
        let texts = step.input_config("text")?.get();
        let suffixes = step.input_config("suffix")?.get();

        let found = texts
            .iter()
            .any(|text| suffixes.iter().any(|suffix| text.ends_with(suffix.as_str())));

        step.output("result", found != step.config_flag("inverse"))?;
        Ok(())
    }
}

/// Hex encoded HMAC-SHA256 keyed by `secret`.
///
/// The signed bytes are the raw request body (`body`) when `payload` is not
/// configured or when it renders to the body's text. Any other `payload`
/// is signed as text.
#[derive(Debug)]
pub struct GenerateHmac256;

impl StepKind for GenerateHmac256 {
    fn name(&self) -> &str {
        "generate_hmac_256"
    }

    fn defined_inputs(&self) -> Vec<Var> {
        vec![
            Var::internal(SlotType::Bytes, "body"),
            config_input("secret"),
            config_input("payload"),
        ]
    }

    fn defined_outputs(&self) -> Vec<Var> {
        vec![Var::new(SlotType::Str, "value").with_default("")]
    }

    fn run(&self, step: &mut Step) -> Result<()> {
        let payload = step.input_config("payload")?.get();
        let secret = step.input_config("secret")?.first();
        let body = step.input("body").ok().and_then(|var| match var.value {
            Some(SlotValue::Bytes(bytes)) => Some(bytes),
            _ => None,
        });

        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| Error::StepFailed {
                step: self.name().to_string(),
                message: e.to_string(),
            })?;

        match (payload.first(), body) {
            (None, Some(body)) => mac.update(&body),
            (Some(text), Some(body)) if *text == String::from_utf8_lossy(&body) => mac.update(&body),
            (text, _) => mac.update(text.map(String::as_bytes).unwrap_or_default()),
        }

        step.output("value", hex::encode(mac.finalize().into_bytes()))?;
        Ok(())
    }
}

/// Logs its unnamed input
#[derive(Debug)]
pub struct DebugValue;

impl StepKind for DebugValue {
    fn name(&self) -> &str {
        "debug"
    }

    fn defined_inputs(&self) -> Vec<Var> {
        vec![config_input("")]
    }

    fn defined_outputs(&self) -> Vec<Var> {
        vec![]
    }

    fn run(&self, step: &mut Step) -> Result<()> {
        let value = step.input_config("")?;
        debug!(values = ?value.get(), "Debug value");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::WebhookRequest;
    use crate::valuable::Valuable;
    use rstest::rstest;
    use serde_json::json;

    fn input(name: &str, values: &[&str]) -> InputConfig {
        InputConfig::new(name, Valuable::from_values(values.iter().copied()))
    }

    fn inverse(step: &mut Step) {
        step.with_config(json!({"inverse": true}).as_object().cloned().unwrap())
            .unwrap();
    }

    #[test]
    fn test_header() {
        let mut step = Step::new(Arc::new(Header));
        let request = WebhookRequest::post("/")
            .unwrap()
            .with_header("X-Token", "test")
            .unwrap();
        step.with_input("request", request).unwrap();
        step.with_input("headerName", input("headerName", &["x-token"]))
            .unwrap();
        step.run().unwrap();
        assert_eq!(step.output_value("value"), Some(&SlotValue::from("test")));
    }

    #[test]
    fn test_header_absent_is_empty() {
        let mut step = Step::new(Arc::new(Header));
        step.with_input("request", WebhookRequest::post("/").unwrap())
            .unwrap();
        step.with_input("headerName", input("headerName", &["X-Missing"]))
            .unwrap();
        step.run().unwrap();
        assert_eq!(step.output_value("value"), Some(&SlotValue::from("")));
    }

    #[test]
    fn test_header_without_request() {
        let mut step = Step::new(Arc::new(Header));
        step.with_input("headerName", input("headerName", &["X-Token"]))
            .unwrap();
        let err = step.run().unwrap_err();
        assert_eq!(err.to_string(), "missing input request");
    }

    #[rstest]
    #[case(&["test"], &["test"], false, true)]
    #[case(&["test"], &["other"], false, false)]
    #[case(&["a", "b"], &["c", "b"], false, true)]
    #[case(&["test"], &["test"], true, false)]
    #[case(&["test"], &["other"], true, true)]
    #[case(&[], &[], false, false)]
    fn test_compare(
        #[case] first: &[&str],
        #[case] second: &[&str],
        #[case] invert: bool,
        #[case] expected: bool,
    ) {
        let mut step = Step::new(Arc::new(Compare));
        step.with_input("first", input("first", first)).unwrap();
        step.with_input("second", input("second", second)).unwrap();
        if invert {
            inverse(&mut step);
        }
        step.run().unwrap();
        assert_eq!(step.output_value("result"), Some(&SlotValue::Bool(expected)));
    }

    #[rstest]
    #[case(&["sha256=abc"], &["sha256="], false, true)]
    #[case(&["sha1=abc"], &["sha256="], false, false)]
    #[case(&["x", "sha1=abc"], &["sha256=", "sha1="], false, true)]
    #[case(&["sha256=abc"], &["sha256="], true, false)]
    fn test_has_prefix(
        #[case] text: &[&str],
        #[case] prefix: &[&str],
        #[case] invert: bool,
        #[case] expected: bool,
    ) {
        let mut step = Step::new(Arc::new(HasPrefix));
        step.with_input("text", input("text", text)).unwrap();
        step.with_input("prefix", input("prefix", prefix)).unwrap();
        if invert {
            inverse(&mut step);
        }
        step.run().unwrap();
        assert_eq!(step.output_value("result"), Some(&SlotValue::Bool(expected)));
    }

    #[rstest]
    #[case(&["image.png"], &[".png"], false, true)]
    #[case(&["image.png"], &[".jpg"], false, false)]
    #[case(&["image.png"], &[".jpg"], true, true)]
    fn test_has_suffix(
        #[case] text: &[&str],
        #[case] suffix: &[&str],
        #[case] invert: bool,
        #[case] expected: bool,
    ) {
        let mut step = Step::new(Arc::new(HasSuffix));
        step.with_input("text", input("text", text)).unwrap();
        step.with_input("suffix", input("suffix", suffix)).unwrap();
        if invert {
            inverse(&mut step);
        }
        step.run().unwrap();
        assert_eq!(step.output_value("result"), Some(&SlotValue::Bool(expected)));
    }

    #[test]
    fn test_generate_hmac_256() {
        let mut step = Step::new(Arc::new(GenerateHmac256));
        step.with_input("secret", input("secret", &["test"])).unwrap();
        step.with_input("payload", input("payload", &["test"])).unwrap();
        step.run().unwrap();
        assert_eq!(
            step.output_value("value"),
            Some(&SlotValue::from(
                "88cd2108b5347d973cf39cdf9053d7dd42704876d8c9a9bd8e2d168259d3ddf7"
            ))
        );
    }

    fn hmac_hex(secret: &str, data: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    #[rstest]
    #[case::payload_not_configured(None)]
    #[case::payload_is_body_text(Some("{\u{fffd}\u{fffd}}"))]
    fn test_generate_hmac_256_signs_raw_body(#[case] payload: Option<&str>) {
        let body = vec![0x7b, 0xff, 0xfe, 0x7d];
        let mut step = Step::new(Arc::new(GenerateHmac256));
        step.with_input("body", body.clone()).unwrap();
        step.with_input("secret", input("secret", &["test"])).unwrap();
        if let Some(payload) = payload {
            step.with_input("payload", input("payload", &[payload])).unwrap();
        }
        step.run().unwrap();

        let expected = hmac_hex("test", &body);
        assert_ne!(expected, hmac_hex("test", "{\u{fffd}\u{fffd}}".as_bytes()));
        assert_eq!(step.output_value("value"), Some(&SlotValue::from(expected)));
    }

    #[test]
    fn test_generate_hmac_256_other_payload_is_text() {
        let mut step = Step::new(Arc::new(GenerateHmac256));
        step.with_input("body", b"ignored".to_vec()).unwrap();
        step.with_input("secret", input("secret", &["test"])).unwrap();
        step.with_input("payload", input("payload", &["test"])).unwrap();
        step.run().unwrap();
        assert_eq!(
            step.output_value("value"),
            Some(&SlotValue::from(hmac_hex("test", b"test")))
        );
    }

    #[test]
    fn test_debug() {
        let mut step = Step::new(Arc::new(DebugValue));
        step.with_input("", input("", &["yes"])).unwrap();
        assert!(step.run().is_ok());
        assert!(step.outputs.is_empty());
    }
}
