//! Validation pipeline
//!
//! A [`Pipeline`] runs its steps in declaration order. Each step sees the
//! pipeline inputs whose name and type match one of its input slots, and
//! publishes its outputs to a ledger keyed by step identifier that later
//! steps reference through `{{ Outputs.<id>.<slot> }}` templates.
//!
//! ```text
//! inputs ──▶ step 1 ──▶ step 2 ──▶ ... ──▶ step n ──▶ last results
//!              │          ▲ │        ▲
//!              ▼          │ ▼        │
//!           ┌─────────────────────────────┐
//!           │ outputs[step id][slot name] │
//!           └─────────────────────────────┘
//! ```

pub mod registry;
pub mod step;
pub mod steps;
pub mod var;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

pub use registry::StepRegistry;
pub use step::{Ledger, SharedLedger, Step, StepKind};
pub use var::{InputConfig, SlotType, SlotValue, Var};

/// Configuration of one step in a security section
///
/// ```yaml
/// - header:
///     id: secretHeader
///     inputs:
///       - name: headerName
///         value: X-Token
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Identifier used as ledger key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Input slot values
    #[serde(default)]
    pub inputs: Vec<InputConfig>,

    /// Every other key, handed to the step as its configuration
    #[serde(flatten)]
    pub specs: Map<String, Value>,
}

/// One entry of a security section: a single step name mapped to its configuration
pub type StepEntry = BTreeMap<String, StepConfig>;

/// Ordered chain of validation steps
#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
    inputs: HashMap<String, SlotValue>,
    outputs: SharedLedger,
    wanted_result: Option<SlotValue>,
    last_results: Vec<SlotValue>,
    last_error: Option<Error>,
}

impl Pipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline from security entries, resolving step names through `registry`
    pub fn from_config(entries: &[StepEntry], registry: &StepRegistry) -> Result<Self> {
        let mut pipeline = Self::new();

        for entry in entries {
            if entry.len() != 1 {
                return Err(Error::config(format!(
                    "a security entry must hold exactly one step, found {}",
                    entry.len()
                )));
            }

            for (name, config) in entry {
                let mut step = registry.get(name)?;
                for input in &config.inputs {
                    input.valuable.ensure_resolvable()?;
                    step.with_input(&input.name, input.clone())?;
                }
                if let Some(id) = &config.id {
                    step.with_id(id.clone());
                }
                step.with_config(config.specs.clone())?;
                pipeline.add_step(step);
            }
        }

        debug!(steps = pipeline.step_count(), "Pipeline built");
        Ok(pipeline)
    }

    /// Append a step, it runs after every step already added
    pub fn add_step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Whether the pipeline holds at least one step
    pub fn has_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Number of steps
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Set a pipeline input, offered to every step on the next run
    pub fn with_input(&mut self, name: impl Into<String>, value: impl Into<SlotValue>) -> &mut Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Pipeline inputs
    pub fn inputs(&self) -> &HashMap<String, SlotValue> {
        &self.inputs
    }

    /// Set the value [`Pipeline::check_result`] looks for
    pub fn want_result(&mut self, value: impl Into<SlotValue>) -> &mut Self {
        self.wanted_result = Some(value.into());
        self
    }

    /// Output values of the step that ran last, only recorded when a result is wanted
    pub fn last_results(&self) -> &[SlotValue] {
        &self.last_results
    }

    /// Run every step in order and return the last one executed. On failure
    /// the failing step is returned and its error is kept, see
    /// [`Pipeline::run_error`].
    pub fn run(&mut self) -> Option<&Step> {
        self.last_error = None;

        if self.steps.is_empty() {
            self.inputs.clear();
            self.outputs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            return None;
        }

        let run_inputs: Arc<Map<String, Value>> = Arc::new(
            self.inputs
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        );

        let mut failed = None;
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.bind_ledger(Arc::clone(&self.outputs));
            step.bind_run_inputs(Arc::clone(&run_inputs));
            for (name, value) in &self.inputs {
                step.with_pipeline_input(name, value);
            }

            debug!(step = %step.identifier(), "Running step");
            for var in &step.inputs {
                debug!(step = %step.identifier(), input = %var.name, value = ?var.value, "Step input");
            }

            if let Err(err) = step.run() {
                error!(step = %step.identifier(), error = %err, "Step failed");
                self.last_error = Some(err);
                failed = Some(index);
                break;
            }

            let mut ledger = self.outputs.write().unwrap_or_else(PoisonError::into_inner);
            let slots = ledger.entry(step.identifier().to_string()).or_default();
            if self.wanted_result.is_some() {
                self.last_results.clear();
            }
            for var in &step.outputs {
                debug!(step = %step.identifier(), output = %var.name, value = ?var.value, "Step output");
                let Some(value) = &var.value else { continue };
                slots.insert(var.name.clone(), value.clone());
                if self.wanted_result.is_some() {
                    self.last_results.push(value.clone());
                }
            }
        }

        let index = failed.unwrap_or(self.steps.len() - 1);
        self.steps.get(index)
    }

    /// Error of the failed step of the last run
    pub fn run_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Whether a value of the last run equals the wanted result. The check
    /// stops at the first value of another type.
    pub fn check_result(&self) -> bool {
        let Some(wanted) = &self.wanted_result else {
            return false;
        };

        for result in &self.last_results {
            if result.slot_type() != wanted.slot_type() {
                warn!(
                    expected = %wanted.slot_type(),
                    found = %result.slot_type(),
                    "Pipeline result is not the same type as wanted result"
                );
                return false;
            }
            if result == wanted {
                return true;
            }
        }
        false
    }

    /// Snapshot of the output ledger
    pub fn outputs(&self) -> Ledger {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Output `slot` of the step identified by `step_id`
    pub fn output(&self, step_id: &str, slot: &str) -> Option<SlotValue> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(step_id)?
            .get(slot)
            .cloned()
    }

    /// Independent copy for one request. Mutating the copy never affects the
    /// original; the retained error is not carried over.
    pub fn deep_copy(&self) -> Pipeline {
        Pipeline {
            steps: self.steps.iter().map(Step::deep_copy).collect(),
            inputs: self.inputs.clone(),
            outputs: Arc::new(RwLock::new(self.outputs())),
            wanted_result: self.wanted_result.clone(),
            last_results: self.last_results.clone(),
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::WebhookRequest;
    use crate::valuable::Valuable;

    #[derive(Debug)]
    struct Fake;

    impl StepKind for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        fn defined_inputs(&self) -> Vec<Var> {
            vec![Var::new(SlotType::Str, "name").with_default("")]
        }

        fn defined_outputs(&self) -> Vec<Var> {
            vec![Var::new(SlotType::Str, "message").with_default("")]
        }

        fn run(&self, step: &mut Step) -> Result<()> {
            let name = step.input("name")?;
            let name = name
                .value
                .as_ref()
                .and_then(SlotValue::as_str)
                .unwrap_or_default()
                .to_string();
            step.output("message", format!("hello {}", name))?;
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl StepKind for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn defined_inputs(&self) -> Vec<Var> {
            vec![]
        }
        fn defined_outputs(&self) -> Vec<Var> {
            vec![Var::new(SlotType::Bool, "result").with_default(false)]
        }
        fn run(&self, step: &mut Step) -> Result<()> {
            Err(Error::StepFailed {
                step: step.name.clone(),
                message: "boom".to_string(),
            })
        }
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::with_builtins();
        registry.register(Arc::new(Fake)).unwrap();
        registry.register(Arc::new(Failing)).unwrap();
        registry
    }

    fn input(name: &str, value: &str) -> InputConfig {
        InputConfig::new(name, Valuable::from_value(value))
    }

    fn header_compare_pipeline(expected: &str) -> Pipeline {
        let registry = registry();
        let mut header = registry.get("header").unwrap();
        header.with_id("h");
        header
            .with_input("headerName", input("headerName", "X-Token"))
            .unwrap();

        let mut compare = registry.get("compare").unwrap();
        compare
            .with_input("first", input("first", "{{ Outputs.h.value }}"))
            .unwrap();
        compare
            .with_input("second", input("second", expected))
            .unwrap();

        let mut pipeline = Pipeline::new();
        pipeline.add_step(header).add_step(compare);
        pipeline
    }

    fn token_request(token: &str) -> WebhookRequest {
        WebhookRequest::post("/v1alpha1/test")
            .unwrap()
            .with_header("X-Token", token)
            .unwrap()
    }

    #[test]
    fn test_pipeline_builder() {
        let mut pipeline = Pipeline::new();
        assert!(!pipeline.has_steps());
        pipeline.add_step(registry().get("fake").unwrap());
        assert!(pipeline.has_steps());
        assert_eq!(pipeline.step_count(), 1);
    }

    #[test]
    fn test_run_returns_last_step() {
        let registry = registry();
        let mut pipeline = Pipeline::new();
        pipeline
            .add_step(registry.get("fake").unwrap())
            .add_step(registry.get("compare").unwrap());
        pipeline.with_input("name", "test");

        let last = pipeline.run().unwrap();
        assert_eq!(last.name, "compare");
        assert!(pipeline.run_error().is_none());
        assert_eq!(
            pipeline.output("fake", "message"),
            Some(SlotValue::from("hello test"))
        );
    }

    #[test]
    fn test_run_empty_pipeline() {
        let mut pipeline = Pipeline::new();
        pipeline.with_input("name", "test");
        assert!(pipeline.run().is_none());
        assert!(pipeline.inputs().is_empty());
        assert!(pipeline.outputs().is_empty());
        assert!(!pipeline.check_result());
    }

    #[test]
    fn test_run_stops_at_failing_step() {
        let registry = registry();
        let mut pipeline = Pipeline::new();
        pipeline
            .add_step(registry.get("failing").unwrap())
            .add_step(registry.get("fake").unwrap());
        pipeline.want_result(true);

        let last = pipeline.run().unwrap();
        assert_eq!(last.name, "failing");
        assert!(matches!(
            pipeline.run_error(),
            Some(Error::StepFailed { .. })
        ));
        assert!(pipeline.output("fake", "message").is_none());
        assert!(!pipeline.check_result());
    }

    #[test]
    fn test_mismatched_pipeline_input_is_skipped() {
        let mut pipeline = Pipeline::new();
        pipeline.add_step(registry().get("fake").unwrap());
        pipeline.with_input("name", true);

        pipeline.run();
        assert!(pipeline.run_error().is_none());
        assert_eq!(pipeline.output("fake", "message"), Some(SlotValue::from("hello ")));
    }

    #[test]
    fn test_header_compare_pass() {
        let mut pipeline = header_compare_pipeline("test");
        pipeline
            .want_result(true)
            .with_input("request", token_request("test"));

        pipeline.run();
        assert!(pipeline.check_result());
        assert_eq!(pipeline.output("h", "value"), Some(SlotValue::from("test")));
    }

    #[test]
    fn test_header_compare_fail() {
        let mut pipeline = header_compare_pipeline("test");
        pipeline
            .want_result(true)
            .with_input("request", token_request("wrong"));

        pipeline.run();
        assert!(pipeline.run_error().is_none());
        assert!(!pipeline.check_result());
    }

    #[test]
    fn test_hmac_of_pipeline_payload() {
        let registry = registry();
        let mut hmac = registry.get("generate_hmac_256").unwrap();
        hmac.with_id("sig");
        hmac.with_input("secret", input("secret", "test")).unwrap();
        hmac.with_input("payload", input("payload", "{{ Inputs.payload }}"))
            .unwrap();

        let mut pipeline = Pipeline::new();
        pipeline.add_step(hmac).with_input("payload", "test");
        pipeline.run();

        assert!(pipeline.run_error().is_none());
        assert_eq!(
            pipeline.output("sig", "value"),
            Some(SlotValue::from(
                "88cd2108b5347d973cf39cdf9053d7dd42704876d8c9a9bd8e2d168259d3ddf7"
            ))
        );
    }

    #[test]
    fn test_check_result_before_any_run() {
        let mut pipeline = Pipeline::new();
        pipeline.want_result(true);
        assert!(!pipeline.check_result());

        let mut pipeline = header_compare_pipeline("test");
        pipeline.want_result(true);
        assert!(!pipeline.check_result());
    }

    #[test]
    fn test_check_result_type_mismatch() {
        let mut pipeline = Pipeline::new();
        pipeline.add_step(registry().get("fake").unwrap());
        pipeline.want_result(true).with_input("name", "test");

        pipeline.run();
        assert_eq!(pipeline.last_results(), &[SlotValue::from("hello test")]);
        assert!(!pipeline.check_result());
    }

    #[test]
    fn test_check_result_without_wanted_result() {
        let mut pipeline = header_compare_pipeline("test");
        pipeline.with_input("request", token_request("test"));
        pipeline.run();
        assert!(pipeline.last_results().is_empty());
        assert!(!pipeline.check_result());
    }

    #[test]
    fn test_deep_copy_isolates_inputs() {
        let mut original = Pipeline::new();
        original.add_step(registry().get("fake").unwrap());
        original.with_input("name", "original");

        let mut copy = original.deep_copy();
        copy.with_input("name", "copy").with_input("other", "value");
        copy.run();

        assert_eq!(original.inputs().len(), 1);
        assert_eq!(original.inputs()["name"], SlotValue::from("original"));
        assert!(original.outputs().is_empty());
        assert_eq!(copy.output("fake", "message"), Some(SlotValue::from("hello copy")));
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
- header:
    id: secretHeader
    inputs:
      - name: headerName
        value: X-Token
- compare:
    inverse: false
    inputs:
      - name: first
        value: "{{ Outputs.secretHeader.value }}"
      - name: second
        values: [test, other]
"#;
        let entries: Vec<StepEntry> = serde_yaml::from_str(yaml).unwrap();
        let mut pipeline = Pipeline::from_config(&entries, &registry()).unwrap();
        assert_eq!(pipeline.step_count(), 2);
        assert_eq!(pipeline.steps()[0].identifier(), "secretHeader");
        assert_eq!(pipeline.steps()[1].config["inverse"], Value::Bool(false));

        pipeline
            .want_result(true)
            .with_input("request", token_request("other"));
        pipeline.run();
        assert!(pipeline.check_result());
    }

    #[test]
    fn test_from_config_unknown_step() {
        let entries: Vec<StepEntry> = serde_yaml::from_str("- unknown: {}").unwrap();
        let err = Pipeline::from_config(&entries, &registry()).unwrap_err();
        assert!(matches!(err, Error::UnknownStep { .. }));
    }

    #[test]
    fn test_from_config_rejects_multi_key_entry() {
        let yaml = r#"
- header: {}
  compare: {}
"#;
        let entries: Vec<StepEntry> = serde_yaml::from_str(yaml).unwrap();
        assert!(Pipeline::from_config(&entries, &registry()).is_err());
    }

    #[test]
    fn test_from_config_rejects_unset_env_ref() {
        let yaml = r#"
- compare:
    inputs:
      - name: first
        valueFrom:
          envRef: WEBHOOKED_TEST_PIPELINE_UNSET
"#;
        let entries: Vec<StepEntry> = serde_yaml::from_str(yaml).unwrap();
        let err = Pipeline::from_config(&entries, &registry()).unwrap_err();
        assert!(err.to_string().contains("WEBHOOKED_TEST_PIPELINE_UNSET"));
    }
}
