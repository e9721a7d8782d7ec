//! Pipeline steps
//!
//! A [`Step`] is one instance of a [`StepKind`]: the kind declares the slots
//! and the behavior, the step holds the per-instance id, configuration and
//! slot values.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::formatting;
use crate::pipeline::var::{InputConfig, SlotValue, Var, get_var};
use crate::request::WebhookRequest;
use crate::valuable::Valuable;

/// Per-step output values, keyed by step identifier then slot name
pub type Ledger = HashMap<String, HashMap<String, SlotValue>>;

/// Ledger shared between a pipeline and the step it is running
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Behavior of a family of steps
pub trait StepKind: Send + Sync + fmt::Debug {
    /// Registry name, unique across kinds (compared case-insensitively)
    fn name(&self) -> &str;

    /// Input slots, a fresh list on every call
    fn defined_inputs(&self) -> Vec<Var>;

    /// Output slots, a fresh list on every call
    fn defined_outputs(&self) -> Vec<Var>;

    /// Execute the step, reading inputs and writing outputs through `step`
    fn run(&self, step: &mut Step) -> Result<()>;
}

/// An executable step instance
#[derive(Debug, Clone)]
pub struct Step {
    kind: Arc<dyn StepKind>,
    /// Name of the step kind
    pub name: String,
    /// Caller assigned identifier
    pub id: Option<String>,
    /// Input slots
    pub inputs: Vec<Var>,
    /// Output slots
    pub outputs: Vec<Var>,
    /// Step specific configuration
    pub config: Map<String, Value>,
    ledger: Option<SharedLedger>,
    run_inputs: Option<Arc<Map<String, Value>>>,
}

impl Step {
    /// Instantiate `kind` with its declared slots
    pub fn new(kind: Arc<dyn StepKind>) -> Self {
        Self {
            name: kind.name().to_string(),
            inputs: kind.defined_inputs(),
            outputs: kind.defined_outputs(),
            kind,
            id: None,
            config: Map::new(),
            ledger: None,
            run_inputs: None,
        }
    }

    /// Ledger key: the id when set, the kind name otherwise
    pub fn identifier(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Set the identifier, an empty id resets it
    pub fn with_id(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        self.id = if id.is_empty() { None } else { Some(id) };
        self
    }

    /// Merge `config` into the step configuration. An `id` key sets the
    /// identifier instead of being stored.
    pub fn with_config(&mut self, mut config: Map<String, Value>) -> Result<&mut Self> {
        if let Some(id) = config.remove("id") {
            match id {
                Value::String(id) => {
                    self.with_id(id);
                }
                Value::Null => {}
                other => {
                    return Err(Error::config(format!(
                        "id of step {} must be a string, got {}",
                        self.name, other
                    )));
                }
            }
        }

        self.config.extend(config);
        Ok(self)
    }

    /// Assign an input slot. Unknown slots and type mismatches are errors.
    pub fn with_input(&mut self, name: &str, value: impl Into<SlotValue>) -> Result<&mut Self> {
        let step = self.name.clone();
        let var = self
            .inputs
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| Error::UnknownSlot {
                step,
                slot: name.to_string(),
            })?;
        var.assign(value.into())?;
        Ok(self)
    }

    /// Assign an output slot. Unknown slots and type mismatches are errors.
    pub fn output(&mut self, name: &str, value: impl Into<SlotValue>) -> Result<&mut Self> {
        let step = self.name.clone();
        let var = self
            .outputs
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| Error::UnknownSlot {
                step,
                slot: name.to_string(),
            })?;
        var.assign(value.into())?;
        Ok(self)
    }

    /// Current value of an output slot
    pub fn output_value(&self, name: &str) -> Option<&SlotValue> {
        get_var(&self.outputs, name)?.value.as_ref()
    }

    /// Read an input slot. Input configs come back with every templated value
    /// rendered against the current output ledger (`Outputs`) and the
    /// pipeline inputs of the run (`Inputs`); this happens on each read.
    pub fn input(&self, name: &str) -> Result<Var> {
        let var = get_var(&self.inputs, name).ok_or_else(|| Error::MissingInput(name.to_string()))?;

        match &var.value {
            Some(SlotValue::InputConfig(config)) => self.resolve_input_config(var, config),
            _ => Ok(var.clone()),
        }
    }

    /// Read an input config slot, failing when it is absent or unset
    pub fn input_config(&self, name: &str) -> Result<InputConfig> {
        match self.input(name)?.value {
            Some(SlotValue::InputConfig(config)) => Ok(config),
            _ => Err(Error::MissingInput(name.to_string())),
        }
    }

    /// Read a request slot, failing when it is absent or unset
    pub fn input_request(&self, name: &str) -> Result<Arc<WebhookRequest>> {
        match self.input(name)?.value {
            Some(SlotValue::Request(request)) => Ok(request),
            _ => Err(Error::MissingInput(name.to_string())),
        }
    }

    /// Boolean flag from the step configuration, false when absent
    pub fn config_flag(&self, key: &str) -> bool {
        self.config.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Run the step behavior
    pub fn run(&mut self) -> Result<()> {
        let kind = Arc::clone(&self.kind);
        kind.run(self)
    }

    /// Independent copy: slots and configuration are cloned, the run
    /// bindings are dropped.
    pub fn deep_copy(&self) -> Step {
        Step {
            ledger: None,
            run_inputs: None,
            ..self.clone()
        }
    }

    /// Copy a pipeline-level value into the matching input slot. Values whose
    /// name or type do not match are ignored.
    pub(crate) fn with_pipeline_input(&mut self, name: &str, value: &SlotValue) {
        if let Some(var) = self.inputs.iter_mut().find(|v| v.name == name) {
            if var.ty == value.slot_type() {
                var.value = Some(value.clone());
            }
        }
    }

    pub(crate) fn bind_ledger(&mut self, ledger: SharedLedger) {
        self.ledger = Some(ledger);
    }

    pub(crate) fn bind_run_inputs(&mut self, inputs: Arc<Map<String, Value>>) {
        self.run_inputs = Some(inputs);
    }

    fn resolve_input_config(&self, var: &Var, config: &InputConfig) -> Result<Var> {
        let mut values = Vec::new();
        for value in config.get() {
            if value.contains("{{") && value.contains("}}") {
                values.push(formatting::render_str(&value, &self.template_context())?);
            } else {
                values.push(value);
            }
        }

        Ok(Var {
            internal: true,
            ty: var.ty,
            name: var.name.clone(),
            value: Some(SlotValue::InputConfig(InputConfig::new(
                config.name.clone(),
                Valuable::from_values(values),
            ))),
        })
    }

    fn template_context(&self) -> Value {
        let mut outputs = Map::new();
        if let Some(ledger) = &self.ledger {
            let ledger = ledger.read().unwrap_or_else(PoisonError::into_inner);
            for (id, slots) in ledger.iter() {
                let slots: Map<String, Value> = slots
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect();
                outputs.insert(id.clone(), Value::Object(slots));
            }
        }

        let inputs = self.run_inputs.as_deref().cloned().unwrap_or_default();

        let mut context = Map::new();
        context.insert("Outputs".to_string(), Value::Object(outputs));
        context.insert("Inputs".to_string(), Value::Object(inputs));
        Value::Object(context)
    }
}
